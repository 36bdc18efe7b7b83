use tokio::sync::mpsc::Receiver;

use crate::{Error, Result, SHA1_LEN};

/// Size of the blocks a piece is requested in
pub const BLOCK_SIZE: u32 = 2u32.pow(14);

/// Downloaded piece
#[derive(Debug)]
pub struct Piece {
    /// Index of piece within file
    pub index: u32,
    /// Piece data
    pub buf: Vec<u8>,
}

/// Buffer a single piece is assembled in, block by block
///
/// Tracks which blocks have been written so the piece is only hashed once
/// every byte has been received.
pub struct PieceBuffer {
    index: u32,
    buf: Vec<u8>,
    received: Vec<bool>,
}

impl PieceBuffer {
    pub fn new(index: u32, length: u32) -> PieceBuffer {
        let no_of_blocks = length.div_ceil(BLOCK_SIZE) as usize;
        PieceBuffer {
            index,
            buf: vec![0; length as usize],
            received: vec![false; no_of_blocks],
        }
    }

    /// `(begin, length)` of every block, in offset order
    pub fn blocks(&self) -> Vec<(u32, u32)> {
        let length = self.buf.len() as u32;
        (0..length)
            .step_by(BLOCK_SIZE as usize)
            .map(|begin| (begin, BLOCK_SIZE.min(length - begin)))
            .collect()
    }

    /// Copy a received block into place
    pub fn write(&mut self, begin: u32, block: &[u8]) -> Result<()> {
        let block_index = (begin / BLOCK_SIZE) as usize;
        let expected_len = self
            .blocks()
            .get(block_index)
            .filter(|(block_begin, _)| *block_begin == begin)
            .map(|(_, len)| *len as usize)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "Block offset {} is not a block boundary of piece {}",
                    begin, self.index
                ))
            })?;
        if block.len() != expected_len {
            return Err(Error::Protocol(format!(
                "Block at offset {} of piece {} has {} bytes, expected {}",
                begin,
                self.index,
                block.len(),
                expected_len
            )));
        }
        if self.received[block_index] {
            return Err(Error::Protocol(format!(
                "Duplicate block at offset {} of piece {}",
                begin, self.index
            )));
        }
        let start = begin as usize;
        self.buf[start..start + block.len()].copy_from_slice(block);
        self.received[block_index] = true;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|received| *received)
    }

    /// Check the assembled piece against its expected SHA1 hash
    pub fn verify(self, expected: &[u8; SHA1_LEN]) -> Result<Vec<u8>> {
        if !self.is_complete() {
            let missing = self.received.iter().filter(|received| !**received).count();
            return Err(Error::Protocol(format!(
                "Piece {} is missing {} blocks",
                self.index, missing
            )));
        }
        let hash = sha1_smol::Sha1::from(&self.buf).digest().bytes();
        if hash != *expected {
            return Err(Error::Integrity {
                index: self.index,
                expected: hex::encode(expected),
                actual: hex::encode(hash),
            });
        }
        Ok(self.buf)
    }
}

/// Receive completed pieces and store them in an in-memory buffer
///
/// Returns once every piece has arrived, on the first error a worker reports,
/// or with a network error if all senders go away first.
pub async fn receiver(
    buf: &mut [u8],
    piece_length: usize,
    mut rx: Receiver<Result<Piece>>,
    no_of_pieces: usize,
) -> Result<()> {
    let mut downloaded = vec![false; no_of_pieces];
    let mut downloaded_pieces = 0;
    while downloaded_pieces < no_of_pieces {
        let piece = match rx.recv().await {
            Some(piece_result) => piece_result?,
            None => {
                return Err(Error::Network(format!(
                    "All peers disconnected with {} of {} pieces downloaded",
                    downloaded_pieces, no_of_pieces
                )))
            }
        };
        let index = piece.index as usize;
        if downloaded[index] {
            continue;
        }
        let start = index * piece_length;
        let end = (start + piece_length).min(buf.len());
        buf[start..end].copy_from_slice(&piece.buf);
        downloaded[index] = true;
        downloaded_pieces += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1(data: &[u8]) -> [u8; 20] {
        sha1_smol::Sha1::from(data).digest().bytes()
    }

    #[test]
    fn piece_is_split_into_blocks_with_short_last_block() {
        let buffer = PieceBuffer::new(0, 2 * BLOCK_SIZE + 100);
        assert_eq!(
            buffer.blocks(),
            vec![(0, BLOCK_SIZE), (BLOCK_SIZE, BLOCK_SIZE), (2 * BLOCK_SIZE, 100)]
        );
        assert_eq!(PieceBuffer::new(0, 64).blocks(), vec![(0, 64)]);
    }

    #[test]
    fn verified_piece_is_returned_once_all_blocks_written() {
        let data = (0..2 * BLOCK_SIZE).map(|n| n as u8).collect::<Vec<u8>>();
        let mut buffer = PieceBuffer::new(0, 2 * BLOCK_SIZE);
        buffer.write(BLOCK_SIZE, &data[BLOCK_SIZE as usize..]).unwrap();
        assert!(!buffer.is_complete());
        buffer.write(0, &data[..BLOCK_SIZE as usize]).unwrap();
        assert!(buffer.is_complete());
        assert_eq!(buffer.verify(&sha1(&data)).unwrap(), data);
    }

    #[test]
    fn return_integrity_error_if_hash_does_not_match() {
        let mut buffer = PieceBuffer::new(4, 64);
        buffer.write(0, &[1; 64]).unwrap();
        let res = buffer.verify(&sha1(&[2; 64]));
        assert!(res.is_err_and(|e| matches!(e, Error::Integrity { index: 4, .. })));
    }

    #[test]
    fn return_error_if_piece_incomplete() {
        let buffer = PieceBuffer::new(0, 2 * BLOCK_SIZE);
        let res = buffer.verify(&[0; 20]);
        assert!(res.is_err_and(|e| e.to_string() == "protocol error: Piece 0 is missing 2 blocks"));
    }

    #[test]
    fn return_error_for_misaligned_wrong_sized_or_duplicate_blocks() {
        let mut buffer = PieceBuffer::new(0, 2 * BLOCK_SIZE);
        assert!(buffer.write(10, &[0; 10]).is_err());
        assert!(buffer.write(2 * BLOCK_SIZE, &[0; 10]).is_err());
        assert!(buffer.write(0, &[0; 10]).is_err());
        buffer.write(0, &[0; BLOCK_SIZE as usize]).unwrap();
        assert!(buffer.write(0, &[0; BLOCK_SIZE as usize]).is_err());
    }

    #[tokio::test]
    async fn receiver_puts_pieces_together_correctly() {
        const PIECE_LEN: usize = 128;
        let original_data = (0..PIECE_LEN as u8).collect::<Vec<u8>>().repeat(4);
        let mut original_data = original_data
            .chunks(PIECE_LEN)
            .enumerate()
            .flat_map(|(idx, piece)| piece.iter().map(move |val| val.wrapping_add(idx as u8)))
            .collect::<Vec<u8>>();
        // Truncated last piece
        original_data.truncate(original_data.len() - 4);

        let (tx, rx) = tokio::sync::mpsc::channel(4);
        for index in [2, 0, 3, 1] {
            let start = index * PIECE_LEN;
            let end = (start + PIECE_LEN).min(original_data.len());
            tx.send(Ok(Piece {
                index: index as u32,
                buf: original_data[start..end].to_vec(),
            }))
            .await
            .unwrap();
        }

        let mut receiver_buf = vec![0; original_data.len()];
        receiver(&mut receiver_buf, PIECE_LEN, rx, 4).await.unwrap();
        assert_eq!(receiver_buf, original_data);
    }

    #[tokio::test]
    async fn receiver_returns_error_reported_by_worker() {
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        tx.send(Err(Error::Integrity {
            index: 0,
            expected: String::new(),
            actual: String::new(),
        }))
        .await
        .unwrap();
        let mut buf = vec![0; 64];
        let res = receiver(&mut buf, 64, rx, 1).await;
        assert!(res.is_err_and(|e| matches!(e, Error::Integrity { .. })));
    }

    #[tokio::test]
    async fn receiver_returns_network_error_if_all_senders_drop_early() {
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        tx.send(Ok(Piece {
            index: 0,
            buf: vec![1; 64],
        }))
        .await
        .unwrap();
        drop(tx);
        let mut buf = vec![0; 128];
        let res = receiver(&mut buf, 64, rx, 2).await;
        assert!(res.is_err_and(|e| matches!(
            e,
            Error::Network(msg) if msg == "All peers disconnected with 1 of 2 pieces downloaded"
        )));
    }
}
