use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

const BITS_IN_BYTE: usize = 8;

/// Largest frame accepted from a peer: a 16 KiB block is the usual maximum,
/// this leaves room for large bitfields and extension messages
pub const MAX_MESSAGE_LEN: u32 = 2 * 1024 * 1024;

const CHOKE_ID: u8 = 0;
const UNCHOKE_ID: u8 = 1;
const INTERESTED_ID: u8 = 2;
const NOT_INTERESTED_ID: u8 = 3;
const HAVE_ID: u8 = 4;
const BITFIELD_ID: u8 = 5;
const REQUEST_ID: u8 = 6;
const PIECE_ID: u8 = 7;
const CANCEL_ID: u8 = 8;

/// Wrapper type for bitfield message payload
#[derive(Debug, Clone, PartialEq)]
pub struct Bitfield {
    data: Vec<u8>,
}

impl Bitfield {
    /// Create instance from bitfield message payload
    pub fn new(data: Vec<u8>) -> Bitfield {
        Bitfield { data }
    }

    /// Check if the bitfield contains the piece with the given index
    pub fn has_piece(&self, idx: usize) -> bool {
        let byte_index = idx / BITS_IN_BYTE;
        let offset = idx % BITS_IN_BYTE;
        match self.data.get(byte_index) {
            Some(byte) => (byte >> (BITS_IN_BYTE - 1 - offset)) & 0b00000001 == 0b00000001,
            None => false,
        }
    }

    /// Set the bit for a piece announced later with a `have` message
    pub fn set_piece(&mut self, idx: usize) {
        let byte_index = idx / BITS_IN_BYTE;
        let offset = idx % BITS_IN_BYTE;
        if byte_index >= self.data.len() {
            self.data.resize(byte_index + 1, 0);
        }
        self.data[byte_index] |= 0b00000001 << (BITS_IN_BYTE - 1 - offset);
    }
}

/// Peer message types
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    /// Index of piece the sender has completed and checked the hash of
    Have(u32),
    /// Describes which pieces (by index) the sender has
    Bitfield(Bitfield),
    /// Request a subset of a piece (a block)
    Request { index: u32, begin: u32, length: u32 },
    /// Send a subset of a piece (a block)
    Piece { index: u32, begin: u32, block: Vec<u8> },
    /// Cancel a request for a block
    Cancel { index: u32, begin: u32, length: u32 },
    /// Any message ID this client does not act on (port, extensions, ...)
    Other { id: u8, payload: Vec<u8> },
}

fn read_u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn check_payload_len(id: u8, payload: &[u8], valid: bool) -> Result<()> {
    if valid {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "Invalid payload length {} for message ID {}",
            payload.len(),
            id
        )))
    }
}

impl Message {
    /// Read one length-prefixed message from the socket
    pub async fn deserialise<T>(socket: &mut T) -> Result<Message>
    where
        T: AsyncRead + Unpin,
    {
        let len = socket.read_u32().await?;
        if len == 0 {
            return Ok(Message::KeepAlive);
        }
        if len > MAX_MESSAGE_LEN {
            return Err(Error::Protocol(format!(
                "Message length {} exceeds maximum of {}",
                len, MAX_MESSAGE_LEN
            )));
        }

        let id = socket.read_u8().await?;
        let mut payload = vec![0; len as usize - 1];
        socket.read_exact(&mut payload[..]).await?;
        Message::from_parts(id, payload)
    }

    /// Build a message from its ID and payload, checking the payload size
    pub fn from_parts(id: u8, payload: Vec<u8>) -> Result<Message> {
        match id {
            CHOKE_ID | UNCHOKE_ID | INTERESTED_ID | NOT_INTERESTED_ID => {
                check_payload_len(id, &payload, payload.is_empty())?;
                Ok(match id {
                    CHOKE_ID => Message::Choke,
                    UNCHOKE_ID => Message::Unchoke,
                    INTERESTED_ID => Message::Interested,
                    _ => Message::NotInterested,
                })
            }
            HAVE_ID => {
                check_payload_len(id, &payload, payload.len() == 4)?;
                Ok(Message::Have(read_u32_at(&payload, 0)))
            }
            BITFIELD_ID => Ok(Message::Bitfield(Bitfield::new(payload))),
            REQUEST_ID | CANCEL_ID => {
                check_payload_len(id, &payload, payload.len() == 12)?;
                let index = read_u32_at(&payload, 0);
                let begin = read_u32_at(&payload, 4);
                let length = read_u32_at(&payload, 8);
                if id == REQUEST_ID {
                    Ok(Message::Request {
                        index,
                        begin,
                        length,
                    })
                } else {
                    Ok(Message::Cancel {
                        index,
                        begin,
                        length,
                    })
                }
            }
            PIECE_ID => {
                check_payload_len(id, &payload, payload.len() >= 8)?;
                let index = read_u32_at(&payload, 0);
                let begin = read_u32_at(&payload, 4);
                let mut block = payload;
                block.drain(..8);
                Ok(Message::Piece {
                    index,
                    begin,
                    block,
                })
            }
            _ => Ok(Message::Other { id, payload }),
        }
    }

    /// Serialise [`Message`] to raw bytes
    pub fn serialise(&self) -> Vec<u8> {
        let (id, payload) = match self {
            Message::KeepAlive => return u32::to_be_bytes(0).to_vec(),
            Message::Choke => (CHOKE_ID, Vec::new()),
            Message::Unchoke => (UNCHOKE_ID, Vec::new()),
            Message::Interested => (INTERESTED_ID, Vec::new()),
            Message::NotInterested => (NOT_INTERESTED_ID, Vec::new()),
            Message::Have(index) => (HAVE_ID, index.to_be_bytes().to_vec()),
            Message::Bitfield(bitfield) => (BITFIELD_ID, bitfield.data.clone()),
            Message::Request {
                index,
                begin,
                length,
            } => (REQUEST_ID, [*index, *begin, *length].map(u32::to_be_bytes).concat()),
            Message::Cancel {
                index,
                begin,
                length,
            } => (CANCEL_ID, [*index, *begin, *length].map(u32::to_be_bytes).concat()),
            Message::Piece {
                index,
                begin,
                block,
            } => {
                let mut payload = [*index, *begin].map(u32::to_be_bytes).concat();
                payload.extend_from_slice(block);
                (PIECE_ID, payload)
            }
            Message::Other { id, payload } => (*id, payload.clone()),
        };
        let mut buf = u32::to_be_bytes(1 + payload.len() as u32).to_vec();
        buf.push(id);
        buf.extend_from_slice(&payload);
        buf
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep-alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have(index) => write!(f, "have({})", index),
            Message::Bitfield(bitfield) => write!(f, "bitfield({} bytes)", bitfield.data.len()),
            Message::Request {
                index,
                begin,
                length,
            } => write!(f, "request(index={}, begin={}, length={})", index, begin, length),
            Message::Piece {
                index,
                begin,
                block,
            } => write!(f, "piece(index={}, begin={}, {} bytes)", index, begin, block.len()),
            Message::Cancel {
                index,
                begin,
                length,
            } => write!(f, "cancel(index={}, begin={}, length={})", index, begin, length),
            Message::Other { id, payload } => {
                write!(f, "message id {} ({} bytes)", id, payload.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(buf: &[u8]) -> Result<Message> {
        let mut mock_socket = tokio_test::io::Builder::new().read(buf).build();
        Message::deserialise(&mut mock_socket).await
    }

    fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = u32::to_be_bytes(1 + payload.len() as u32).to_vec();
        buf.push(id);
        buf.extend_from_slice(payload);
        buf
    }

    #[tokio::test]
    async fn parse_keep_alive_message() {
        let res = parse(&u32::to_be_bytes(0)).await;
        assert!(res.is_ok_and(|message| message == Message::KeepAlive));
    }

    #[tokio::test]
    async fn parse_single_byte_messages() {
        let expected = [
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
        ];
        for (id, expected_message) in expected.into_iter().enumerate() {
            let res = parse(&frame(id as u8, &[])).await;
            assert!(res.is_ok_and(|message| message == expected_message));
        }
    }

    #[tokio::test]
    async fn parse_have_message() {
        let res = parse(&frame(4, &u32::to_be_bytes(100))).await;
        assert!(res.is_ok_and(|message| message == Message::Have(100)));
    }

    #[tokio::test]
    async fn parse_bitfield_message() {
        let res = parse(&frame(5, &[0x10])).await;
        let expected_message = Message::Bitfield(Bitfield::new(vec![0x10]));
        assert!(res.is_ok_and(|message| message == expected_message));
    }

    #[tokio::test]
    async fn parse_request_message() {
        let payload = [30u32, 100, 200].map(u32::to_be_bytes).concat();
        let res = parse(&frame(6, &payload)).await;
        let expected_message = Message::Request {
            index: 30,
            begin: 100,
            length: 200,
        };
        assert!(res.is_ok_and(|message| message == expected_message));
    }

    #[tokio::test]
    async fn parse_piece_message() {
        let block = (0x00..0xFF).collect::<Vec<u8>>();
        let mut payload = [30u32, 100].map(u32::to_be_bytes).concat();
        payload.extend_from_slice(&block);
        let res = parse(&frame(7, &payload)).await;
        let expected_message = Message::Piece {
            index: 30,
            begin: 100,
            block,
        };
        assert!(res.is_ok_and(|message| message == expected_message));
    }

    #[tokio::test]
    async fn parse_cancel_message() {
        let payload = [30u32, 100, 200].map(u32::to_be_bytes).concat();
        let res = parse(&frame(8, &payload)).await;
        let expected_message = Message::Cancel {
            index: 30,
            begin: 100,
            length: 200,
        };
        assert!(res.is_ok_and(|message| message == expected_message));
    }

    #[tokio::test]
    async fn parse_unknown_message_id_as_other() {
        let res = parse(&frame(9, &[0x1A, 0xE1])).await;
        let expected_message = Message::Other {
            id: 9,
            payload: vec![0x1A, 0xE1],
        };
        assert!(res.is_ok_and(|message| message == expected_message));
    }

    #[tokio::test]
    async fn return_error_if_payload_length_is_invalid_for_id() {
        let res = parse(&frame(1, &[0; 8])).await;
        assert!(res.is_err_and(
            |e| e.to_string() == "protocol error: Invalid payload length 8 for message ID 1"
        ));
        let res = parse(&frame(7, &[0; 4])).await;
        assert!(res.is_err_and(|e| matches!(e, Error::Protocol(_))));
    }

    #[tokio::test]
    async fn return_error_if_message_too_long() {
        let res = parse(&u32::to_be_bytes(MAX_MESSAGE_LEN + 1)).await;
        assert!(res.is_err_and(|e| matches!(e, Error::Protocol(_))));
    }

    #[tokio::test]
    async fn return_network_error_if_connection_closes_mid_message() {
        let mut buf = u32::to_be_bytes(13).to_vec();
        buf.push(6);
        buf.extend_from_slice(&[0; 4]);
        let res = parse(&buf).await;
        assert!(res.is_err_and(|e| matches!(e, Error::Network(_))));
    }

    #[test]
    fn serialise_keep_alive_message() {
        assert_eq!(Message::KeepAlive.serialise(), u32::to_be_bytes(0).to_vec());
    }

    #[test]
    fn serialise_interested_message() {
        assert_eq!(Message::Interested.serialise(), vec![0, 0, 0, 1, 2]);
    }

    #[test]
    fn serialise_request_message() {
        let message = Message::Request {
            index: 1,
            begin: 16384,
            length: 16384,
        };
        assert_eq!(
            message.serialise(),
            vec![0, 0, 0, 13, 6, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x40, 0]
        );
    }

    #[test]
    fn serialise_piece_message() {
        let message = Message::Piece {
            index: 2,
            begin: 0,
            block: vec![0xAA, 0xBB],
        };
        assert_eq!(
            message.serialise(),
            vec![0, 0, 0, 11, 7, 0, 0, 0, 2, 0, 0, 0, 0, 0xAA, 0xBB]
        );
    }

    #[test]
    fn bitfield_has_piece_returns_true_if_has_piece() {
        // Bits 2 and 14 (interpreting in big-endian/network order) mean pieces 2 and 14 are
        // available
        let bitfield = Bitfield::new(vec![0b00100000, 0b00000010]);
        assert!(bitfield.has_piece(2));
        assert!(bitfield.has_piece(14));
        assert!(!bitfield.has_piece(3));
        assert!(!bitfield.has_piece(100));
    }

    #[test]
    fn bitfield_set_piece_sets_correct_bit_in_bitfield() {
        let mut bitfield = Bitfield::new(vec![0b10000000, 0x00]);
        bitfield.set_piece(3);
        assert_eq!(bitfield, Bitfield::new(vec![0b10010000, 0x00]));
        bitfield.set_piece(17);
        assert!(bitfield.has_piece(17));
    }
}
