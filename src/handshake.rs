use crate::{Error, Result, HANDSHAKE_BYTES_LEN, PSTR, SHA1_LEN};

const PROTOCOL_ID_LEN: u8 = 0x13;
const RESERVED_LEN: usize = 8;
const INFO_HASH_OFFSET: usize = 1 + PSTR.len() + RESERVED_LEN;
const PEER_ID_OFFSET: usize = INFO_HASH_OFFSET + SHA1_LEN;

/// BitTorrent handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Reserved extension bits, zero when we send
    pub reserved: [u8; RESERVED_LEN],
    /// SHA1 hash of bencoded `info` dict of file
    pub info_hash: [u8; SHA1_LEN],
    /// Identifier of peer
    pub peer_id: [u8; SHA1_LEN],
}

impl Handshake {
    pub fn new(info_hash: [u8; SHA1_LEN], peer_id: [u8; SHA1_LEN]) -> Handshake {
        Handshake {
            reserved: [0; RESERVED_LEN],
            info_hash,
            peer_id,
        }
    }

    /// Serialise handshake data
    pub fn serialise(&self) -> Vec<u8> {
        let mut output = Vec::with_capacity(HANDSHAKE_BYTES_LEN);
        output.push(PROTOCOL_ID_LEN);
        output.extend_from_slice(PSTR.as_bytes());
        output.extend_from_slice(&self.reserved);
        output.extend_from_slice(&self.info_hash);
        output.extend_from_slice(&self.peer_id);
        output
    }

    /// Deserialise the 68 bytes of a handshake received from a peer
    pub fn deserialise(data: &[u8; HANDSHAKE_BYTES_LEN]) -> Result<Handshake> {
        if data[0] != PROTOCOL_ID_LEN || &data[1..INFO_HASH_OFFSET - RESERVED_LEN] != PSTR.as_bytes()
        {
            return Err(Error::Handshake(format!(
                "unexpected protocol identifier: {}",
                String::from_utf8_lossy(&data[1..INFO_HASH_OFFSET - RESERVED_LEN])
            )));
        }
        let mut handshake = Handshake::new([0; SHA1_LEN], [0; SHA1_LEN]);
        handshake
            .reserved
            .copy_from_slice(&data[INFO_HASH_OFFSET - RESERVED_LEN..INFO_HASH_OFFSET]);
        handshake
            .info_hash
            .copy_from_slice(&data[INFO_HASH_OFFSET..PEER_ID_OFFSET]);
        handshake.peer_id.copy_from_slice(&data[PEER_ID_OFFSET..]);
        Ok(handshake)
    }
}
