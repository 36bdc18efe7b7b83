pub mod client;
pub mod config;
pub mod download;
pub mod error;
pub mod handshake;
pub mod init;
pub mod message;
pub mod metainfo;
pub mod parse;
pub mod piece;
pub mod serialise;
pub mod torrent;
pub mod tracker;
pub mod work;
pub mod worker;

use std::collections::HashMap;

pub use config::Config;
pub use error::{Error, Result};

/// Protocol identifier sent in the handshake
pub const PSTR: &str = "BitTorrent protocol";
/// Length of a handshake on the wire
pub const HANDSHAKE_BYTES_LEN: usize = 68;
/// Length of a SHA1 digest (info hash, piece hash, peer ID)
pub const SHA1_LEN: usize = 20;

/// Decoded bencode value
///
/// Dictionaries are stored in an unordered map; canonical key order is only
/// established when serialising (see [`serialise::sorted_entries`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeType {
    Integer(i64),
    ByteString(Vec<u8>),
    List(Vec<BencodeType>),
    Dict(HashMap<Vec<u8>, BencodeType>),
}

impl BencodeType {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeType::Integer(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeType::ByteString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeType]> {
        match self {
            BencodeType::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeType>> {
        match self {
            BencodeType::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    /// Look up a key if this value is a dict
    pub fn get(&self, key: &str) -> Option<&BencodeType> {
        self.as_dict().and_then(|dict| dict.get(key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_only_match_their_own_variant() {
        let int = BencodeType::Integer(7);
        assert_eq!(int.as_integer(), Some(7));
        assert_eq!(int.as_bytes(), None);

        let string = BencodeType::ByteString(b"abc".to_vec());
        assert_eq!(string.as_bytes(), Some(&b"abc"[..]));
        assert!(string.as_list().is_none());

        let mut map = HashMap::new();
        map.insert(b"key".to_vec(), BencodeType::Integer(1));
        let dict = BencodeType::Dict(map);
        assert_eq!(dict.get("key"), Some(&BencodeType::Integer(1)));
        assert_eq!(dict.get("missing"), None);
        assert_eq!(int.get("key"), None);
    }
}
