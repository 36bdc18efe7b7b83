use crate::{BencodeType, Error, Result, SHA1_LEN};

const ANNOUNCE_KEY: &str = "announce";
const INFO_KEY: &str = "info";
const NAME_KEY: &str = "name";
const LENGTH_KEY: &str = "length";
const PIECE_LENGTH_KEY: &str = "piece length";
const PIECES_KEY: &str = "pieces";

/// Metainfo (`.torrent`) file
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// URL of the tracker
    pub announce: String,
    /// Parsed `info` dict
    pub info: Info,
    /// SHA1 hash of the bencoded `info` dict
    pub info_hash: [u8; SHA1_LEN],
}

impl Metainfo {
    /// Parse raw `.torrent` file contents
    pub fn from_bytes(data: &[u8]) -> Result<Metainfo> {
        Metainfo::new(crate::parse::parse(data)?)
    }

    pub fn new(data: BencodeType) -> Result<Metainfo> {
        let dict = match data {
            BencodeType::Dict(dict) => dict,
            _ => {
                return Err(Error::Validation(
                    "Invalid input, metainfo file must be a dict".to_string(),
                ))
            }
        };

        for key in [ANNOUNCE_KEY, INFO_KEY] {
            if !dict.contains_key(key.as_bytes()) {
                return Err(Error::Validation(format!(
                    "Invalid input, metainfo dict missing the following key: {}",
                    key
                )));
            }
        }

        let announce = match dict.get(ANNOUNCE_KEY.as_bytes()) {
            Some(BencodeType::ByteString(val)) => String::from_utf8(val.clone())
                .map_err(|_| Error::Validation("Invalid input, announce URL is not UTF-8".to_string()))?,
            _ => return Err(incorrect_type(ANNOUNCE_KEY)),
        };

        let raw_info = match dict.get(INFO_KEY.as_bytes()) {
            Some(val @ BencodeType::Dict(_)) => val,
            _ => return Err(incorrect_type(INFO_KEY)),
        };
        let info = Info::new(raw_info)?;

        Ok(Metainfo {
            announce,
            info,
            info_hash: info_hash(raw_info),
        })
    }
}

fn incorrect_type(key: &str) -> Error {
    Error::Validation(format!(
        "Invalid input, the following key's value has an incorrect type: {}",
        key
    ))
}

/// SHA1 hash of the canonically re-encoded `info` value
///
/// Hashes the decoded value itself, so keys this crate does not interpret are
/// still covered.
pub fn info_hash(info: &BencodeType) -> [u8; SHA1_LEN] {
    let bencoded_info = crate::serialise::serialise(info);
    sha1_smol::Sha1::from(bencoded_info).digest().bytes()
}

/// Split the concatenated `pieces` string into individual SHA1 hashes
pub fn split_piece_hashes(pieces: &[u8]) -> Result<Vec<[u8; SHA1_LEN]>> {
    if pieces.len() % SHA1_LEN != 0 {
        return Err(Error::Validation(format!(
            "Invalid info dict, pieces length {} is not a multiple of {}",
            pieces.len(),
            SHA1_LEN
        )));
    }
    Ok(pieces
        .chunks_exact(SHA1_LEN)
        .map(|chunk| {
            let mut hash = [0; SHA1_LEN];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

/// Info dict within metainfo file
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    /// Name of the file
    pub name: String,
    /// Length of the file in bytes
    pub length: u64,
    /// Length of a piece of the file in bytes
    pub piece_length: u32,
    /// SHA1 hash of each piece, in piece order
    pub piece_hashes: Vec<[u8; SHA1_LEN]>,
}

impl Info {
    pub fn new(data: &BencodeType) -> Result<Info> {
        let dict = data
            .as_dict()
            .ok_or_else(|| Error::Validation("Invalid info dict, must be a dict".to_string()))?;
        for key in [NAME_KEY, LENGTH_KEY, PIECE_LENGTH_KEY, PIECES_KEY] {
            if !dict.contains_key(key.as_bytes()) {
                return Err(Error::Validation(format!(
                    "Invalid info dict, the following key is missing: {}",
                    key
                )));
            }
        }

        let name = match data.get(NAME_KEY) {
            Some(BencodeType::ByteString(val)) => String::from_utf8_lossy(val).into_owned(),
            _ => return Err(incorrect_info_type(NAME_KEY)),
        };
        let length = match data.get(LENGTH_KEY) {
            Some(BencodeType::Integer(val)) if *val > 0 => *val as u64,
            _ => return Err(incorrect_info_type(LENGTH_KEY)),
        };
        let piece_length = match data.get(PIECE_LENGTH_KEY) {
            Some(BencodeType::Integer(val)) => {
                u32::try_from(*val).ok().filter(|len| *len > 0).ok_or_else(|| {
                    incorrect_info_type(PIECE_LENGTH_KEY)
                })?
            }
            _ => return Err(incorrect_info_type(PIECE_LENGTH_KEY)),
        };
        let piece_hashes = match data.get(PIECES_KEY) {
            Some(BencodeType::ByteString(val)) => split_piece_hashes(val)?,
            _ => return Err(incorrect_info_type(PIECES_KEY)),
        };

        let expected_pieces = length.div_ceil(piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(Error::Validation(format!(
                "Invalid info dict, length {} with piece length {} needs {} piece hashes, found {}",
                length,
                piece_length,
                expected_pieces,
                piece_hashes.len()
            )));
        }

        Ok(Info {
            name,
            length,
            piece_length,
            piece_hashes,
        })
    }

    /// Number of pieces in the file
    pub fn no_of_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Iterate over the SHA1 hashes of all pieces
    pub fn pieces(&self) -> impl Iterator<Item = &[u8; SHA1_LEN]> {
        self.piece_hashes.iter()
    }

    /// Get SHA1 hash of a single piece
    pub fn piece(&self, index: u32) -> Result<&[u8; SHA1_LEN]> {
        self.piece_hashes
            .get(index as usize)
            .ok_or_else(|| self.index_out_of_range(index))
    }

    /// Length of the piece at `index`; the last piece holds the remainder
    pub fn piece_len(&self, index: u32) -> Result<u32> {
        let count = self.no_of_pieces() as u64;
        let index = index as u64;
        if index >= count {
            return Err(self.index_out_of_range(index as u32));
        }
        if index == count - 1 {
            Ok((self.length - self.piece_length as u64 * (count - 1)) as u32)
        } else {
            Ok(self.piece_length)
        }
    }

    fn index_out_of_range(&self, index: u32) -> Error {
        Error::Validation(format!(
            "piece index {} out of range, file has {} pieces",
            index,
            self.no_of_pieces()
        ))
    }
}

fn incorrect_info_type(key: &str) -> Error {
    Error::Validation(format!(
        "Invalid info dict, the following key's value has an incorrect type: {}",
        key
    ))
}
