use crate::metainfo::Metainfo;
use crate::tracker::Peer;

/// Metainfo of a file together with the peers the tracker reported for it
#[derive(Debug, Clone)]
pub struct Torrent {
    /// Metainfo file info
    pub metainfo: Metainfo,
    /// Peers associated with file
    pub peers: Vec<Peer>,
}

impl Torrent {
    pub fn new(metainfo: Metainfo, peers: Vec<Peer>) -> Torrent {
        Torrent { metainfo, peers }
    }

    /// SHA1 hash of `info` dict
    pub fn info_hash(&self) -> [u8; crate::SHA1_LEN] {
        self.metainfo.info_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_info_hash_on_torrent_instance() {
        let expected_info_hash =
            b"\x4a\xce\x56\xd9\xa0\x97\xed\xc1\x00\x57\xbb\x70\xf9\xd7\x98\xd5\x48\x44\xc8\xe9";
        let hello_sha1 =
            b"\xaa\xf4\xc6\x1d\xdc\xc5\xe8\xa2\xda\xbe\xde\x0f\x3b\x48\x2c\xd9\xae\xa9\x43\x4d";
        let goodbye_sha1 =
            b"\x3c\x8e\xc4\x87\x44\x88\xf6\x09\x0a\x15\x7b\x01\x4c\xe3\x39\x7c\xa8\xe0\x6d\x4f";
        let mut data = b"d8:announce5:hello4:infod6:lengthi128e4:name5:hello12:piece lengthi64e6:pieces40:"
            .to_vec();
        data.extend_from_slice(hello_sha1);
        data.extend_from_slice(goodbye_sha1);
        data.extend_from_slice(b"ee");
        let metainfo = Metainfo::from_bytes(&data).unwrap();

        let torrent = Torrent::new(metainfo, vec![]);
        assert_eq!(&torrent.info_hash(), expected_info_hash);
    }
}
