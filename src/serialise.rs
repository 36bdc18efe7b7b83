use std::collections::HashMap;

use crate::BencodeType;

/// Serialise [`BencodeType`] to its canonical bencoded form
pub fn serialise(data: &BencodeType) -> Vec<u8> {
    let mut buf = Vec::new();
    serialise_into(data, &mut buf);
    buf
}

fn serialise_into(data: &BencodeType, buf: &mut Vec<u8>) {
    match data {
        BencodeType::Integer(int) => {
            buf.extend_from_slice(format!("i{}e", int).as_bytes());
        }
        BencodeType::ByteString(bytes) => serialise_byte_string(bytes, buf),
        BencodeType::List(items) => {
            buf.push(b'l');
            for item in items {
                serialise_into(item, buf);
            }
            buf.push(b'e');
        }
        BencodeType::Dict(dict) => {
            buf.push(b'd');
            for (key, value) in sorted_entries(dict) {
                serialise_byte_string(key, buf);
                serialise_into(value, buf);
            }
            buf.push(b'e');
        }
    }
}

fn serialise_byte_string(bytes: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(bytes.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(bytes);
}

/// Dict entries ordered by raw key bytes
///
/// The map's own iteration order is never relied upon; this is the only place
/// canonical key order is established.
pub fn sorted_entries(dict: &HashMap<Vec<u8>, BencodeType>) -> Vec<(&[u8], &BencodeType)> {
    let mut pairs = dict
        .iter()
        .map(|(key, value)| (key.as_slice(), value))
        .collect::<Vec<_>>();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialise_integer() {
        assert_eq!(serialise(&BencodeType::Integer(42)), b"i42e".to_vec());
        assert_eq!(serialise(&BencodeType::Integer(-42)), b"i-42e".to_vec());
    }

    #[test]
    fn serialise_byte_string() {
        let data = BencodeType::ByteString(b"hello".to_vec());
        assert_eq!(serialise(&data), b"5:hello".to_vec());
    }

    #[test]
    fn serialise_raw_bytes_unchanged() {
        let data = BencodeType::ByteString(vec![0xff, 0x00, 0x80]);
        assert_eq!(serialise(&data), vec![b'3', b':', 0xff, 0x00, 0x80]);
    }

    #[test]
    fn serialise_list() {
        let data = BencodeType::List(vec![
            BencodeType::Integer(42),
            BencodeType::ByteString(b"hello".to_vec()),
        ]);
        assert_eq!(serialise(&data), b"li42e5:helloe".to_vec());
    }

    #[test]
    fn serialise_dict_keys_in_sorted_order_regardless_of_insertion_order() {
        let mut map = HashMap::new();
        map.insert(b"b".to_vec(), BencodeType::Integer(2));
        map.insert(b"a".to_vec(), BencodeType::Integer(1));
        let data = BencodeType::Dict(map);
        assert_eq!(serialise(&data), b"d1:ai1e1:bi2ee".to_vec());
    }

    #[test]
    fn serialise_nested_dict() {
        let mut inner = HashMap::new();
        inner.insert(b"piece length".to_vec(), BencodeType::Integer(64));
        inner.insert(b"length".to_vec(), BencodeType::Integer(128));
        let mut outer = HashMap::new();
        outer.insert(b"info".to_vec(), BencodeType::Dict(inner));
        outer.insert(
            b"announce".to_vec(),
            BencodeType::ByteString(b"http://x".to_vec()),
        );
        let expected = b"d8:announce8:http://x4:infod6:lengthi128e12:piece lengthi64eee";
        assert_eq!(serialise(&BencodeType::Dict(outer)), expected.to_vec());
    }

    #[test]
    fn sorted_entries_compares_raw_bytes_not_text() {
        let mut map = HashMap::new();
        map.insert(vec![0xff], BencodeType::Integer(3));
        map.insert(b"Z".to_vec(), BencodeType::Integer(1));
        map.insert(b"a".to_vec(), BencodeType::Integer(2));
        map.insert(b"aa".to_vec(), BencodeType::Integer(4));
        let keys = sorted_entries(&map)
            .into_iter()
            .map(|(key, _)| key.to_vec())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![b"Z".to_vec(), b"a".to_vec(), b"aa".to_vec(), vec![0xff]]
        );
    }
}
