use super::BencodeError;
use super::BencodeResult;
use super::BencodeValue;
use std::collections::HashMap;
use std::io::Write;
use tracing::instrument;

#[instrument(skip(writer, s), level = "trace")]
fn encode_string<W: Write>(writer: &mut W, s: &[u8]) -> BencodeResult<()> {
    write!(writer, "{}:", s.len())?;
    writer.write_all(s)?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_integer<W: Write>(writer: &mut W, i: i64) -> BencodeResult<()> {
    write!(writer, "i{}e", i)?;
    Ok(())
}

#[instrument(skip(writer, list), level = "trace")]
fn encode_list<W: Write>(writer: &mut W, list: &[BencodeValue]) -> BencodeResult<()> {
    writer.write_all(b"l")?;
    for item in list {
        encode_value(writer, item)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

/// Dictionary keys are sorted in raw-byte order before encoding. This is what
/// makes bencode a *canonical* encoding: the same logical dict always
/// produces the same bytes regardless of `HashMap` iteration order, which is
/// what the info-hash computation depends on.
#[instrument(skip(writer, dict), level = "trace")]
fn encode_dict<W: Write>(writer: &mut W, dict: &HashMap<Vec<u8>, BencodeValue>) -> BencodeResult<()> {
    writer.write_all(b"d")?;
    let mut keys: Vec<&Vec<u8>> = dict.keys().collect();
    keys.sort_unstable();
    for key in keys {
        encode_string(writer, key)?;
        let value = dict
            .get(key)
            .ok_or_else(|| BencodeError::InvalidFormat("Missing dict value for key".to_string()))?;
        encode_value(writer, value)?;
    }
    writer.write_all(b"e")?;
    Ok(())
}

#[instrument(skip(writer), level = "trace")]
fn encode_value<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    match value {
        BencodeValue::String(s) => encode_string(writer, s),
        BencodeValue::Integer(i) => encode_integer(writer, *i),
        BencodeValue::List(list) => encode_list(writer, list),
        BencodeValue::Dict(dict) => encode_dict(writer, dict),
    }
}

#[instrument(skip(writer), level = "debug")]
pub fn encode<W: Write>(writer: &mut W, value: &BencodeValue) -> BencodeResult<()> {
    encode_value(writer, value)
}

#[cfg(test)]
mod tests {
    use super::super::{decode, BencodeValue};
    use super::*;

    fn enc(v: &BencodeValue) -> Vec<u8> {
        let mut buf = Vec::new();
        encode(&mut buf, v).unwrap();
        buf
    }

    #[test]
    fn encodes_string() {
        assert_eq!(enc(&BencodeValue::String(b"spam".to_vec())), b"4:spam");
    }

    #[test]
    fn encodes_integer() {
        assert_eq!(enc(&BencodeValue::Integer(42)), b"i42e");
        assert_eq!(enc(&BencodeValue::Integer(-7)), b"i-7e");
    }

    #[test]
    fn encodes_list() {
        let list = BencodeValue::List(vec![
            BencodeValue::String(b"spam".to_vec()),
            BencodeValue::Integer(42),
        ]);
        assert_eq!(enc(&list), b"l4:spami42ee");
    }

    #[test]
    fn encodes_dict_with_sorted_keys_regardless_of_insertion_order() {
        let mut dict = HashMap::new();
        dict.insert(b"zebra".to_vec(), BencodeValue::Integer(1));
        dict.insert(b"apple".to_vec(), BencodeValue::Integer(2));
        let bytes = enc(&BencodeValue::Dict(dict));
        assert_eq!(bytes, b"d5:applei2e5:zebrai1ee");
    }

    #[test]
    fn round_trips_through_decode() {
        let mut dict = HashMap::new();
        dict.insert(b"foo".to_vec(), BencodeValue::String(b"bar".to_vec()));
        dict.insert(
            b"list".to_vec(),
            BencodeValue::List(vec![BencodeValue::Integer(1), BencodeValue::Integer(2)]),
        );
        let value = BencodeValue::Dict(dict);
        let bytes = enc(&value);
        assert_eq!(decode(&bytes).unwrap(), value);
    }
}
