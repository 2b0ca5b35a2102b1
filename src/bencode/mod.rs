//! A small, self-contained bencode codec.
//!
//! Bencode is the serialization format used by both metainfo files and
//! tracker responses: four value kinds — byte strings, integers, lists and
//! dictionaries. This module owns encode/decode for all four; every other
//! module that touches bencoded bytes (the metainfo adapter, the info-hash
//! calculation) goes through [`decode`] / [`encode`] rather than re-deriving
//! its own parsing.

use std::collections::HashMap;
use std::io::Read;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
///
/// 1. `String(Vec<u8>)` — a bencode byte string, e.g. `"4:spam"` → `String(b"spam")`.
/// 2. `Integer(i64)` — e.g. `"i42e"` → `Integer(42)`.
/// 3. `List(Vec<BencodeValue>)` — e.g. `"l4:spami42ee"` → `List([String(b"spam"), Integer(42)])`.
/// 4. `Dict(HashMap<Vec<u8>, BencodeValue>)` — e.g. `"d3:foo3:bare"` → `Dict({b"foo" => String(b"bar")})`.
#[derive(Debug, PartialEq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(HashMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_dict(&self) -> Option<&HashMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_str_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }
}

/// Custom error type for Bencode operations.
#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid bencode format:{0}")]
    InvalidFormat(String),

    #[error("Invalid integer format")]
    InvalidInteger,

    #[error("Invalid String length")]
    InvalidStringLength,

    #[error("Unexpected end of input")]
    UnexpectedEOI,

    #[error("Cannot encode type")]
    CannotEncodeType(&'static str),

    #[error("Dictionary keys must be strings")]
    DictKeyNotString,

    #[error("Trailing bytes after a complete bencode value")]
    TrailingBytes,
}

pub type BencodeResult<T> = std::result::Result<T, BencodeError>;

/// Decodes exactly one bencode value from `bytes`, erroring on trailing data.
pub fn decode(bytes: &[u8]) -> BencodeResult<BencodeValue> {
    let mut reader = bytes.bytes().peekable();
    let value = decoder::decode_value(&mut reader)?;
    if reader.next().is_some() {
        return Err(BencodeError::TrailingBytes);
    }
    Ok(value)
}

/// Encodes a value into its canonical bencode representation.
///
/// Dictionary keys are always written in sorted byte order, so encoding is
/// stable regardless of the input `HashMap`'s iteration order — this is what
/// makes the info-hash computation reproducible.
pub fn encode(value: &BencodeValue) -> BencodeResult<Vec<u8>> {
    let mut buffer = Vec::new();
    encoder::encode(&mut buffer, value)?;
    Ok(buffer)
}
