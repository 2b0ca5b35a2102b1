//! Single-file torrent metainfo structure and parsing logic.
//!
//! This module defines [`TorrentFile`] and the helpers that turn a decoded
//! bencode value into it. Multi-file torrents are out of scope: `info.length`
//! is required and `info.files` is never consulted.
use crate::bencode;
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::{TorrentError, TorrentResult};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
    /// Optional metadata, present only for diagnostics/progress display;
    /// absence of any of these is never an error.
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub creation_date: Option<SystemTime>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub name: String,
    pub length: i64,
}

/// Splits the concatenated SHA-1 hashes from the `pieces` field into
/// individual 20-byte digests, in piece-index order.
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}

fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    let dict = value
        .as_dict()
        .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".to_string()))?;

    let piece_length = dict
        .get(b"piece length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("piece length".to_string()))?;

    let pieces = dict
        .get(b"pieces".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("pieces".to_string()))?
        .to_vec();

    let name = dict
        .get(b"name".as_slice())
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("name".to_string()))
        .and_then(|s| {
            String::from_utf8(s.to_vec())
                .map_err(|e| TorrentError::InvalidFormat(format!("invalid name (not UTF-8): {e}")))
        })?;

    let length = dict
        .get(b"length".as_slice())
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("length".to_string()))?;

    if piece_length <= 0 || length <= 0 {
        return Err(TorrentError::InvalidFormat(
            "piece length and length must be positive".to_string(),
        ));
    }

    Ok(InfoDict {
        piece_length,
        pieces,
        name,
        length,
    })
}

fn bytes_field(dict: &std::collections::HashMap<Vec<u8>, BencodeValue>, key: &str) -> String {
    dict.get(key.as_bytes())
        .and_then(BencodeValue::as_str_bytes)
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .unwrap_or_default()
}

impl TorrentFile {
    /// Number of pieces, derived from the length of `pieces_hash`.
    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Total length of the torrent's single file, in bytes.
    pub fn total_length(&self) -> i64 {
        self.info.length
    }

    /// Size in bytes of the piece at `index`; 0 if out of range.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            self.total_length() - self.info.piece_length * (self.num_pieces() - 1) as i64
        }
    }

    /// Parses a decoded metainfo dictionary into a `TorrentFile`, computing
    /// the info-hash and splitting the piece-hash list.
    #[tracing::instrument(level = "debug", skip(data))]
    pub fn parse(data: BencodeValue) -> TorrentResult<TorrentFile> {
        let mut dict = match data {
            BencodeValue::Dict(d) => d,
            _ => return Err(TorrentError::InvalidFormat("root is not a dictionary".to_string())),
        };

        let announce_value = dict
            .remove(b"announce".as_slice())
            .ok_or_else(|| TorrentError::MissingField("announce".to_string()))?;
        let announce = match announce_value {
            BencodeValue::String(s) => String::from_utf8(s).map_err(|e| {
                TorrentError::InvalidFormat(format!("invalid announce URL (not UTF-8): {e}"))
            })?,
            _ => return Err(TorrentError::MissingField("announce (not a string)".to_string())),
        };

        let info_value = dict
            .remove(b"info".as_slice())
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;
        let info_dict_map = info_value
            .as_dict()
            .ok_or_else(|| TorrentError::InvalidFormat("info is not a dictionary".to_string()))?
            .clone();
        let info = parse_info_dict(&info_value)?;

        let creation_date = match dict.remove(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(ts)) => {
                let secs = u64::try_from(ts).map_err(|_| TorrentError::DateParseError)?;
                Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            }
            Some(_) => return Err(TorrentError::InvalidFormat("creation date not an integer".to_string())),
            None => None,
        };

        let comment = bytes_field(&dict, "comment");
        let created_by = bytes_field(&dict, "created by");
        let encoding = bytes_field(&dict, "encoding");

        let info_hash = info_hash::calculate_info_hash(&info_dict_map)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(TorrentFile {
            announce,
            info,
            info_hash,
            pieces_hash,
            comment,
            created_by,
            encoding,
            creation_date,
        })
    }

    /// Reads and parses a metainfo file from disk.
    pub fn load(path: impl AsRef<Path>) -> TorrentResult<TorrentFile> {
        let bytes = std::fs::read(path)?;
        let value = bencode::decode(&bytes)?;
        TorrentFile::parse(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn fixture_bytes(piece_length: i64, length: i64, num_pieces: usize) -> Vec<u8> {
        let mut info = HashMap::new();
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(piece_length));
        info.insert(b"name".to_vec(), BencodeValue::String(b"file.bin".to_vec()));
        info.insert(b"length".to_vec(), BencodeValue::Integer(length));
        info.insert(
            b"pieces".to_vec(),
            BencodeValue::String(vec![0u8; 20 * num_pieces]),
        );

        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://tracker.example/announce".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));

        bencode::encode(&BencodeValue::Dict(root)).unwrap()
    }

    #[test]
    fn parses_required_fields() {
        let bytes = fixture_bytes(16384, 17000, 2);
        let torrent = TorrentFile::parse(bencode::decode(&bytes).unwrap()).unwrap();
        assert_eq!(torrent.announce, "http://tracker.example/announce");
        assert_eq!(torrent.info.name, "file.bin");
        assert_eq!(torrent.num_pieces(), 2);
        assert_eq!(torrent.total_length(), 17000);
    }

    #[test]
    fn last_piece_size_is_the_remainder() {
        let bytes = fixture_bytes(16384, 17000, 2);
        let torrent = TorrentFile::parse(bencode::decode(&bytes).unwrap()).unwrap();
        assert_eq!(torrent.piece_size(0), 16384);
        assert_eq!(torrent.piece_size(1), 616);
    }

    #[test]
    fn missing_announce_is_invalid() {
        let mut info = HashMap::new();
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(16384));
        info.insert(b"name".to_vec(), BencodeValue::String(b"f".to_vec()));
        info.insert(b"length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0u8; 20]));
        let mut root = HashMap::new();
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = bencode::encode(&BencodeValue::Dict(root)).unwrap();

        assert!(TorrentFile::parse(bencode::decode(&bytes).unwrap()).is_err());
    }

    #[test]
    fn rejects_pieces_length_not_multiple_of_20() {
        let mut info = HashMap::new();
        info.insert(b"piece length".to_vec(), BencodeValue::Integer(16384));
        info.insert(b"name".to_vec(), BencodeValue::String(b"f".to_vec()));
        info.insert(b"length".to_vec(), BencodeValue::Integer(1));
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0u8; 19]));
        let mut root = HashMap::new();
        root.insert(
            b"announce".to_vec(),
            BencodeValue::String(b"http://x".to_vec()),
        );
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));
        let bytes = bencode::encode(&BencodeValue::Dict(root)).unwrap();

        assert!(matches!(
            TorrentFile::parse(bencode::decode(&bytes).unwrap()),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }
}
