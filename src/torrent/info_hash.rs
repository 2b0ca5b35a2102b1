use crate::bencode;
use crate::bencode::BencodeValue;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

use super::TorrentResult;

/// Calculates the SHA-1 hash of a bencode-encoded info dictionary.
///
/// The info-hash is the SHA-1 of the *exact* canonical bencoding of the
/// `info` dict — not of any re-serialization a different encoder might
/// produce. Since [`bencode::encode`] always sorts dictionary keys, encoding
/// the already-decoded dict reproduces the bytes the remote tracker and
/// peers expect, as required by BEP 3.
pub fn calculate_info_hash(info_dict: &HashMap<Vec<u8>, BencodeValue>) -> TorrentResult<[u8; 20]> {
    let buffer = bencode::encode(&BencodeValue::Dict(info_dict.clone()))?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let result = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&result[..]);
    Ok(info_hash)
}
