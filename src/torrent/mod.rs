//! Torrent metainfo parsing and error handling logic.
//!
//! This module provides types and error handling for working with single-file
//! `.torrent` metainfo, including parsing, validation and info-hash
//! computation. Bencode parsing/decoding errors are reused directly; the
//! rest of this module's variants are metainfo-specific.
use thiserror::Error;

pub mod info_hash;
pub mod metainfo;

pub use metainfo::{InfoDict, TorrentFile};

/// Errors from loading and validating a metainfo file. Every variant here is
/// startup-fatal: the torrent cannot be downloaded without a valid
/// descriptor, so these propagate all the way to the CLI.
#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("Invalid torrent file format: {0}")]
    InvalidFormat(String),

    #[error("Missing or invalid field: {0}")]
    MissingField(String),

    #[error("Invalid pieces hash length")]
    InvalidPiecesHashLength,

    #[error("Date parse error")]
    DateParseError,
}

/// Result type for torrent operations derived from `std::result`.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;
