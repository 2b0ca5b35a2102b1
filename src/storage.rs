//! Output sink: the single pre-sized file the coordinator commits verified
//! pieces into. Opened once at startup, closed once at shutdown, per §3/§5.
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A single output file addressed by piece index. Pieces arrive whole and
/// already hash-verified, so each commit is a single seek + write + flush.
pub struct Storage {
    file: File,
    piece_length: u64,
}

impl Storage {
    /// Creates (or truncates) `path` and pre-allocates it to `total_length`
    /// bytes via seek-plus-single-byte-write.
    pub fn create(path: impl AsRef<Path>, total_length: u64, piece_length: u64) -> StorageResult<Self> {
        let mut file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        if total_length > 0 {
            file.seek(SeekFrom::Start(total_length - 1))?;
            file.write_all(&[0u8])?;
        }
        Ok(Self { file, piece_length })
    }

    /// Writes `data` at the byte offset `index * piece_length` and flushes.
    pub fn commit(&mut self, index: u32, data: &[u8]) -> StorageResult<()> {
        let offset = index as u64 * self.piece_length;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn preallocates_to_total_length() {
        let tmp = NamedTempFile::new().unwrap();
        let storage = Storage::create(tmp.path(), 100, 50).unwrap();
        drop(storage);
        assert_eq!(std::fs::metadata(tmp.path()).unwrap().len(), 100);
    }

    #[test]
    fn commit_writes_at_piece_offset() {
        let tmp = NamedTempFile::new().unwrap();
        let mut storage = Storage::create(tmp.path(), 20, 10).unwrap();
        storage.commit(1, &[9u8; 10]).unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(&bytes[0..10], &[0u8; 10]);
        assert_eq!(&bytes[10..20], &[9u8; 10]);
    }

    #[test]
    fn zero_length_file_is_not_written_to() {
        let tmp = NamedTempFile::new().unwrap();
        Storage::create(tmp.path(), 0, 10).unwrap();
        assert_eq!(std::fs::metadata(tmp.path()).unwrap().len(), 0);
    }
}
