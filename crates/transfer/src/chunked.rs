use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::types::ChunkDescriptor;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Reads planned chunks out of a source file.
///
/// Each read opens its own handle, so one reader can serve several
/// concurrent transports. Reads fail with [`TransferError::FileChanged`]
/// if the file no longer has the size the plan was built from.
#[derive(Debug, Clone)]
pub struct ChunkReader {
    path: PathBuf,
    file_size: u64,
}

impl ChunkReader {
    /// Creates a reader for `path`, expected to be `file_size` bytes long.
    pub fn new(path: &Path, file_size: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            file_size,
        }
    }

    /// Reads the bytes of `chunk`.
    pub fn read(&self, chunk: &ChunkDescriptor) -> Result<Vec<u8>, TransferError> {
        if chunk.end > self.file_size {
            return Err(TransferError::ChunkOutOfRange {
                chunk_id: chunk.chunk_id,
                end: chunk.end,
                file_size: self.file_size,
            });
        }

        let mut file = std::fs::File::open(&self.path)?;
        let actual = file.metadata()?.len();
        if actual != self.file_size {
            return Err(TransferError::FileChanged {
                expected: self.file_size,
                actual,
            });
        }

        let mut buf = vec![0u8; chunk.len() as usize];
        if !buf.is_empty() {
            file.seek(SeekFrom::Start(chunk.start))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    /// Total file size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
