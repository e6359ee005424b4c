use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chunkup_protocol::FileMetadata;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// One contiguous byte range of the source file.
///
/// Derived from file size and chunk size; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// 1-based, contiguous chunk number.
    pub chunk_id: u32,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (exclusive).
    pub end: u64,
    pub total_chunks: u32,
}

impl ChunkDescriptor {
    /// Length of the chunk in bytes (0 only for the single chunk of an empty file).
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` for a zero-length chunk.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Byte range as a `Range`.
    pub fn range(&self) -> Range<u64> {
        self.start..self.end
    }

    /// Returns `true` if this is the final chunk of the plan.
    pub fn is_last(&self) -> bool {
        self.chunk_id == self.total_chunks
    }
}

/// Identities and geometry of one logical file upload.
///
/// Both identities are immutable once created and are persisted before
/// any chunk is transferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Client-generated token identifying the file across resumes.
    pub file_identity: String,
    /// Server-issued token correlating chunk operations and the merge.
    pub upload_identity: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// A file selected for upload, with the metadata used to validate resumes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub metadata: FileMetadata,
}

impl SourceFile {
    /// Stats `path` and derives its [`FileMetadata`].
    ///
    /// The content type is guessed from the extension and falls back to
    /// `application/octet-stream`.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let meta = std::fs::metadata(path)?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            metadata: FileMetadata {
                name,
                size: meta.len(),
                content_type,
                last_modified,
            },
        })
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.metadata.size
    }
}
