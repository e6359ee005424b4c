//! Chunk planning, chunk reading, resume state and progress tracking.
//!
//! Everything here is independent of the network: the uploader crate
//! combines these pieces with an `UploadServer` implementation.

mod chunked;
mod plan;
mod progress;
mod store;
mod types;

pub use chunked::{ChunkReader, checksum_bytes};
pub use plan::{plan_chunks, total_chunks};
pub use progress::{
    ProgressAggregator, ProgressHandle, ProgressSnapshot, ProgressUpdate, TransferRate,
    spawn_progress_tracker,
};
pub use store::{CommittedSet, ResumeState, ResumeStore};
pub use types::{ChunkDescriptor, SourceFile, UploadSession};

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("{file_size} bytes in chunks of {chunk_size} needs more than {} chunks", u32::MAX)]
    TooManyChunks { file_size: u64, chunk_size: u64 },

    #[error("file changed on disk: expected {expected} bytes, found {actual}")]
    FileChanged { expected: u64, actual: u64 },

    #[error("chunk {chunk_id} is outside the file ({end} > {file_size})")]
    ChunkOutOfRange {
        chunk_id: u32,
        end: u64,
        file_size: u64,
    },
}
