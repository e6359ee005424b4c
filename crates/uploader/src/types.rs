//! Data types for the upload flow.

use std::time::Duration;

use chunkup_transfer::DEFAULT_CHUNK_SIZE;

/// What to do when the selected file does not match the stored session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Discard the stored session and start a fresh one.
    #[default]
    Discard,
    /// Fail with [`UploadError::ResumeMismatch`](crate::UploadError::ResumeMismatch)
    /// and leave the stored session untouched.
    Strict,
}

/// Tunables for one upload attempt.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Chunk size for fresh sessions. Resumed sessions keep their own.
    pub chunk_size: u64,
    /// Maximum number of chunks in flight.
    pub concurrency: usize,
    /// Minimum spacing between [`UploadEvent::Progress`] events.
    pub progress_interval: Duration,
    pub on_mismatch: MismatchPolicy,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: 4,
            progress_interval: Duration::from_millis(250),
            on_mismatch: MismatchPolicy::Discard,
        }
    }
}

/// Event emitted during an upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// A session is ready and chunk transfer is about to begin.
    Started {
        resumed: bool,
        total_chunks: u32,
        /// Chunks already committed by a previous attempt.
        skipped: u32,
    },
    /// Two-phase progress update.
    Progress {
        overall: f64,
        transferred: u32,
        committed: u32,
        transferred_bytes: u64,
        total_bytes: u64,
    },
    /// One chunk could not be delivered in this attempt.
    ChunkFailed { chunk_id: u32, error: String },
    /// The server assembled the final artifact.
    Completed { artifact: String },
    /// The attempt ended without an artifact.
    Failed { error: String },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub artifact: String,
    pub file_identity: String,
    pub upload_identity: String,
    pub resumed: bool,
    pub total_chunks: u32,
    /// Chunks sent during this attempt.
    pub sent: u32,
    /// Chunks reused from a previous attempt.
    pub skipped: u32,
}
