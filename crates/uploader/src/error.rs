//! Upload error types.

use chunkup_protocol::FileMetadata;

/// Failure to deliver one chunk.
///
/// Non-fatal on its own: sibling chunks keep going, but the upload
/// cannot be finalized until the chunk is sent on a later attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("chunk {chunk_id}: {reason}")]
pub struct TransportError {
    pub chunk_id: u32,
    pub reason: String,
}

impl TransportError {
    pub fn new(chunk_id: u32, reason: impl Into<String>) -> Self {
        Self {
            chunk_id,
            reason: reason.into(),
        }
    }
}

/// Errors produced during an upload attempt.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// No session could be created. Nothing was transferred.
    #[error("initiate failed: {0}")]
    Initiate(String),

    /// The commit event stream could not be opened.
    #[error("commit channel error: {0}")]
    CommitChannel(String),

    /// The merge was rejected. Persisted state is kept for a retry.
    #[error("finalize failed: {0}")]
    Finalize(String),

    /// The selected file differs from the one the stored session belongs to.
    #[error(
        "{} does not match the interrupted upload of {} ({} bytes)",
        .selected.name,
        .stored.name,
        .stored.size
    )]
    ResumeMismatch {
        stored: Box<FileMetadata>,
        selected: Box<FileMetadata>,
    },

    #[error("{} of {total} chunks failed to transfer", .failed.len())]
    Incomplete { failed: Vec<u32>, total: u32 },

    #[error("missing receipts for chunks {0:?}")]
    MissingReceipts(Vec<u32>),

    /// Error reported by the server collaborator.
    #[error("server error: {0}")]
    Server(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkup_transfer::TransferError),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = UploadError::Incomplete {
            failed: vec![3, 10],
            total: 10,
        };
        assert_eq!(err.to_string(), "2 of 10 chunks failed to transfer");

        let err = TransportError::new(4, "connection reset");
        assert_eq!(err.to_string(), "chunk 4: connection reset");

        let err = UploadError::MissingReceipts(vec![2]);
        assert_eq!(err.to_string(), "missing receipts for chunks [2]");
    }

    #[test]
    fn mismatch_names_both_files() {
        let stored = FileMetadata {
            name: "a.bin".into(),
            size: 10,
            content_type: "application/octet-stream".into(),
            last_modified: 1,
        };
        let selected = FileMetadata {
            name: "b.bin".into(),
            ..stored.clone()
        };
        let err = UploadError::ResumeMismatch {
            stored: Box::new(stored),
            selected: Box::new(selected),
        };
        let msg = err.to_string();
        assert!(msg.contains("a.bin"));
        assert!(msg.contains("b.bin"));
    }
}
