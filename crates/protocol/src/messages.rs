use serde::{Deserialize, Serialize};

use crate::types::ChunkReceipt;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Opens a new upload on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub file_identity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

/// JSON header of a binary chunk frame.
///
/// The chunk bytes follow the header in the same frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkHeader {
    pub upload_identity: String,
    pub file_identity: String,
    pub chunk_id: u32,
    pub total_chunks: u32,
    /// SHA-256 hex checksum of the chunk bytes (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Asks the server to assemble all transferred chunks.
///
/// `receipts` must cover every chunk and be sorted by chunk id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub file_identity: String,
    pub upload_identity: String,
    pub receipts: Vec<ChunkReceipt>,
}

/// Subscribes to (or unsubscribes from) commit events of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSubscriptionRequest {
    pub upload_identity: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Result of [`InitiateRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub upload_identity: String,
}

/// Result of a chunk upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub part_tag: String,
}

/// Result of [`FinalizeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    /// Reference to the assembled artifact (URL, key, path).
    pub artifact: String,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

// ---------------------------------------------------------------------------
// Push events
// ---------------------------------------------------------------------------

/// The server durably wrote one chunk to its backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkCommittedEvent {
    pub upload_identity: String,
    pub chunk_id: u32,
}
