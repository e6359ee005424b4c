use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window (no
/// pong, no response, no commit event) the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send keepalive pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum message size in bytes (50 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Payload bytes per WebSocket frame when a chunk is written as a
/// fragmented binary message. Progress is reported once per fragment.
pub const WS_FRAGMENT_SIZE: usize = 64 * 1024;

/// Timeout for request/response operations (text messages).
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for binary request/response operations (chunk uploads).
///
/// Chunk uploads may take much longer than text requests on slow links.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "initiate")]
    Initiate,
    #[serde(rename = "upload_chunk")]
    UploadChunk,
    #[serde(rename = "finalize")]
    Finalize,
    #[serde(rename = "subscribe_commits")]
    SubscribeCommits,
    #[serde(rename = "unsubscribe_commits")]
    UnsubscribeCommits,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "initiate_response")]
    InitiateResponse,
    #[serde(rename = "chunk_receipt")]
    ChunkReceipt,
    #[serde(rename = "finalize_response")]
    FinalizeResponse,
    #[serde(rename = "operation_result")]
    OperationResult,
    #[serde(rename = "error")]
    Error,

    // Events from server to client (push notifications)
    #[serde(rename = "chunk_committed")]
    ChunkCommitted,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}
