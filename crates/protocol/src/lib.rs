//! Wire protocol for the chunkup resumable upload service.
//!
//! Every request, response and push event travels inside a [`Message`]
//! envelope. Chunk bytes travel as binary frames whose JSON header is an
//! [`messages::UploadChunkHeader`].

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use types::{ChunkReceipt, FileMetadata};
