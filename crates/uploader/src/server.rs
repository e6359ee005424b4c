//! Server collaborator trait.
//!
//! `UploadServer` is implemented by the application on top of its
//! transport (the CLI binds it to the WebSocket client). Keeping it a
//! trait keeps the upload flow testable with mocks.

use std::future::Future;
use std::pin::Pin;

use chunkup_protocol::messages::{
    ChunkCommittedEvent, FinalizeRequest, FinalizeResponse, InitiateRequest, InitiateResponse,
    UploadChunkHeader, UploadChunkResponse,
};
use tokio::sync::mpsc;

use crate::error::UploadError;

/// Boxed future returned by [`UploadServer`] operations.
pub type ServerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Receives transfer progress of one chunk, in percent.
pub type TransferProgress = dyn Fn(f64) + Send + Sync;

/// Abstract connection to the upload server.
pub trait UploadServer: Send + Sync {
    /// Opens a server-side upload and returns its upload identity.
    fn initiate<'a>(&'a self, req: &'a InitiateRequest) -> ServerFuture<'a, InitiateResponse>;

    /// Sends one chunk. Idempotent per chunk id.
    ///
    /// Implementations report transfer progress through `on_progress`.
    fn upload_chunk<'a>(
        &'a self,
        header: &'a UploadChunkHeader,
        data: &'a [u8],
        on_progress: &'a TransferProgress,
    ) -> ServerFuture<'a, UploadChunkResponse>;

    /// Assembles the uploaded chunks into the final artifact.
    fn finalize<'a>(&'a self, req: &'a FinalizeRequest) -> ServerFuture<'a, FinalizeResponse>;

    /// Opens the best-effort stream of durable-commit events for an upload.
    fn subscribe_commits<'a>(
        &'a self,
        upload_identity: &'a str,
    ) -> ServerFuture<'a, mpsc::Receiver<ChunkCommittedEvent>>;

    /// Closes a stream opened by [`subscribe_commits`](Self::subscribe_commits).
    fn unsubscribe_commits<'a>(&'a self, upload_identity: &'a str) -> ServerFuture<'a, ()>;
}
