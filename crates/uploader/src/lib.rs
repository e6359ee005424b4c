//! Resumable chunked upload flow.
//!
//! This crate holds the upload logic and nothing about the wire: the
//! application supplies an [`UploadServer`] implementation that talks
//! to the actual server.
//!
//! # Pipeline
//!
//! 1. **Session**: resume a matching interrupted upload or initiate a new one
//! 2. **Plan**: split the file into fixed-size chunks
//! 3. **Transport**: send missing chunks through a bounded worker pool
//! 4. **Commit**: track server-side durable commits as they are pushed
//! 5. **Merge**: submit the ordered receipts and clear local state

pub mod commit;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod mock;

// Re-export primary types for convenience.
pub use commit::CommitListener;
pub use error::{TransportError, UploadError};
pub use merge::MergeCoordinator;
pub use orchestrator::UploadOrchestrator;
pub use server::{ServerFuture, TransferProgress, UploadServer};
pub use session::{AlwaysResume, ResumeConfirm, SessionManager, SessionStart};
pub use transport::{ChunkTransporter, TransportReport};
pub use types::{MismatchPolicy, UploadConfig, UploadEvent, UploadOutcome};
