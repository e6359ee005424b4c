//! Durable-commit event listener.
//!
//! Commit events are best-effort telemetry. They drive the commit half of
//! the progress percentage and nothing else: whether a chunk can be skipped
//! on resume is decided by the resume store alone.

use std::sync::Arc;

use chunkup_transfer::ProgressHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::server::UploadServer;

/// Live subscription to an upload's commit events.
///
/// Close it with [`close`](Self::close) when the attempt ends. Dropping
/// it stops the listener task but cannot unsubscribe on the server.
pub struct CommitListener {
    server: Arc<dyn UploadServer>,
    upload_identity: String,
    task: Option<JoinHandle<u32>>,
    cancel: CancellationToken,
}

impl CommitListener {
    /// Subscribes to commit events for `upload_identity` and feeds them
    /// into `progress`.
    pub async fn subscribe(
        server: Arc<dyn UploadServer>,
        upload_identity: &str,
        progress: ProgressHandle,
    ) -> Result<Self, UploadError> {
        let mut rx = server
            .subscribe_commits(upload_identity)
            .await
            .map_err(|e| UploadError::CommitChannel(e.to_string()))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            let upload_identity = upload_identity.to_string();
            async move {
                let mut seen = 0u32;
                loop {
                    // Buffered events are applied before a close takes effect.
                    tokio::select! {
                        biased;
                        event = rx.recv() => match event {
                            Some(ev) if ev.upload_identity == upload_identity => {
                                debug!(chunk_id = ev.chunk_id, "chunk committed");
                                progress.commit(ev.chunk_id, 100.0);
                                seen += 1;
                            }
                            Some(ev) => {
                                debug!(upload = %ev.upload_identity, "ignoring commit for another upload");
                            }
                            None => {
                                warn!(
                                    upload = %upload_identity,
                                    "commit channel closed, commit progress will stall"
                                );
                                break;
                            }
                        },
                        _ = cancel.cancelled() => break,
                    }
                }
                seen
            }
        });

        debug!(upload = %upload_identity, "subscribed to commit events");
        Ok(Self {
            server,
            upload_identity: upload_identity.to_string(),
            task: Some(task),
            cancel,
        })
    }

    /// Stops listening and unsubscribes on the server.
    ///
    /// Returns the number of commit events applied.
    pub async fn close(mut self) -> u32 {
        self.cancel.cancel();
        let seen = match self.task.take() {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        };
        if let Err(e) = self.server.unsubscribe_commits(&self.upload_identity).await {
            warn!(upload = %self.upload_identity, error = %e, "failed to unsubscribe from commit events");
        }
        debug!(upload = %self.upload_identity, commits = seen, "commit listener closed");
        seen
    }
}

impl Drop for CommitListener {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
