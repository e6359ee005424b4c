//! Upload orchestrator.
//!
//! Runs one upload attempt end to end: session, chunk plan, concurrent
//! transport, commit tracking and merge. Progress and lifecycle events
//! are published on a channel, and the attempt can be cancelled.

use std::sync::Arc;
use std::time::Duration;

use chunkup_transfer::{
    ChunkReader, ProgressAggregator, ProgressSnapshot, ResumeStore, SourceFile, plan_chunks,
    spawn_progress_tracker,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commit::CommitListener;
use crate::error::UploadError;
use crate::merge::MergeCoordinator;
use crate::server::UploadServer;
use crate::session::{ResumeConfirm, SessionManager, SessionStart};
use crate::transport::ChunkTransporter;
use crate::types::{UploadConfig, UploadEvent, UploadOutcome};

/// Orchestrates resumable uploads against one server.
pub struct UploadOrchestrator {
    server: Arc<dyn UploadServer>,
    store: Arc<ResumeStore>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(server: Arc<dyn UploadServer>, store: Arc<ResumeStore>, config: UploadConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            server,
            store,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns a cancellation token for this orchestrator's uploads.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `file`, resuming a matching interrupted upload if `confirm` agrees.
    ///
    /// On failure the resume state is left in place, so a later call with
    /// the same file sends only the chunks that are still missing.
    pub async fn run(
        &self,
        file: &SourceFile,
        confirm: &dyn ResumeConfirm,
    ) -> Result<UploadOutcome, UploadError> {
        match self.attempt(file, confirm).await {
            Ok(outcome) => {
                self.emit_final(UploadEvent::Completed {
                    artifact: outcome.artifact.clone(),
                })
                .await;
                info!(
                    file = %file.metadata.name,
                    artifact = %outcome.artifact,
                    sent = outcome.sent,
                    skipped = outcome.skipped,
                    "upload completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.emit_final(UploadEvent::Failed {
                    error: e.to_string(),
                })
                .await;
                error!(file = %file.metadata.name, error = %e, "upload failed");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        file: &SourceFile,
        confirm: &dyn ResumeConfirm,
    ) -> Result<UploadOutcome, UploadError> {
        self.check_cancelled()?;

        let SessionStart { session, resumed } =
            SessionManager::new(self.server.clone(), self.store.clone(), self.config.chunk_size)
                .with_mismatch_policy(self.config.on_mismatch)
                .start(file, confirm)
                .await?;

        let chunks = plan_chunks(file.size(), session.chunk_size)?;
        let committed = self.store.committed();
        let skipped = chunks
            .iter()
            .filter(|c| committed.contains_key(&c.chunk_id))
            .count() as u32;
        self.emit(UploadEvent::Started {
            resumed,
            total_chunks: session.total_chunks,
            skipped,
        });

        let mut aggregator = ProgressAggregator::new(&chunks);
        aggregator.seed_committed(committed.keys().copied());
        let (progress, snapshots, tracker) = spawn_progress_tracker(aggregator);
        let forwarder = tokio::spawn(forward_progress(
            snapshots,
            self.events_tx.clone(),
            self.config.progress_interval,
            self.is_observed(),
        ));

        let listener = match CommitListener::subscribe(
            self.server.clone(),
            &session.upload_identity,
            progress.clone(),
        )
        .await
        {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!(error = %e, "continuing without commit events");
                None
            }
        };

        let reader = ChunkReader::new(&file.path, file.size());
        let report = ChunkTransporter::new(
            self.server.clone(),
            self.store.clone(),
            progress.clone(),
            self.cancel.clone(),
        )
        .transport_all(chunks, &session, &reader, self.config.concurrency)
        .await;
        let sent = report.sent;

        for failure in &report.failed {
            self.emit(UploadEvent::ChunkFailed {
                chunk_id: failure.chunk_id,
                error: failure.reason.clone(),
            });
        }

        let result = if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else if !report.is_complete() {
            Err(UploadError::Incomplete {
                failed: report.failed.iter().map(|f| f.chunk_id).collect(),
                total: session.total_chunks,
            })
        } else {
            MergeCoordinator::new(self.server.clone(), self.store.clone())
                .finalize(&session, report.receipts.into_values())
                .await
        };

        // Tear down in order: the listener and the last handle release the
        // tracker, and the tracker's exit ends the forwarder.
        if let Some(listener) = listener {
            listener.close().await;
        }
        drop(progress);
        if let Err(e) = tracker.await {
            error!(error = %e, "progress tracker panicked");
        }
        let _ = forwarder.await;

        let resp = result?;
        Ok(UploadOutcome {
            artifact: resp.artifact,
            file_identity: session.file_identity,
            upload_identity: session.upload_identity,
            resumed,
            total_chunks: session.total_chunks,
            sent,
            skipped,
        })
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Whether someone took the event receiver.
    fn is_observed(&self) -> bool {
        self.events_rx.is_none()
    }

    /// Publishes an event without waiting. Events are dropped while the
    /// channel is full.
    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!(error = %e, "upload event dropped");
        }
    }

    /// Publishes an event that ends an attempt. Waits for room when the
    /// receiver was taken; otherwise nobody reads and waiting could block.
    async fn emit_final(&self, event: UploadEvent) {
        if !self.is_observed() {
            self.emit(event);
        } else if self.events_tx.send(event).await.is_err() {
            debug!("event receiver gone");
        }
    }
}

fn progress_event(snap: &ProgressSnapshot) -> UploadEvent {
    UploadEvent::Progress {
        overall: snap.overall,
        transferred: snap.transferred_chunks,
        committed: snap.committed_chunks,
        transferred_bytes: snap.transferred_bytes,
        total_bytes: snap.total_bytes,
    }
}

/// Relays progress snapshots as events, at most one per `interval`.
///
/// Intermediate snapshots are dropped while the channel is full. The final
/// snapshot is always sent, even if it lands inside an interval, and when
/// `observed` it waits for room.
async fn forward_progress(
    mut snapshots: watch::Receiver<ProgressSnapshot>,
    events_tx: mpsc::Sender<UploadEvent>,
    interval: Duration,
    observed: bool,
) {
    let mut last_sent = snapshots.borrow_and_update().clone();
    let mut delivered = events_tx.try_send(progress_event(&last_sent)).is_ok();

    while snapshots.changed().await.is_ok() {
        let snap = snapshots.borrow_and_update().clone();
        delivered = events_tx.try_send(progress_event(&snap)).is_ok();
        last_sent = snap;
        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    let last = snapshots.borrow().clone();
    if delivered && last == last_sent {
        return;
    }
    if observed {
        let _ = events_tx.send(progress_event(&last)).await;
    } else {
        let _ = events_tx.try_send(progress_event(&last));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use crate::session::AlwaysResume;
    use crate::types::MismatchPolicy;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn config(chunk_size: u64) -> UploadConfig {
        UploadConfig {
            chunk_size,
            concurrency: 4,
            progress_interval: Duration::ZERO,
            on_mismatch: MismatchPolicy::Discard,
        }
    }

    fn write_file(dir: &Path, len: usize) -> SourceFile {
        let path = dir.join("video.mp4");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, data).unwrap();
        SourceFile::open(&path).unwrap()
    }

    fn open_store(dir: &Path) -> Arc<ResumeStore> {
        Arc::new(ResumeStore::open(dir.join("state.json")).unwrap())
    }

    async fn drain(mut rx: mpsc::Receiver<UploadEvent>) -> Vec<UploadEvent> {
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        events
    }

    #[tokio::test]
    async fn fresh_upload_completes() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let store = open_store(dir.path());
        let server = Arc::new(MockServer::committing());

        let mut orch = UploadOrchestrator::new(server.clone(), store.clone(), config(4));
        let events_rx = orch.take_events().unwrap();

        let outcome = orch.run(&file, &AlwaysResume).await.unwrap();
        assert!(!outcome.resumed);
        assert_eq!(outcome.total_chunks, 3);
        assert_eq!(outcome.sent, 3);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.artifact, format!("artifacts/{}", outcome.file_identity));

        assert_eq!(server.initiate_count(), 1);
        assert_eq!(server.finalize_requests().len(), 1);
        assert!(store.session().is_none());

        drop(orch);
        let events = drain(events_rx).await;
        assert_eq!(
            events[0],
            UploadEvent::Started {
                resumed: false,
                total_chunks: 3,
                skipped: 0
            }
        );
        assert!(matches!(events.last(), Some(UploadEvent::Completed { .. })));

        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                UploadEvent::Progress {
                    overall, committed, ..
                } => Some((*overall, *committed)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress, (100.0, 3));
    }

    #[tokio::test]
    async fn interrupted_upload_resends_only_missing_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10_000_000);

        // First attempt: connectivity is lost before chunk 10 lands.
        let first = Arc::new(MockServer::new());
        first.fail_chunk(10);
        let orch = UploadOrchestrator::new(first.clone(), open_store(dir.path()), config(1_048_576));
        let result = orch.run(&file, &AlwaysResume).await;

        match result {
            Err(UploadError::Incomplete { failed, total }) => {
                assert_eq!(failed, vec![10]);
                assert_eq!(total, 10);
            }
            other => panic!("expected incomplete upload, got {other:?}"),
        }
        assert_eq!(first.uploaded().len(), 10);
        assert!(first.finalize_requests().is_empty());

        // Reload: fresh store handle from disk, same file selected.
        let second = Arc::new(MockServer::new());
        let store = open_store(dir.path());
        assert_eq!(store.committed().len(), 9);
        let orch = UploadOrchestrator::new(second.clone(), store.clone(), config(1_048_576));
        let outcome = orch.run(&file, &AlwaysResume).await.unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.skipped, 9);
        assert_eq!(outcome.sent, 1);
        assert_eq!(second.uploaded(), vec![10]);
        assert_eq!(second.initiate_count(), 0);

        let reqs = second.finalize_requests();
        let ids: Vec<u32> = reqs[0].receipts.iter().map(|r| r.chunk_id).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
        assert!(reqs[0].receipts.iter().all(|r| !r.part_tag.is_empty()));
        assert!(store.session().is_none());
    }

    #[tokio::test]
    async fn changed_file_starts_over() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path());
        let server = Arc::new(MockServer::new());
        server.fail_chunk(3);

        let file = write_file(dir.path(), 12);
        let orch = UploadOrchestrator::new(server.clone(), store.clone(), config(4));
        assert!(orch.run(&file, &AlwaysResume).await.is_err());
        assert_eq!(store.committed().len(), 2);

        server.heal_chunks();
        let changed = write_file(dir.path(), 9);
        let outcome = orch.run(&changed, &AlwaysResume).await.unwrap();

        assert!(!outcome.resumed);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.sent, 3);
        assert_eq!(server.initiate_count(), 2);
    }

    #[tokio::test]
    async fn initiate_failure_sends_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let server = Arc::new(MockServer::new());
        server.fail_initiate.store(true, Ordering::SeqCst);

        let mut orch = UploadOrchestrator::new(server.clone(), open_store(dir.path()), config(4));
        let events_rx = orch.take_events().unwrap();

        let result = orch.run(&file, &AlwaysResume).await;
        assert!(matches!(result, Err(UploadError::Initiate(_))));
        assert!(server.uploaded().is_empty());

        drop(orch);
        let events = drain(events_rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UploadEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn finalize_failure_can_be_retried_without_resending() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let store = open_store(dir.path());
        let server = Arc::new(MockServer::new());
        server.fail_finalize.store(true, Ordering::SeqCst);

        let orch = UploadOrchestrator::new(server.clone(), store.clone(), config(4));
        let result = orch.run(&file, &AlwaysResume).await;
        assert!(matches!(result, Err(UploadError::Finalize(_))));
        assert!(store.session().is_some());
        assert_eq!(store.committed().len(), 3);

        server.fail_finalize.store(false, Ordering::SeqCst);
        let outcome = orch.run(&file, &AlwaysResume).await.unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.sent, 0);
        assert_eq!(server.uploaded().len(), 3);
        assert_eq!(server.finalize_requests().len(), 2);
    }

    #[tokio::test]
    async fn failed_chunks_are_reported_as_events() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let server = Arc::new(MockServer::new());
        server.fail_chunk(2);

        let mut orch = UploadOrchestrator::new(server, open_store(dir.path()), config(4));
        let events_rx = orch.take_events().unwrap();
        let _ = orch.run(&file, &AlwaysResume).await;

        drop(orch);
        let events = drain(events_rx).await;
        assert!(events.iter().any(|e| matches!(
            e,
            UploadEvent::ChunkFailed { chunk_id: 2, .. }
        )));
        assert!(matches!(events.last(), Some(UploadEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn commit_channel_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let server = Arc::new(MockServer::new());
        server.fail_subscribe.store(true, Ordering::SeqCst);

        let orch = UploadOrchestrator::new(server.clone(), open_store(dir.path()), config(4));
        let outcome = orch.run(&file, &AlwaysResume).await.unwrap();
        assert_eq!(outcome.sent, 3);
    }

    #[tokio::test]
    async fn slow_listener_still_sees_completion() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 2000);
        let server = Arc::new(MockServer::committing());

        // Far more chunks than the event channel holds.
        let mut orch = UploadOrchestrator::new(server, open_store(dir.path()), config(4));
        let mut events_rx = orch.take_events().unwrap();
        let listener = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(e) = events_rx.recv().await {
                tokio::time::sleep(Duration::from_millis(1)).await;
                events.push(e);
            }
            events
        });

        let outcome = orch.run(&file, &AlwaysResume).await.unwrap();
        assert_eq!(outcome.sent, 500);
        drop(orch);
        let events = listener.await.unwrap();

        let n = events.len();
        assert!(matches!(
            events[n - 2],
            UploadEvent::Progress { overall, committed: 500, .. } if overall == 100.0
        ));
        assert!(matches!(events[n - 1], UploadEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 10);
        let server = Arc::new(MockServer::new());

        let orch = UploadOrchestrator::new(server.clone(), open_store(dir.path()), config(4));
        orch.cancel_token().cancel();

        let result = orch.run(&file, &AlwaysResume).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert!(server.calls().is_empty());
    }

    #[tokio::test]
    async fn cancel_mid_upload_keeps_sent_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(dir.path(), 40);
        let store = open_store(dir.path());
        let server = Arc::new(MockServer::new());
        *server.chunk_delay.lock().unwrap() = Some(Duration::from_millis(20));

        let mut cfg = config(4);
        cfg.concurrency = 1;
        let orch = UploadOrchestrator::new(server.clone(), store.clone(), cfg);
        let cancel = orch.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(70)).await;
            cancel.cancel();
        });

        let result = orch.run(&file, &AlwaysResume).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));

        let committed = store.committed().len();
        assert!(committed < 10, "committed {committed}");
        assert!(store.session().is_some());
        assert!(server.finalize_requests().is_empty());
    }
}
