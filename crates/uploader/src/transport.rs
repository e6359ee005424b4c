//! Chunk transport with a bounded worker pool.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chunkup_protocol::ChunkReceipt;
use chunkup_protocol::messages::UploadChunkHeader;
use chunkup_transfer::{
    ChunkDescriptor, ChunkReader, ProgressHandle, ResumeStore, UploadSession, checksum_bytes,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::TransportError;
use crate::server::UploadServer;

/// Outcome of [`ChunkTransporter::transport_all`].
#[derive(Debug, Default)]
pub struct TransportReport {
    /// Receipts for every chunk that is now on the server, sent or reused.
    pub receipts: BTreeMap<u32, ChunkReceipt>,
    /// Chunks that could not be delivered, ordered by chunk id.
    pub failed: Vec<TransportError>,
    /// Chunks sent during this call.
    pub sent: u32,
    /// Chunks skipped because a previous attempt already sent them.
    pub skipped: u32,
}

impl TransportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends chunks to the server and records them in the resume store.
#[derive(Clone)]
pub struct ChunkTransporter {
    server: Arc<dyn UploadServer>,
    store: Arc<ResumeStore>,
    progress: ProgressHandle,
    cancel: CancellationToken,
}

impl ChunkTransporter {
    pub fn new(
        server: Arc<dyn UploadServer>,
        store: Arc<ResumeStore>,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            server,
            store,
            progress,
            cancel,
        }
    }

    /// Sends one chunk and returns its receipt.
    ///
    /// A chunk already in the committed set is not sent again; its
    /// persisted receipt is returned instead. On success the chunk is
    /// recorded as committed before transfer progress reaches 100.
    pub async fn transport(
        &self,
        chunk: &ChunkDescriptor,
        session: &UploadSession,
        reader: &ChunkReader,
    ) -> Result<ChunkReceipt, TransportError> {
        let chunk_id = chunk.chunk_id;
        if let Some(receipt) = self.store.receipt(chunk_id) {
            debug!(chunk_id, "chunk already committed, skipping");
            return Ok(receipt);
        }
        if self.cancel.is_cancelled() {
            return Err(TransportError::new(chunk_id, "cancelled"));
        }

        let data = tokio::task::spawn_blocking({
            let reader = reader.clone();
            let chunk = *chunk;
            move || reader.read(&chunk)
        })
        .await
        .map_err(|e| TransportError::new(chunk_id, format!("read task failed: {e}")))?
        .map_err(|e| TransportError::new(chunk_id, e.to_string()))?;

        let header = UploadChunkHeader {
            upload_identity: session.upload_identity.clone(),
            file_identity: session.file_identity.clone(),
            chunk_id,
            total_chunks: session.total_chunks,
            checksum: checksum_bytes(&data),
        };

        let progress = self.progress.clone();
        let on_progress = move |pct: f64| progress.transfer(chunk_id, pct);

        let resp = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(TransportError::new(chunk_id, "cancelled"));
            }
            result = self.server.upload_chunk(&header, &data, &on_progress) => {
                result.map_err(|e| TransportError::new(chunk_id, e.to_string()))?
            }
        };
        if resp.part_tag.is_empty() {
            return Err(TransportError::new(chunk_id, "server returned no part tag"));
        }

        let receipt = ChunkReceipt {
            chunk_id,
            part_tag: resp.part_tag,
        };
        self.persist(&receipt).await;
        self.progress.transfer(chunk_id, 100.0);

        debug!(chunk_id, bytes = data.len(), "chunk transferred");
        Ok(receipt)
    }

    /// Records `receipt` in the resume store.
    ///
    /// The store rewrites its file under a lock, so this runs on the
    /// blocking pool. A failure only costs a resend after a restart: the
    /// receipt is still valid for this attempt.
    async fn persist(&self, receipt: &ChunkReceipt) {
        let chunk_id = receipt.chunk_id;
        let written = tokio::task::spawn_blocking({
            let store = self.store.clone();
            let receipt = receipt.clone();
            move || store.mark_committed(&receipt)
        })
        .await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(chunk_id, error = %e, "failed to persist committed chunk"),
            Err(e) => warn!(chunk_id, error = %e, "persist task failed"),
        }
    }

    /// Sends every chunk in `chunks` with at most `concurrency` in flight.
    ///
    /// Failures are isolated: a failed chunk is logged and reported, and
    /// the remaining chunks are still sent.
    pub async fn transport_all(
        &self,
        chunks: Vec<ChunkDescriptor>,
        session: &UploadSession,
        reader: &ChunkReader,
        concurrency: usize,
    ) -> TransportReport {
        let mut report = TransportReport::default();
        let mut pending = VecDeque::with_capacity(chunks.len());
        let all_ids: Vec<u32> = chunks.iter().map(|c| c.chunk_id).collect();

        for chunk in chunks {
            match self.store.receipt(chunk.chunk_id) {
                Some(receipt) => {
                    report.receipts.insert(chunk.chunk_id, receipt);
                    report.skipped += 1;
                }
                None => pending.push_back(chunk),
            }
        }

        let workers = concurrency.max(1).min(pending.len());
        debug!(
            pending = pending.len(),
            skipped = report.skipped,
            workers,
            "dispatching chunks"
        );

        let queue = Arc::new(Mutex::new(pending));
        let session = Arc::new(session.clone());
        let mut set = JoinSet::new();

        for _ in 0..workers {
            let queue = queue.clone();
            let session = session.clone();
            let reader = reader.clone();
            let this = self.clone();
            set.spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = queue.lock().unwrap().pop_front();
                    let Some(chunk) = next else { break };
                    let result = this.transport(&chunk, &session, &reader).await;
                    results.push((chunk.chunk_id, result));
                }
                results
            });
        }

        let mut sent = 0;
        let mut failed = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            let results = match joined {
                Ok(results) => results,
                Err(e) => {
                    error!(error = %e, "transport worker aborted");
                    continue;
                }
            };
            for (chunk_id, result) in results {
                match result {
                    Ok(receipt) => {
                        sent += 1;
                        report.receipts.insert(chunk_id, receipt);
                    }
                    Err(e) => {
                        warn!(chunk_id, error = %e.reason, "chunk transport failed");
                        failed.insert(chunk_id, e);
                    }
                }
            }
        }

        // Chunks lost with an aborted worker, or never dequeued.
        for id in all_ids {
            if !report.receipts.contains_key(&id) && !failed.contains_key(&id) {
                failed.insert(id, TransportError::new(id, "not transferred"));
            }
        }

        report.sent = sent;
        report.failed = failed.into_values().collect();
        report
    }
}
