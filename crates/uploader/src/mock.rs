//! Recording `UploadServer` used by the unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chunkup_protocol::messages::{
    ChunkCommittedEvent, FinalizeRequest, FinalizeResponse, InitiateRequest, InitiateResponse,
    UploadChunkHeader, UploadChunkResponse,
};
use tokio::sync::mpsc;

use crate::error::UploadError;
use crate::server::{ServerFuture, TransferProgress, UploadServer};

#[derive(Debug, Clone)]
pub enum Call {
    Initiate(InitiateRequest),
    UploadChunk { header: UploadChunkHeader, len: usize },
    Finalize(FinalizeRequest),
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Default)]
pub struct MockServer {
    pub calls: Mutex<Vec<Call>>,
    pub fail_chunks: Mutex<HashSet<u32>>,
    pub fail_initiate: AtomicBool,
    pub fail_finalize: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Push a commit event after every successful chunk.
    pub auto_commit: AtomicBool,
    pub chunk_delay: Mutex<Option<Duration>>,
    commit_tx: Mutex<Option<mpsc::Sender<ChunkCommittedEvent>>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    next_upload: AtomicUsize,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn committing() -> Self {
        let server = Self::default();
        server.auto_commit.store(true, Ordering::SeqCst);
        server
    }

    pub fn fail_chunk(&self, chunk_id: u32) {
        self.fail_chunks.lock().unwrap().insert(chunk_id);
    }

    pub fn heal_chunks(&self) {
        self.fail_chunks.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Chunk ids passed to `upload_chunk`, in call order.
    pub fn uploaded(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::UploadChunk { header, .. } => Some(header.chunk_id),
                _ => None,
            })
            .collect()
    }

    pub fn initiate_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Initiate(_)))
            .count()
    }

    pub fn finalize_requests(&self) -> Vec<FinalizeRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Finalize(req) => Some(req),
                _ => None,
            })
            .collect()
    }

    /// Pushes a commit event on the open subscription, if any.
    pub fn push_commit(&self, upload_identity: &str, chunk_id: u32) {
        if let Some(tx) = self.commit_tx.lock().unwrap().as_ref() {
            let _ = tx.try_send(ChunkCommittedEvent {
                upload_identity: upload_identity.into(),
                chunk_id,
            });
        }
    }

    /// Drops the sending side of the commit stream.
    pub fn drop_commit_stream(&self) {
        self.commit_tx.lock().unwrap().take();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl UploadServer for MockServer {
    fn initiate<'a>(&'a self, req: &'a InitiateRequest) -> ServerFuture<'a, InitiateResponse> {
        Box::pin(async move {
            self.record(Call::Initiate(req.clone()));
            if self.fail_initiate.load(Ordering::SeqCst) {
                return Err(UploadError::Server("initiate refused".into()));
            }
            let n = self.next_upload.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(InitiateResponse {
                upload_identity: format!("upload-{n}"),
            })
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        header: &'a UploadChunkHeader,
        data: &'a [u8],
        on_progress: &'a TransferProgress,
    ) -> ServerFuture<'a, UploadChunkResponse> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.record(Call::UploadChunk {
                header: header.clone(),
                len: data.len(),
            });

            on_progress(50.0);
            let delay = *self.chunk_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_chunks.lock().unwrap().contains(&header.chunk_id) {
                return Err(UploadError::Server("connection reset".into()));
            }
            on_progress(100.0);
            if self.auto_commit.load(Ordering::SeqCst) {
                self.push_commit(&header.upload_identity, header.chunk_id);
            }
            Ok(UploadChunkResponse {
                part_tag: format!("tag-{}", header.chunk_id),
            })
        })
    }

    fn finalize<'a>(&'a self, req: &'a FinalizeRequest) -> ServerFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            self.record(Call::Finalize(req.clone()));
            if self.fail_finalize.load(Ordering::SeqCst) {
                return Err(UploadError::Server("assembly failed".into()));
            }
            Ok(FinalizeResponse {
                artifact: format!("artifacts/{}", req.file_identity),
            })
        })
    }

    fn subscribe_commits<'a>(
        &'a self,
        upload_identity: &'a str,
    ) -> ServerFuture<'a, mpsc::Receiver<ChunkCommittedEvent>> {
        Box::pin(async move {
            self.record(Call::Subscribe(upload_identity.into()));
            if self.fail_subscribe.load(Ordering::SeqCst) {
                return Err(UploadError::Server("push channel unavailable".into()));
            }
            let (tx, rx) = mpsc::channel(1024);
            *self.commit_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        })
    }

    fn unsubscribe_commits<'a>(&'a self, upload_identity: &'a str) -> ServerFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Unsubscribe(upload_identity.into()));
            self.commit_tx.lock().unwrap().take();
            Ok(())
        })
    }
}
