//! Session creation and recovery.

use std::sync::Arc;

use chunkup_protocol::FileMetadata;
use chunkup_protocol::messages::InitiateRequest;
use chunkup_transfer::{ResumeStore, SourceFile, UploadSession, total_chunks};
use tracing::{debug, info, warn};

use crate::error::UploadError;
use crate::server::UploadServer;
use crate::types::MismatchPolicy;

/// Asks whether a matching interrupted upload should be resumed.
///
/// Returning `false` discards the stored session.
pub trait ResumeConfirm: Send + Sync {
    fn confirm(&self, stored: &FileMetadata, session: &UploadSession) -> bool;
}

impl<F> ResumeConfirm for F
where
    F: Fn(&FileMetadata, &UploadSession) -> bool + Send + Sync,
{
    fn confirm(&self, stored: &FileMetadata, session: &UploadSession) -> bool {
        self(stored, session)
    }
}

/// Resumes every matching session without asking.
pub struct AlwaysResume;

impl ResumeConfirm for AlwaysResume {
    fn confirm(&self, _stored: &FileMetadata, _session: &UploadSession) -> bool {
        true
    }
}

/// A session ready for chunk transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStart {
    pub session: UploadSession,
    /// `true` if identities were recovered from the resume store.
    pub resumed: bool,
}

/// Creates or recovers the upload session for a selected file.
pub struct SessionManager {
    server: Arc<dyn UploadServer>,
    store: Arc<ResumeStore>,
    chunk_size: u64,
    on_mismatch: MismatchPolicy,
}

impl SessionManager {
    /// Creates a manager that plans fresh sessions with `chunk_size`.
    pub fn new(server: Arc<dyn UploadServer>, store: Arc<ResumeStore>, chunk_size: u64) -> Self {
        Self {
            server,
            store,
            chunk_size,
            on_mismatch: MismatchPolicy::default(),
        }
    }

    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.on_mismatch = policy;
        self
    }

    /// Returns the session to upload `file` with.
    ///
    /// A stored session is reused only if its file metadata matches
    /// `file` and `confirm` agrees. Otherwise the stored state is
    /// discarded (or, under [`MismatchPolicy::Strict`], a mismatch is
    /// returned as an error) and a fresh session is initiated.
    pub async fn start(
        &self,
        file: &SourceFile,
        confirm: &dyn ResumeConfirm,
    ) -> Result<SessionStart, UploadError> {
        let state = self.store.snapshot();

        match (state.file, state.session) {
            (Some(stored), Some(session)) => {
                if stored.matches(&file.metadata) && plan_fits(&session, file.size()) {
                    if confirm.confirm(&stored, &session) {
                        info!(
                            file_identity = %session.file_identity,
                            upload_identity = %session.upload_identity,
                            committed = state.committed.len(),
                            "resuming upload"
                        );
                        return Ok(SessionStart {
                            session,
                            resumed: true,
                        });
                    }
                    info!(file = %stored.name, "resume declined, discarding stored session");
                } else {
                    warn!(
                        stored = %stored.name,
                        selected = %file.metadata.name,
                        stored_size = stored.size,
                        selected_size = file.size(),
                        "selected file does not match stored session"
                    );
                    if self.on_mismatch == MismatchPolicy::Strict {
                        return Err(UploadError::ResumeMismatch {
                            stored: Box::new(stored),
                            selected: Box::new(file.metadata.clone()),
                        });
                    }
                }
                self.store.clear()?;
            }
            (None, None) if state.committed.is_empty() => {}
            _ => {
                debug!("discarding incomplete resume state");
                self.store.clear()?;
            }
        }

        self.initiate(file).await
    }

    /// Initiates a fresh session and persists it before returning.
    async fn initiate(&self, file: &SourceFile) -> Result<SessionStart, UploadError> {
        let total = total_chunks(file.size(), self.chunk_size)?;
        let file_identity = uuid::Uuid::new_v4().to_string();

        let req = InitiateRequest {
            file_identity: file_identity.clone(),
            file_name: file.metadata.name.clone(),
            file_size: file.size(),
            total_chunks: total,
        };
        let resp = self
            .server
            .initiate(&req)
            .await
            .map_err(|e| UploadError::Initiate(e.to_string()))?;
        if resp.upload_identity.is_empty() {
            return Err(UploadError::Initiate("server returned no upload identity".into()));
        }

        let session = UploadSession {
            file_identity,
            upload_identity: resp.upload_identity,
            chunk_size: self.chunk_size,
            total_chunks: total,
        };
        self.store.begin_session(&file.metadata, &session)?;

        info!(
            file = %file.metadata.name,
            file_identity = %session.file_identity,
            upload_identity = %session.upload_identity,
            total_chunks = total,
            "upload session created"
        );
        Ok(SessionStart {
            session,
            resumed: false,
        })
    }
}

/// The stored chunk geometry must still describe a file of `file_size` bytes.
fn plan_fits(session: &UploadSession, file_size: u64) -> bool {
    total_chunks(file_size, session.chunk_size).is_ok_and(|n| n == session.total_chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockServer};
    use chunkup_protocol::ChunkReceipt;
    use std::path::Path;
    use std::sync::atomic::Ordering;

    fn write_file(dir: &Path, name: &str, len: usize) -> SourceFile {
        let path = dir.join(name);
        std::fs::write(&path, vec![7u8; len]).unwrap();
        SourceFile::open(&path).unwrap()
    }

    fn setup(dir: &Path) -> (Arc<MockServer>, Arc<ResumeStore>) {
        let server = Arc::new(MockServer::new());
        let store = Arc::new(ResumeStore::open(dir.join("state.json")).unwrap());
        (server, store)
    }

    fn manager(server: &Arc<MockServer>, store: &Arc<ResumeStore>, chunk_size: u64) -> SessionManager {
        SessionManager::new(server.clone(), store.clone(), chunk_size)
    }

    #[tokio::test]
    async fn fresh_session_initiates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);

        let start = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();

        assert!(!start.resumed);
        assert_eq!(start.session.total_chunks, 3);
        assert_eq!(start.session.upload_identity, "upload-1");
        assert_eq!(server.initiate_count(), 1);
        assert_eq!(store.session().unwrap(), start.session);
        assert_eq!(store.file_metadata().unwrap(), file.metadata);

        match &server.calls()[0] {
            Call::Initiate(req) => {
                assert_eq!(req.file_identity, start.session.file_identity);
                assert_eq!(req.file_size, 10);
                assert_eq!(req.total_chunks, 3);
            }
            other => panic!("expected initiate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn matching_file_resumes_without_initiate() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);

        let first = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();
        store
            .mark_committed(&ChunkReceipt {
                chunk_id: 1,
                part_tag: "tag-1".into(),
            })
            .unwrap();

        let second = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();
        assert!(second.resumed);
        assert_eq!(second.session, first.session);
        assert_eq!(server.initiate_count(), 1);
        assert!(store.is_committed(1));
    }

    #[tokio::test]
    async fn resume_keeps_stored_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);

        manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();
        let resumed = manager(&server, &store, 2).start(&file, &AlwaysResume).await.unwrap();

        assert!(resumed.resumed);
        assert_eq!(resumed.session.chunk_size, 4);
        assert_eq!(resumed.session.total_chunks, 3);
    }

    #[tokio::test]
    async fn changed_file_never_reuses_committed_set() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);

        let first = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();
        store
            .mark_committed(&ChunkReceipt {
                chunk_id: 1,
                part_tag: "tag-1".into(),
            })
            .unwrap();

        let changed = write_file(dir.path(), "a.bin", 12);
        let second = manager(&server, &store, 4).start(&changed, &AlwaysResume).await.unwrap();

        assert!(!second.resumed);
        assert_ne!(second.session.file_identity, first.session.file_identity);
        assert_eq!(server.initiate_count(), 2);
        assert!(store.committed().is_empty());
    }

    #[tokio::test]
    async fn changed_mtime_is_a_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);
        manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();

        let mut touched = file.clone();
        touched.metadata.last_modified += 1000;
        let second = manager(&server, &store, 4).start(&touched, &AlwaysResume).await.unwrap();
        assert!(!second.resumed);
    }

    #[tokio::test]
    async fn strict_mismatch_keeps_stored_state() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);
        let first = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();

        let other = write_file(dir.path(), "b.bin", 3);
        let result = manager(&server, &store, 4)
            .with_mismatch_policy(MismatchPolicy::Strict)
            .start(&other, &AlwaysResume)
            .await;

        assert!(matches!(result, Err(UploadError::ResumeMismatch { .. })));
        assert_eq!(store.session().unwrap(), first.session);
        assert_eq!(server.initiate_count(), 1);
    }

    #[tokio::test]
    async fn declined_resume_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "a.bin", 10);
        let first = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();

        let decline = |_: &FileMetadata, _: &UploadSession| false;
        let second = manager(&server, &store, 4).start(&file, &decline).await.unwrap();

        assert!(!second.resumed);
        assert_ne!(second.session.upload_identity, first.session.upload_identity);
    }

    #[tokio::test]
    async fn initiate_failure_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        server.fail_initiate.store(true, Ordering::SeqCst);
        let file = write_file(dir.path(), "a.bin", 10);

        let result = manager(&server, &store, 4).start(&file, &AlwaysResume).await;

        assert!(matches!(result, Err(UploadError::Initiate(_))));
        assert!(store.session().is_none());
        assert!(store.file_metadata().is_none());
    }

    #[tokio::test]
    async fn empty_file_gets_one_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let (server, store) = setup(dir.path());
        let file = write_file(dir.path(), "empty.bin", 0);

        let start = manager(&server, &store, 4).start(&file, &AlwaysResume).await.unwrap();
        assert_eq!(start.session.total_chunks, 1);
    }
}
