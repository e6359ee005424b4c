use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chunkup_protocol::{ChunkReceipt, FileMetadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::TransferError;
use crate::types::UploadSession;

/// Chunks confirmed transferred, mapped to their part tags.
///
/// Only ever grows during a session; cleared after a successful merge.
pub type CommittedSet = BTreeMap<u32, String>;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<UploadSession>,
    #[serde(default)]
    pub committed: CommittedSet,
}

/// Persistent local store for session metadata and committed chunks.
///
/// State is cached in memory and written to a JSON file on every change.
/// A single lock is held across each mutation and its write, so
/// concurrent completions never persist a stale snapshot.
pub struct ResumeStore {
    path: PathBuf,
    state: Mutex<ResumeState>,
}

impl ResumeStore {
    /// Opens the store at `path`, loading any existing state.
    ///
    /// A missing file yields an empty store. An unreadable one is
    /// discarded with a warning: it can only describe an upload that
    /// will have to start over anyway.
    pub fn open(path: PathBuf) -> Result<Self, TransferError> {
        let state = match load_state(&path) {
            Ok(state) => state,
            Err(TransferError::Json(e)) => {
                warn!(path = %path.display(), error = %e, "corrupt resume state, starting fresh");
                ResumeState::default()
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Returns a copy of the whole persisted state.
    pub fn snapshot(&self) -> ResumeState {
        self.state.lock().unwrap().clone()
    }

    /// Returns the metadata of the file the stored session belongs to.
    pub fn file_metadata(&self) -> Option<FileMetadata> {
        self.state.lock().unwrap().file.clone()
    }

    /// Returns the stored session, if any.
    pub fn session(&self) -> Option<UploadSession> {
        self.state.lock().unwrap().session.clone()
    }

    /// Returns the committed chunks.
    pub fn committed(&self) -> CommittedSet {
        self.state.lock().unwrap().committed.clone()
    }

    /// Returns `true` if `chunk_id` was already transferred.
    pub fn is_committed(&self, chunk_id: u32) -> bool {
        self.state.lock().unwrap().committed.contains_key(&chunk_id)
    }

    /// Returns the persisted receipt of a committed chunk.
    pub fn receipt(&self, chunk_id: u32) -> Option<ChunkReceipt> {
        let state = self.state.lock().unwrap();
        state.committed.get(&chunk_id).map(|tag| ChunkReceipt {
            chunk_id,
            part_tag: tag.clone(),
        })
    }

    /// Replaces all state with a fresh session and an empty committed set.
    pub fn begin_session(
        &self,
        file: &FileMetadata,
        session: &UploadSession,
    ) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        *state = ResumeState {
            file: Some(file.clone()),
            session: Some(session.clone()),
            committed: CommittedSet::new(),
        };
        self.persist(&state)
    }

    /// Records a transferred chunk and its part tag.
    pub fn mark_committed(&self, receipt: &ChunkReceipt) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        state
            .committed
            .insert(receipt.chunk_id, receipt.part_tag.clone());
        self.persist(&state)
    }

    /// Discards all state, in memory and on disk.
    pub fn clear(&self) -> Result<(), TransferError> {
        let mut state = self.state.lock().unwrap();
        *state = ResumeState::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), "resume state cleared");
        Ok(())
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `state` to disk via a temp file and rename.
    fn persist(&self, state: &ResumeState) -> Result<(), TransferError> {
        let json = serde_json::to_string_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(
            committed = state.committed.len(),
            path = %self.path.display(),
            "persisted resume state"
        );
        Ok(())
    }
}

/// Loads resume state from a JSON file on disk.
fn load_state(path: &Path) -> Result<ResumeState, TransferError> {
    if !path.exists() {
        return Ok(ResumeState::default());
    }
    let data = std::fs::read_to_string(path)?;
    let state: ResumeState = serde_json::from_str(&data)?;
    debug!(
        committed = state.committed.len(),
        path = %path.display(),
        "loaded resume state"
    );
    Ok(state)
}
