use serde::{Deserialize, Serialize};

/// Descriptive metadata of the file being uploaded.
///
/// Persisted alongside a session so a later run can tell whether the
/// selected file is still the one the session was created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    #[serde(rename = "type", default)]
    pub content_type: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl FileMetadata {
    /// Returns `true` when `other` describes the same file content.
    ///
    /// The name is ignored: a renamed file with identical size, type and
    /// modification time is still resumable.
    pub fn matches(&self, other: &FileMetadata) -> bool {
        self.size == other.size
            && self.content_type == other.content_type
            && self.last_modified == other.last_modified
    }
}

/// Proof that a chunk was transferred, needed for finalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceipt {
    pub chunk_id: u32,
    /// Opaque server-assigned tag (e.g. storage ETag).
    pub part_tag: String,
}
