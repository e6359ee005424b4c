//! Finalization of a fully transported upload.

use std::collections::BTreeMap;
use std::sync::Arc;

use chunkup_protocol::ChunkReceipt;
use chunkup_protocol::messages::{FinalizeRequest, FinalizeResponse};
use chunkup_transfer::{ResumeStore, UploadSession};
use tracing::{error, info, warn};

use crate::error::UploadError;
use crate::server::UploadServer;

/// Submits the ordered receipt list and clears local state on success.
pub struct MergeCoordinator {
    server: Arc<dyn UploadServer>,
    store: Arc<ResumeStore>,
}

impl MergeCoordinator {
    pub fn new(server: Arc<dyn UploadServer>, store: Arc<ResumeStore>) -> Self {
        Self { server, store }
    }

    /// Asks the server to assemble the artifact.
    ///
    /// Refuses, without contacting the server, unless every chunk of the
    /// session has a receipt. Receipts are submitted in ascending chunk
    /// order whatever order they arrive in. Persisted state is cleared
    /// only after the server accepts the merge.
    pub async fn finalize(
        &self,
        session: &UploadSession,
        receipts: impl IntoIterator<Item = ChunkReceipt>,
    ) -> Result<FinalizeResponse, UploadError> {
        let receipts = ordered_receipts(session.total_chunks, receipts)?;

        let req = FinalizeRequest {
            file_identity: session.file_identity.clone(),
            upload_identity: session.upload_identity.clone(),
            receipts,
        };

        let resp = match self.server.finalize(&req).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(
                    upload = %session.upload_identity,
                    error = %e,
                    "finalize failed, keeping resume state"
                );
                return Err(UploadError::Finalize(e.to_string()));
            }
        };

        if let Err(e) = self.store.clear() {
            warn!(error = %e, "artifact assembled but resume state could not be cleared");
        }
        info!(
            upload = %session.upload_identity,
            artifact = %resp.artifact,
            chunks = session.total_chunks,
            "upload finalized"
        );
        Ok(resp)
    }
}

/// Sorts receipts by chunk id and checks that `1..=total_chunks` are all present.
fn ordered_receipts(
    total_chunks: u32,
    receipts: impl IntoIterator<Item = ChunkReceipt>,
) -> Result<Vec<ChunkReceipt>, UploadError> {
    let mut by_id: BTreeMap<u32, ChunkReceipt> = receipts
        .into_iter()
        .filter(|r| !r.part_tag.is_empty())
        .map(|r| (r.chunk_id, r))
        .collect();
    by_id.retain(|id, _| (1..=total_chunks).contains(id));

    let missing: Vec<u32> = (1..=total_chunks)
        .filter(|id| !by_id.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(UploadError::MissingReceipts(missing));
    }
    Ok(by_id.into_values().collect())
}
