use std::sync::Arc;

use thiserror::Error;
use vaultindex_core::{
    ApiErrorClass, ChunkingParams, IndexApiError, IndexClient, MetadataEntry, UploadRequest,
    meta_keys,
};

use super::prepare::prepare;
use super::replace::DocumentReplacer;
use super::state::{DocStatus, DocumentState, QueueEntry, QueueOp, StateStore, now_ms};
use super::vault::{LocalVault, VaultError};

#[derive(Debug, Error)]
pub enum OpError {
    #[error("api error: {0}")]
    Api(#[from] IndexApiError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
}

/// How the queue should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Transient,
    Terminal,
}

impl OpError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OpError::Api(err) => match err.classification() {
                ApiErrorClass::Auth => FailureKind::Auth,
                ApiErrorClass::RateLimit | ApiErrorClass::Transient => FailureKind::Transient,
                ApiErrorClass::NotFound | ApiErrorClass::Permanent => FailureKind::Terminal,
            },
            OpError::Vault(_) => FailureKind::Terminal,
        }
    }

    /// Transport-level failures double as an offline signal.
    pub fn is_transport(&self) -> bool {
        matches!(self, OpError::Api(IndexApiError::Request(_)))
    }
}

/// Executes queue entries against the remote service: uploads go through
/// the replace primitive, deletes straight to the client. Writes results
/// back into the document state.
pub struct QueueOps {
    state: Arc<StateStore>,
    vault: Arc<LocalVault>,
    replacer: DocumentReplacer,
    client: IndexClient,
    vault_id: String,
}

impl QueueOps {
    pub fn new(
        state: Arc<StateStore>,
        vault: Arc<LocalVault>,
        replacer: DocumentReplacer,
        client: IndexClient,
        vault_id: String,
    ) -> Self {
        Self {
            state,
            vault,
            replacer,
            client,
            vault_id,
        }
    }

    pub async fn run(&self, entry: &QueueEntry) -> Result<(), OpError> {
        match entry.op {
            QueueOp::Upload => self.run_upload(entry).await,
            QueueOp::Delete => self.run_delete(entry).await,
        }
    }

    async fn run_upload(&self, entry: &QueueEntry) -> Result<(), OpError> {
        let content = match self.vault.read(&entry.path).await {
            Ok(content) => content,
            Err(VaultError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                // Vanished locally while queued: swap this upload for a
                // remote delete so the old copy does not linger. The new
                // entry supersedes this one, so completion leaves it be.
                if let Some(doc) = self.state.remove_doc(&entry.path)
                    && let Some(remote_id) = doc.remote_id
                {
                    self.state
                        .enqueue(&entry.path, QueueOp::Delete, None, Some(remote_id), 0);
                }
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let modified_ms = self
            .vault
            .modified_ms(&entry.path)
            .await
            .unwrap_or_else(|_| now_ms());

        let Some(prepared) = prepare(&entry.path, content, modified_ms) else {
            // Emptied since it was enqueued: tombstone instead of upload.
            if let Some(doc) = self.state.get_doc(&entry.path)
                && let Some(remote_id) = doc.remote_id
            {
                self.delete_remote(&remote_id).await?;
            }
            self.state.remove_doc(&entry.path);
            return Ok(());
        };

        let existing = self.state.get_doc(&entry.path).and_then(|doc| doc.remote_id);
        let settings = self.state.settings();
        let request = UploadRequest {
            display_name: display_name_for(&entry.path),
            content: prepared.content.clone(),
            metadata: vec![
                MetadataEntry {
                    key: meta_keys::VAULT_PATH.to_string(),
                    value: prepared.path.clone(),
                },
                MetadataEntry {
                    key: meta_keys::PATH_FINGERPRINT.to_string(),
                    value: prepared.path_fingerprint.clone(),
                },
                MetadataEntry {
                    key: meta_keys::CONTENT_FINGERPRINT.to_string(),
                    value: prepared.content_fingerprint.clone(),
                },
                MetadataEntry {
                    key: meta_keys::VAULT_ID.to_string(),
                    value: self.vault_id.clone(),
                },
            ],
            chunking: ChunkingParams {
                max_tokens: settings.chunk_max_tokens,
                overlap_tokens: settings.chunk_overlap_tokens,
            },
        };

        let document = self.replacer.replace(existing.as_deref(), &request).await?;
        self.state.upsert_doc(
            &entry.path,
            DocumentState {
                remote_id: Some(document.id),
                content_fingerprint: prepared.content_fingerprint,
                path_fingerprint: prepared.path_fingerprint,
                status: DocStatus::Ready,
                local_modified_ms: prepared.modified_ms,
                last_indexed_ms: Some(now_ms()),
                tags: prepared.tags,
                last_error: None,
            },
        );
        Ok(())
    }

    async fn run_delete(&self, entry: &QueueEntry) -> Result<(), OpError> {
        if let Some(remote_id) = entry.remote_id.as_deref() {
            self.delete_remote(remote_id).await?;
        }
        Ok(())
    }

    async fn delete_remote(&self, remote_id: &str) -> Result<(), OpError> {
        match self.client.delete_document(remote_id).await {
            Ok(()) => Ok(()),
            // Delete is idempotent: already gone is success.
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn display_name_for(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
