use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use vaultindex_core::{IndexApiError, IndexClient, RemoteDocument};

use super::connectivity::ConnectivityMonitor;
use super::prepare::{PreparedDocument, prepare};
use super::queue::PersistentQueue;
use super::state::{DocStatus, DocumentState, QueueOp, StateError, StateStore, now_ms};
use super::vault::{LocalVault, VaultError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("api error: {0}")]
    Api(#[from] IndexApiError),
    #[error("state error: {0}")]
    State(#[from] StateError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub queued_uploads: usize,
    pub queued_deletes: usize,
    pub restored: usize,
    pub tombstoned: usize,
    pub unchanged: usize,
}

/// Orchestrates full scans, event-driven diffing and orphan cleanup.
/// Local documents are ground truth; the queue carries every remote
/// mutation. Uploads never pre-check the remote store for an existing
/// copy — duplicate prevention is the janitor's job.
pub struct Reconciler {
    state: Arc<StateStore>,
    vault: Arc<LocalVault>,
    client: IndexClient,
    store_id: String,
    queue: Arc<PersistentQueue>,
    connectivity: Arc<ConnectivityMonitor>,
    upload_debounce_ms: i64,
}

const DEFAULT_UPLOAD_DEBOUNCE_MS: i64 = 1_500;

impl Reconciler {
    pub fn new(
        state: Arc<StateStore>,
        vault: Arc<LocalVault>,
        client: IndexClient,
        store_id: String,
        queue: Arc<PersistentQueue>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            state,
            vault,
            client,
            store_id,
            queue,
            connectivity,
            upload_debounce_ms: DEFAULT_UPLOAD_DEBOUNCE_MS,
        }
    }

    /// Coalescing window for rapid successive edits to the same path.
    pub fn with_upload_debounce_ms(mut self, debounce_ms: i64) -> Self {
        self.upload_debounce_ms = debounce_ms;
        self
    }

    /// Full scan: prepare every indexable document and diff it against
    /// stored state. With `restore_from_remote`, documents the remote
    /// store already holds (matched by path and content fingerprint) are
    /// adopted instead of re-uploaded.
    pub async fn reconcile(
        &self,
        restore_from_remote: bool,
    ) -> Result<ReconcileSummary, EngineError> {
        let entries = self.vault.enumerate().await?;
        let restorable = if restore_from_remote && self.connectivity.state().connected {
            match self.client.list_all_documents(&self.store_id, |_| {}).await {
                Ok(documents) => group_by_path_fingerprint(documents),
                Err(err) => {
                    // Degrade: startup proceeds without the restore
                    // optimization, uploads still happen.
                    eprintln!(
                        "[vaultindexd] reconcile: remote listing unavailable, skipping restore: {err}"
                    );
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        let mut summary = ReconcileSummary {
            scanned: entries.len(),
            ..ReconcileSummary::default()
        };
        for entry in entries {
            let content = match self.vault.read(&entry.path).await {
                Ok(content) => content,
                Err(err) => {
                    eprintln!("[vaultindexd] reconcile: skipping {}: {err}", entry.path);
                    continue;
                }
            };
            let Some(prepared) = prepare(&entry.path, content, entry.modified_ms) else {
                let (removed, queued_delete) = self.tombstone(&entry.path);
                if removed {
                    summary.tombstoned += 1;
                }
                if queued_delete {
                    summary.queued_deletes += 1;
                }
                continue;
            };

            match self.state.get_doc(&entry.path) {
                None => {
                    if let Some(remote) = find_restorable(&restorable, &prepared) {
                        self.state.upsert_doc(
                            &entry.path,
                            DocumentState {
                                remote_id: Some(remote.id.clone()),
                                content_fingerprint: prepared.content_fingerprint,
                                path_fingerprint: prepared.path_fingerprint,
                                status: DocStatus::Ready,
                                local_modified_ms: prepared.modified_ms,
                                last_indexed_ms: Some(now_ms()),
                                tags: prepared.tags,
                                last_error: None,
                            },
                        );
                        summary.restored += 1;
                    } else {
                        self.enqueue_upload(&prepared);
                        summary.queued_uploads += 1;
                    }
                }
                Some(doc)
                    if doc.content_fingerprint != prepared.content_fingerprint
                        || doc.status == DocStatus::Error =>
                {
                    self.enqueue_upload(&prepared);
                    summary.queued_uploads += 1;
                }
                Some(_) => summary.unchanged += 1,
            }
        }

        self.queue.notify_changed();
        Ok(summary)
    }

    pub async fn on_create(&self, path: &str) -> Result<(), EngineError> {
        self.on_modify(path).await
    }

    pub async fn on_modify(&self, path: &str) -> Result<(), EngineError> {
        if !self.vault.is_indexable(path) {
            return Ok(());
        }
        let content = match self.vault.read(path).await {
            Ok(content) => content,
            // Gone again already; the delete event will follow.
            Err(VaultError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        let modified_ms = self.vault.modified_ms(path).await.unwrap_or_else(|_| now_ms());

        match prepare(path, content, modified_ms) {
            None => {
                self.tombstone(path);
            }
            Some(prepared) => {
                let changed = match self.state.get_doc(path) {
                    None => true,
                    Some(doc) => {
                        doc.content_fingerprint != prepared.content_fingerprint
                            || doc.status == DocStatus::Error
                    }
                };
                if changed {
                    self.enqueue_upload(&prepared);
                }
            }
        }
        self.queue.notify_changed();
        Ok(())
    }

    pub async fn on_rename(&self, path: &str, old_path: &str) -> Result<(), EngineError> {
        self.state.remove_entry(old_path);
        if let Some(old) = self.state.remove_doc(old_path)
            && let Some(remote_id) = old.remote_id
        {
            self.state
                .enqueue(old_path, QueueOp::Delete, None, Some(remote_id), 0);
        }
        if self.vault.is_indexable(path) {
            self.on_modify(path).await?;
        } else {
            self.queue.notify_changed();
        }
        Ok(())
    }

    /// Optimistic: local state goes away immediately, the remote delete
    /// rides the queue.
    pub fn on_delete(&self, path: &str) {
        self.state.remove_entry(path);
        if let Some(doc) = self.state.remove_doc(path)
            && let Some(remote_id) = doc.remote_id
        {
            self.state
                .enqueue(path, QueueOp::Delete, None, Some(remote_id), 0);
        }
        self.queue.notify_changed();
    }

    pub async fn rebuild_index(&self) -> Result<ReconcileSummary, EngineError> {
        self.queue.clear();
        self.state.clear_documents();
        self.state.clear_queue();
        self.reconcile(true).await
    }

    /// Deletes remote documents whose owner path no longer exists in the
    /// local collection. Returns the number removed.
    pub async fn cleanup_orphans(&self) -> Result<usize, EngineError> {
        let documents = self.client.list_all_documents(&self.store_id, |_| {}).await?;
        let mut removed = 0;
        for document in documents {
            let Some(owner) = document.owner_path().map(str::to_string) else {
                continue;
            };
            if self.vault.exists(&owner).await && self.vault.is_indexable(&owner) {
                continue;
            }
            match self.client.delete_document(&document.id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    eprintln!(
                        "[vaultindexd] cleanup: failed to delete {}: {err}",
                        document.id
                    );
                    continue;
                }
            }
            removed += 1;
            if let Some(doc) = self.state.get_doc(&owner)
                && doc.remote_id.as_deref() == Some(document.id.as_str())
            {
                self.state.remove_doc(&owner);
            }
        }
        Ok(removed)
    }

    fn enqueue_upload(&self, prepared: &PreparedDocument) {
        let existing = self.state.get_doc(&prepared.path);
        self.state.upsert_doc(
            &prepared.path,
            DocumentState {
                remote_id: existing.as_ref().and_then(|doc| doc.remote_id.clone()),
                content_fingerprint: prepared.content_fingerprint.clone(),
                path_fingerprint: prepared.path_fingerprint.clone(),
                status: DocStatus::Pending,
                local_modified_ms: prepared.modified_ms,
                last_indexed_ms: existing.as_ref().and_then(|doc| doc.last_indexed_ms),
                tags: prepared.tags.clone(),
                last_error: None,
            },
        );
        self.state.enqueue(
            &prepared.path,
            QueueOp::Upload,
            Some(prepared.content_fingerprint.clone()),
            None,
            self.upload_debounce_ms,
        );
    }

    // Empty documents are not uploaded; any existing remote copy gets a
    // queued delete. Returns (state removed, delete queued).
    fn tombstone(&self, path: &str) -> (bool, bool) {
        self.state.remove_entry(path);
        match self.state.remove_doc(path) {
            Some(doc) => {
                let queued = if let Some(remote_id) = doc.remote_id {
                    self.state
                        .enqueue(path, QueueOp::Delete, None, Some(remote_id), 0);
                    true
                } else {
                    false
                };
                (true, queued)
            }
            None => (false, false),
        }
    }
}

fn group_by_path_fingerprint(
    documents: Vec<RemoteDocument>,
) -> HashMap<String, Vec<RemoteDocument>> {
    let mut groups: HashMap<String, Vec<RemoteDocument>> = HashMap::new();
    for document in documents {
        if let Some(fingerprint) = document.owner_path_fingerprint().map(str::to_string) {
            groups.entry(fingerprint).or_default().push(document);
        }
    }
    groups
}

fn find_restorable<'a>(
    groups: &'a HashMap<String, Vec<RemoteDocument>>,
    prepared: &PreparedDocument,
) -> Option<&'a RemoteDocument> {
    groups.get(&prepared.path_fingerprint)?.iter().find(|doc| {
        doc.content_fingerprint() == Some(prepared.content_fingerprint.as_str())
    })
}
