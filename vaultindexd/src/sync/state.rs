use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;

const SAVE_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Stable identity for a local collection, derived from its root location.
/// Scopes the persisted state file so two vaults never share a record.
pub fn collection_id(root: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub store_name: String,
    pub include_paths: Vec<String>,
    pub max_concurrent_uploads: usize,
    pub chunk_max_tokens: u32,
    pub chunk_overlap_tokens: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_name: "vaultindex".to_string(),
            include_paths: Vec::new(),
            max_concurrent_uploads: 3,
            chunk_max_tokens: 512,
            chunk_overlap_tokens: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Pending,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentState {
    pub remote_id: Option<String>,
    pub content_fingerprint: String,
    pub path_fingerprint: String,
    pub status: DocStatus,
    pub local_modified_ms: i64,
    pub last_indexed_ms: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueOp {
    Upload,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: u64,
    pub path: String,
    pub op: QueueOp,
    pub content_fingerprint: Option<String>,
    pub remote_id: Option<String>,
    pub enqueued_ms: i64,
    pub ready_ms: i64,
    pub attempts: u32,
    pub last_attempt_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    settings: Settings,
    #[serde(default)]
    store_id: Option<String>,
    documents: HashMap<String, DocumentState>,
    queue: HashMap<String, QueueEntry>,
    next_entry_id: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocCounts {
    pub total: usize,
    pub ready: usize,
    pub pending: usize,
    pub error: usize,
}

/// Exclusive owner of the persisted record: settings, per-document state
/// and queue entries. Every mutation goes through these accessors and
/// schedules a debounced save, so queued work survives a restart.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<PersistedState>,
    save_scheduled: AtomicBool,
}

impl StateStore {
    /// Opens (or creates) the state record at `state_dir`, scoped by the
    /// collection identity of `vault_root`.
    pub fn open(state_dir: &Path, vault_root: &Path) -> Result<Arc<Self>, StateError> {
        std::fs::create_dir_all(state_dir)?;
        let file = state_dir.join(format!("vaultindex-{}.json", collection_id(vault_root)));
        Self::open_file(file)
    }

    pub fn open_file(path: PathBuf) -> Result<Arc<Self>, StateError> {
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Arc::new(Self {
            path,
            inner: Mutex::new(state),
            save_scheduled: AtomicBool::new(false),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule_save(self: &Arc<Self>) {
        if self.save_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(SAVE_DEBOUNCE_MS)).await;
            if let Err(err) = store.flush() {
                eprintln!("[vaultindexd] state save failed: {err}");
            }
        });
    }

    /// Writes the record out immediately (temp file + rename).
    pub fn flush(&self) -> Result<(), StateError> {
        self.save_scheduled.store(false, Ordering::SeqCst);
        let bytes = {
            let state = self.lock();
            serde_json::to_vec_pretty(&*state)?
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    pub fn update_settings(self: &Arc<Self>, settings: Settings) {
        self.lock().settings = settings;
        self.schedule_save();
    }

    /// Remote store id from the last successful resolution; lets the
    /// daemon come up offline.
    pub fn cached_store_id(&self) -> Option<String> {
        self.lock().store_id.clone()
    }

    pub fn set_store_id(self: &Arc<Self>, store_id: &str) {
        let changed = {
            let mut state = self.lock();
            if state.store_id.as_deref() == Some(store_id) {
                false
            } else {
                state.store_id = Some(store_id.to_string());
                true
            }
        };
        if changed {
            self.schedule_save();
        }
    }

    pub fn get_doc(&self, path: &str) -> Option<DocumentState> {
        self.lock().documents.get(path).cloned()
    }

    pub fn upsert_doc(self: &Arc<Self>, path: &str, doc: DocumentState) {
        self.lock().documents.insert(path.to_string(), doc);
        self.schedule_save();
    }

    pub fn remove_doc(self: &Arc<Self>, path: &str) -> Option<DocumentState> {
        let removed = self.lock().documents.remove(path);
        if removed.is_some() {
            self.schedule_save();
        }
        removed
    }

    pub fn documents_snapshot(&self) -> Vec<(String, DocumentState)> {
        self.lock()
            .documents
            .iter()
            .map(|(path, doc)| (path.clone(), doc.clone()))
            .collect()
    }

    pub fn set_doc_error(self: &Arc<Self>, path: &str, message: &str) {
        {
            let mut state = self.lock();
            if let Some(doc) = state.documents.get_mut(path) {
                doc.status = DocStatus::Error;
                doc.last_error = Some(message.to_string());
            }
        }
        self.schedule_save();
    }

    pub fn counts(&self) -> DocCounts {
        let state = self.lock();
        let mut counts = DocCounts {
            total: state.documents.len(),
            ..DocCounts::default()
        };
        for doc in state.documents.values() {
            match doc.status {
                DocStatus::Ready => counts.ready += 1,
                DocStatus::Pending => counts.pending += 1,
                DocStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Adds a queue entry for `path`, replacing any prior entry for the
    /// same path. Returns the stored entry.
    pub fn enqueue(
        self: &Arc<Self>,
        path: &str,
        op: QueueOp,
        content_fingerprint: Option<String>,
        remote_id: Option<String>,
        delay_ms: i64,
    ) -> QueueEntry {
        let entry = {
            let mut state = self.lock();
            state.next_entry_id += 1;
            let now = now_ms();
            let entry = QueueEntry {
                id: state.next_entry_id,
                path: path.to_string(),
                op,
                content_fingerprint,
                remote_id,
                enqueued_ms: now,
                ready_ms: now + delay_ms.max(0),
                attempts: 0,
                last_attempt_ms: None,
            };
            state.queue.insert(path.to_string(), entry.clone());
            entry
        };
        self.schedule_save();
        entry
    }

    pub fn get_entry(&self, path: &str) -> Option<QueueEntry> {
        self.lock().queue.get(path).cloned()
    }

    pub fn remove_entry(self: &Arc<Self>, path: &str) -> Option<QueueEntry> {
        let removed = self.lock().queue.remove(path);
        if removed.is_some() {
            self.schedule_save();
        }
        removed
    }

    /// Removes the entry for `path` only when the persisted entry still
    /// carries `id`. Ids are strictly increasing, so this exactly detects
    /// entries superseded mid-flight.
    pub fn remove_entry_if_current(self: &Arc<Self>, path: &str, id: u64) -> bool {
        let removed = {
            let mut state = self.lock();
            match state.queue.get(path) {
                Some(current) if current.id == id => {
                    state.queue.remove(path);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.schedule_save();
        }
        removed
    }

    /// Stamps an attempt on the persisted entry. A zero-progress attempt
    /// (no network call made) updates the timestamp without consuming one
    /// of the retry attempts.
    pub fn record_attempt(self: &Arc<Self>, path: &str, progressed: bool) {
        {
            let mut state = self.lock();
            if let Some(entry) = state.queue.get_mut(path) {
                if progressed {
                    entry.attempts += 1;
                }
                entry.last_attempt_ms = Some(now_ms());
            }
        }
        self.schedule_save();
    }

    pub fn entries_snapshot(&self) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> = self.lock().queue.values().cloned().collect();
        entries.sort_by_key(|entry| (entry.ready_ms, entry.enqueued_ms, entry.id));
        entries
    }

    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn clear_queue(self: &Arc<Self>) {
        self.lock().queue.clear();
        self.schedule_save();
    }

    pub fn clear_documents(self: &Arc<Self>) {
        self.lock().documents.clear();
        self.schedule_save();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_doc() -> DocumentState {
        DocumentState {
            remote_id: Some("doc-1".into()),
            content_fingerprint: "f1".into(),
            path_fingerprint: "p1".into(),
            status: DocStatus::Ready,
            local_modified_ms: 1,
            last_indexed_ms: Some(2),
            tags: vec!["alpha".into()],
            last_error: None,
        }
    }

    #[tokio::test]
    async fn enqueue_supersedes_prior_entry_for_same_path() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();

        let first = store.enqueue("Notes/A.md", QueueOp::Upload, Some("f1".into()), None, 0);
        let second = store.enqueue("Notes/A.md", QueueOp::Delete, None, Some("doc-1".into()), 0);

        assert_eq!(store.queue_len(), 1);
        let stored = store.get_entry("Notes/A.md").unwrap();
        assert_eq!(stored.op, QueueOp::Delete);
        assert_eq!(stored.id, second.id);
        assert_ne!(stored.id, first.id);
    }

    #[tokio::test]
    async fn remove_entry_if_current_ignores_superseded_entries() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();

        let first = store.enqueue("A.md", QueueOp::Upload, None, None, 0);
        // Supersession within the same millisecond still changes the id.
        let second = store.enqueue("A.md", QueueOp::Delete, None, Some("doc-1".into()), 0);

        assert!(!store.remove_entry_if_current("A.md", first.id));
        assert_eq!(store.queue_len(), 1);
        assert!(store.remove_entry_if_current("A.md", second.id));
        assert_eq!(store.queue_len(), 0);
    }

    #[tokio::test]
    async fn cached_store_id_survives_reload() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        assert!(store.cached_store_id().is_none());
        store.set_store_id("store-7");
        store.flush().unwrap();

        let reloaded = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        assert_eq!(reloaded.cached_store_id().as_deref(), Some("store-7"));
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        store.upsert_doc("Notes/A.md", sample_doc());
        store.enqueue("Notes/B.md", QueueOp::Upload, Some("f2".into()), None, 0);
        store.flush().unwrap();

        let reloaded = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        assert_eq!(reloaded.get_doc("Notes/A.md"), Some(sample_doc()));
        let entry = reloaded.get_entry("Notes/B.md").unwrap();
        assert_eq!(entry.op, QueueOp::Upload);
        assert_eq!(entry.content_fingerprint.as_deref(), Some("f2"));
    }

    #[tokio::test]
    async fn different_roots_use_different_state_files() {
        let dir = tempdir().unwrap();
        let a = StateStore::open(dir.path(), Path::new("/vault-a")).unwrap();
        a.upsert_doc("A.md", sample_doc());
        a.flush().unwrap();

        let b = StateStore::open(dir.path(), Path::new("/vault-b")).unwrap();
        assert!(b.get_doc("A.md").is_none());
    }

    #[tokio::test]
    async fn counts_aggregate_statuses() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        store.upsert_doc("A.md", sample_doc());
        let mut pending = sample_doc();
        pending.status = DocStatus::Pending;
        store.upsert_doc("B.md", pending);
        store.set_doc_error("A.md", "boom");

        let counts = store.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.error, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.ready, 0);
        assert_eq!(
            store.get_doc("A.md").unwrap().last_error.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn entries_snapshot_orders_by_ready_time() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path(), Path::new("/vault")).unwrap();
        store.enqueue("later.md", QueueOp::Upload, None, None, 5_000);
        store.enqueue("soon.md", QueueOp::Upload, None, None, 0);

        let snapshot = store.entries_snapshot();
        assert_eq!(snapshot[0].path, "soon.md");
        assert_eq!(snapshot[1].path, "later.md");
    }
}
