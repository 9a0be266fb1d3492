use std::collections::HashMap;
use std::sync::Arc;

use vaultindex_core::{IndexClient, RemoteDocument};

use super::reconcile::EngineError;
use super::state::{DocumentState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPhase {
    Fetching,
    Analyzing,
    Deleting,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupProgress {
    pub phase: DedupPhase,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub total_remote_documents: usize,
    pub total_removed: usize,
}

/// Batch pass over the entire remote store. Local document state is
/// ground truth: duplicates of tracked documents, groups no longer
/// tracked, and documents without owner metadata are all removed.
///
/// Assumes exclusive ownership of the store — anything another writer
/// put there without owner metadata will be deleted. That is a policy
/// choice, not an accident; the pass logs what it removes.
pub struct Janitor {
    client: IndexClient,
    store_id: String,
    state: Arc<StateStore>,
}

impl Janitor {
    pub fn new(client: IndexClient, store_id: String, state: Arc<StateStore>) -> Self {
        Self {
            client,
            store_id,
            state,
        }
    }

    pub async fn run_deduplication<F>(&self, mut progress: F) -> Result<DedupReport, EngineError>
    where
        F: FnMut(DedupProgress),
    {
        let documents = self
            .client
            .list_all_documents(&self.store_id, |fetched| {
                progress(DedupProgress {
                    phase: DedupPhase::Fetching,
                    current: fetched,
                    total: 0,
                    message: format!("fetched {fetched} remote documents"),
                });
            })
            .await?;
        let total = documents.len();

        progress(DedupProgress {
            phase: DedupPhase::Analyzing,
            current: 0,
            total,
            message: "grouping documents by owner".to_string(),
        });
        let stale = self.collect_stale(documents);

        progress(DedupProgress {
            phase: DedupPhase::Deleting,
            current: 0,
            total: stale.len(),
            message: format!("removing {} stale documents", stale.len()),
        });
        let mut removed = 0;
        for (index, document) in stale.iter().enumerate() {
            match self.client.delete_document(&document.id).await {
                Ok(()) => removed += 1,
                Err(err) if err.is_not_found() => removed += 1,
                // One bad delete never aborts the batch.
                Err(err) => {
                    eprintln!(
                        "[vaultindexd] dedup: failed to delete {}: {err}",
                        document.id
                    );
                }
            }
            progress(DedupProgress {
                phase: DedupPhase::Deleting,
                current: index + 1,
                total: stale.len(),
                message: format!("removed {removed} of {} stale documents", stale.len()),
            });
        }

        let report = DedupReport {
            total_remote_documents: total,
            total_removed: removed,
        };
        progress(DedupProgress {
            phase: DedupPhase::Complete,
            current: removed,
            total,
            message: format!(
                "dedup complete: {removed} removed of {total} remote documents"
            ),
        });
        Ok(report)
    }

    fn collect_stale(&self, documents: Vec<RemoteDocument>) -> Vec<RemoteDocument> {
        let local_by_path_fingerprint: HashMap<String, DocumentState> = self
            .state
            .documents_snapshot()
            .into_iter()
            .map(|(_, doc)| (doc.path_fingerprint.clone(), doc))
            .collect();

        let mut groups: HashMap<String, Vec<RemoteDocument>> = HashMap::new();
        let mut stale = Vec::new();
        for document in documents {
            match document.owner_path_fingerprint().map(str::to_string) {
                Some(fingerprint) => groups.entry(fingerprint).or_default().push(document),
                // No owner metadata: definitely not ours to keep.
                None => stale.push(document),
            }
        }
        if !stale.is_empty() {
            eprintln!(
                "[vaultindexd] dedup: removing {} documents without owner metadata",
                stale.len()
            );
        }

        for (fingerprint, group) in groups {
            let tracked_id = local_by_path_fingerprint
                .get(&fingerprint)
                .and_then(|doc| doc.remote_id.clone());
            let keep = tracked_id
                .as_deref()
                .filter(|id| group.iter().any(|doc| doc.id == *id));
            match keep {
                // Keep the tracked copy, everything else in the group is
                // a stale duplicate.
                Some(keep_id) => {
                    let keep_id = keep_id.to_string();
                    stale.extend(group.into_iter().filter(|doc| doc.id != keep_id));
                }
                // Untracked path or tracked id missing from the group:
                // the whole group is stale.
                None => stale.extend(group),
            }
        }
        stale
    }
}
