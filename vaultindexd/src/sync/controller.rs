use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use super::janitor::{DedupProgress, DedupReport, Janitor};
use super::queue::PersistentQueue;
use super::reconcile::{EngineError, ReconcileSummary, Reconciler};
use super::state::{DocCounts, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Idle,
    Scanning,
    Indexing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub phase: IndexPhase,
    pub counts: DocCounts,
    pub message: String,
}

/// Thin phase machine over the reconciler and queue; the public surface
/// the host application drives.
pub struct IndexingController {
    reconciler: Arc<Reconciler>,
    janitor: Janitor,
    queue: Arc<PersistentQueue>,
    state: Arc<StateStore>,
    phase: Mutex<IndexPhase>,
    progress_tx: watch::Sender<ProgressEvent>,
}

impl IndexingController {
    pub fn new(
        reconciler: Arc<Reconciler>,
        janitor: Janitor,
        queue: Arc<PersistentQueue>,
        state: Arc<StateStore>,
    ) -> Arc<Self> {
        let (progress_tx, _) = watch::channel(ProgressEvent {
            phase: IndexPhase::Idle,
            counts: state.counts(),
            message: "idle".to_string(),
        });
        Arc::new(Self {
            reconciler,
            janitor,
            queue,
            state,
            phase: Mutex::new(IndexPhase::Idle),
            progress_tx,
        })
    }

    fn lock_phase(&self) -> MutexGuard<'_, IndexPhase> {
        self.phase.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> IndexPhase {
        *self.lock_phase()
    }

    pub fn stats(&self) -> DocCounts {
        self.state.counts()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressEvent> {
        self.progress_tx.subscribe()
    }

    fn publish(&self, phase: IndexPhase, message: &str) {
        let _ = self.progress_tx.send(ProgressEvent {
            phase,
            counts: self.state.counts(),
            message: message.to_string(),
        });
    }

    /// Idle → Scanning → (Indexing | Idle). A no-op unless idle.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        {
            let mut phase = self.lock_phase();
            if *phase != IndexPhase::Idle {
                return Ok(());
            }
            *phase = IndexPhase::Scanning;
        }
        self.publish(IndexPhase::Scanning, "scanning vault");

        let summary = self.reconciler.reconcile(false).await?;
        if self.state.queue_len() > 0 {
            *self.lock_phase() = IndexPhase::Indexing;
            self.publish(
                IndexPhase::Indexing,
                &format!("indexing {} queued changes", summary.queued_uploads + summary.queued_deletes),
            );
            self.queue.notify_changed();
            self.watch_for_idle();
        } else {
            *self.lock_phase() = IndexPhase::Idle;
            self.publish(IndexPhase::Idle, "idle");
        }
        Ok(())
    }

    // Flips Indexing back to Idle once the queue drains.
    fn watch_for_idle(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.queue.wait_for_idle().await;
            let flipped = {
                let mut phase = controller.lock_phase();
                if *phase == IndexPhase::Indexing {
                    *phase = IndexPhase::Idle;
                    true
                } else {
                    false
                }
            };
            if flipped {
                controller.publish(IndexPhase::Idle, "idle");
            }
        });
    }

    /// Any active phase → Paused; queue entries are retained.
    pub fn pause(&self) {
        let paused = {
            let mut phase = self.lock_phase();
            if matches!(*phase, IndexPhase::Scanning | IndexPhase::Indexing) {
                *phase = IndexPhase::Paused;
                true
            } else {
                false
            }
        };
        if paused {
            self.queue.pause();
            self.publish(IndexPhase::Paused, "paused");
        }
    }

    pub fn resume(self: &Arc<Self>) {
        {
            let phase = self.lock_phase();
            if *phase != IndexPhase::Paused {
                return;
            }
        }
        self.queue.resume();
        let next = if self.state.queue_len() > 0 {
            IndexPhase::Indexing
        } else {
            IndexPhase::Idle
        };
        *self.lock_phase() = next;
        self.publish(next, if next == IndexPhase::Indexing { "indexing" } else { "idle" });
        if next == IndexPhase::Indexing {
            self.queue.notify_changed();
            self.watch_for_idle();
        }
    }

    /// Terminal for the current run: drops scheduling, zeroes the
    /// reported stats. Persisted entries survive for the next start.
    pub fn stop(self: &Arc<Self>) {
        self.queue.clear();
        self.queue.resume();
        *self.lock_phase() = IndexPhase::Idle;
        let _ = self.progress_tx.send(ProgressEvent {
            phase: IndexPhase::Idle,
            counts: DocCounts::default(),
            message: "stopped".to_string(),
        });
    }

    pub async fn run_full_reconcile(&self) -> Result<ReconcileSummary, EngineError> {
        self.reconciler.reconcile(false).await
    }

    pub async fn rebuild_index(self: &Arc<Self>) -> Result<ReconcileSummary, EngineError> {
        let summary = self.reconciler.rebuild_index().await?;
        if self.state.queue_len() > 0 {
            *self.lock_phase() = IndexPhase::Indexing;
            self.publish(IndexPhase::Indexing, "rebuilding index");
            self.watch_for_idle();
        }
        Ok(summary)
    }

    pub async fn cleanup_orphans(&self) -> Result<usize, EngineError> {
        self.reconciler.cleanup_orphans().await
    }

    pub async fn run_deduplication<F>(&self, progress: F) -> Result<DedupReport, EngineError>
    where
        F: FnMut(DedupProgress),
    {
        self.janitor.run_deduplication(progress).await
    }
}
