use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::backoff::Backoff;
use super::connectivity::ConnectivityMonitor;
use super::ops::{FailureKind, QueueOps};
use super::state::{QueueEntry, QueueOp, StateStore, now_ms};

/// Initial attempt plus this many backoff retries for transient failures.
const MAX_RETRIES: u32 = 3;

struct QueueInner {
    paused: bool,
    generation: u64,
    in_flight: HashSet<String>,
    tasks: HashMap<String, JoinHandle<()>>,
    timer_deadline_ms: Option<i64>,
}

/// Dispatches persisted queue entries up to the configured concurrency
/// limit. The entries themselves live in the state store; this type only
/// holds in-memory scheduling, so a restart loses no queued work.
pub struct PersistentQueue {
    state: Arc<StateStore>,
    connectivity: Arc<ConnectivityMonitor>,
    ops: QueueOps,
    retry: Backoff,
    inner: Mutex<QueueInner>,
    idle_notify: Notify,
}

impl PersistentQueue {
    pub fn new(
        state: Arc<StateStore>,
        connectivity: Arc<ConnectivityMonitor>,
        ops: QueueOps,
    ) -> Arc<Self> {
        Self::with_retry(state, connectivity, ops, Backoff::retry_schedule())
    }

    pub fn with_retry(
        state: Arc<StateStore>,
        connectivity: Arc<ConnectivityMonitor>,
        ops: QueueOps,
        retry: Backoff,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            connectivity,
            ops,
            retry,
            inner: Mutex::new(QueueInner {
                paused: false,
                generation: 0,
                in_flight: HashSet::new(),
                tasks: HashMap::new(),
                timer_deadline_ms: None,
            }),
            idle_notify: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Re-scans the persisted entry list and schedules eligible work.
    /// Idempotent; safe to call on every state change.
    pub fn notify_changed(self: &Arc<Self>) {
        self.schedule();
    }

    pub fn pause(&self) {
        {
            let mut inner = self.lock();
            inner.paused = true;
            inner.generation += 1;
            inner.timer_deadline_ms = None;
        }
        self.idle_notify.notify_waiters();
    }

    pub fn resume(self: &Arc<Self>) {
        {
            let mut inner = self.lock();
            inner.paused = false;
        }
        self.schedule();
    }

    /// Drops in-flight scheduling without touching persisted entries.
    pub fn clear(&self) {
        {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.timer_deadline_ms = None;
            inner.in_flight.clear();
            for (_, task) in inner.tasks.drain() {
                task.abort();
            }
        }
        self.idle_notify.notify_waiters();
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Resolves once nothing is in flight and no further dispatch can
    /// happen right now (queue drained, paused, or disconnected).
    pub async fn wait_for_idle(&self) {
        loop {
            let notified = self.idle_notify.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn is_idle(&self) -> bool {
        let inner = self.lock();
        if !inner.in_flight.is_empty() {
            return false;
        }
        if inner.paused || !self.connectivity.state().connected {
            return true;
        }
        self.state.queue_len() == 0
    }

    fn schedule(self: &Arc<Self>) {
        let now = now_ms();
        {
            let mut inner = self.lock();
            if !inner.paused && self.connectivity.state().connected {
                let limit = self.state.settings().max_concurrent_uploads.max(1);
                let mut earliest: Option<i64> = None;
                for entry in self.state.entries_snapshot() {
                    if inner.in_flight.len() >= limit {
                        break;
                    }
                    if inner.in_flight.contains(&entry.path) {
                        continue;
                    }
                    if entry.ready_ms > now {
                        earliest =
                            Some(earliest.map_or(entry.ready_ms, |cur| cur.min(entry.ready_ms)));
                        continue;
                    }
                    self.spawn_entry(&mut inner, entry);
                }
                if let Some(deadline) = earliest {
                    self.arm_timer(&mut inner, deadline, now);
                }
            }
        }
        self.idle_notify.notify_waiters();
    }

    fn spawn_entry(self: &Arc<Self>, inner: &mut QueueInner, entry: QueueEntry) {
        let path = entry.path.clone();
        inner.in_flight.insert(path.clone());
        let generation = inner.generation;
        let queue = Arc::clone(self);
        let task = tokio::spawn(async move {
            let path = entry.path.clone();
            queue.process_entry(entry).await;
            let reschedule = {
                let mut inner = queue.lock();
                inner.in_flight.remove(&path);
                inner.tasks.remove(&path);
                inner.generation == generation
            };
            queue.idle_notify.notify_waiters();
            if reschedule {
                queue.schedule();
            }
        });
        inner.tasks.insert(path, task);
    }

    // One timer for the earliest pending ready-at, not one per entry.
    fn arm_timer(self: &Arc<Self>, inner: &mut QueueInner, deadline: i64, now: i64) {
        let replace = match inner.timer_deadline_ms {
            None => true,
            Some(current) => deadline < current,
        };
        if !replace {
            return;
        }
        inner.timer_deadline_ms = Some(deadline);
        let generation = inner.generation;
        let queue = Arc::clone(self);
        let wait = Duration::from_millis(deadline.saturating_sub(now).max(0) as u64);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let fire = {
                let mut inner = queue.lock();
                if inner.generation != generation {
                    false
                } else {
                    inner.timer_deadline_ms = None;
                    true
                }
            };
            if fire {
                queue.schedule();
            }
        });
    }

    async fn process_entry(&self, entry: QueueEntry) {
        for attempt in 0..=MAX_RETRIES {
            if !self.connectivity.state().connected {
                // Zero-progress attempt: the entry stays queued for the
                // next notify_changed after reconnect.
                self.state.record_attempt(&entry.path, false);
                eprintln!(
                    "[vaultindexd] queue: waiting for connection, {} entries held",
                    self.state.queue_len()
                );
                return;
            }

            self.state.record_attempt(&entry.path, true);
            match self.ops.run(&entry).await {
                Ok(()) => {
                    self.connectivity.report_online();
                    self.finish_entry(&entry);
                    eprintln!("[vaultindexd] op done: {:?} {}", entry.op, entry.path);
                    return;
                }
                Err(err) => {
                    if err.is_transport() {
                        self.connectivity.report_offline();
                    }
                    match err.kind() {
                        FailureKind::Auth => {
                            self.connectivity
                                .set_credential_valid(false, Some(err.to_string()));
                            eprintln!(
                                "[vaultindexd] op halted until credentials are fixed: {:?} {} err={}",
                                entry.op, entry.path, err
                            );
                            return;
                        }
                        FailureKind::Transient => {
                            if attempt >= MAX_RETRIES {
                                self.fail_entry(&entry, &err.to_string());
                                return;
                            }
                            eprintln!(
                                "[vaultindexd] op retrying: {:?} {} attempt={} err={}",
                                entry.op,
                                entry.path,
                                attempt + 1,
                                err
                            );
                            tokio::time::sleep(self.retry.delay(attempt)).await;
                        }
                        FailureKind::Terminal => {
                            self.fail_entry(&entry, &err.to_string());
                            return;
                        }
                    }
                }
            }
        }
    }

    // Removal is guarded by the entry id: a rename or delete that
    // superseded this entry mid-flight keeps its own entry.
    fn finish_entry(&self, entry: &QueueEntry) {
        self.state.remove_entry_if_current(&entry.path, entry.id);
    }

    fn fail_entry(&self, entry: &QueueEntry, message: &str) {
        if entry.op == QueueOp::Upload {
            self.state.set_doc_error(&entry.path, message);
        }
        self.finish_entry(entry);
        eprintln!(
            "[vaultindexd] op failed: {:?} {} err={}",
            entry.op, entry.path, message
        );
    }
}
