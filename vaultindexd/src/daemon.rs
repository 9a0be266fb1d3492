use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use vaultindex_core::IndexClient;

use crate::sync::connectivity::ConnectivityMonitor;
use crate::sync::controller::IndexingController;
use crate::sync::janitor::Janitor;
use crate::sync::local_watcher::{LocalEvent, start_notify_watcher};
use crate::sync::ops::QueueOps;
use crate::sync::queue::PersistentQueue;
use crate::sync::reconcile::Reconciler;
use crate::sync::replace::DocumentReplacer;
use crate::sync::state::{StateStore, collection_id};
use crate::sync::vault::LocalVault;

const DEFAULT_STORE_NAME: &str = "vaultindex";
const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_RECONCILE_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub vault_root: PathBuf,
    pub state_dir: PathBuf,
    pub api_base_url: Option<String>,
    pub api_key: String,
    pub store_name: String,
    pub include_paths: Vec<String>,
    pub max_concurrent_uploads: usize,
    pub reconcile_interval: Duration,
    pub enable_local_watcher: bool,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let vault_root = std::env::var("VAULTINDEX_ROOT")
            .map(PathBuf::from)
            .context("VAULTINDEX_ROOT is not set")?;
        let api_key = std::env::var("VAULTINDEX_API_KEY")
            .context("VAULTINDEX_API_KEY is not set")?;
        let state_dir = std::env::var("VAULTINDEX_STATE_DIR")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("vaultindex")))
            .context("no usable state directory; set VAULTINDEX_STATE_DIR")?;
        let api_base_url = std::env::var("VAULTINDEX_API_BASE").ok();
        let store_name = std::env::var("VAULTINDEX_STORE")
            .unwrap_or_else(|_| DEFAULT_STORE_NAME.to_string());
        let include_paths = std::env::var("VAULTINDEX_INCLUDE")
            .map(|value| {
                value
                    .split(':')
                    .filter(|part| !part.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let max_concurrent_uploads =
            read_usize_env("VAULTINDEX_MAX_CONCURRENT", DEFAULT_MAX_CONCURRENT);
        let reconcile_interval = Duration::from_secs(read_u64_env(
            "VAULTINDEX_RECONCILE_SECS",
            DEFAULT_RECONCILE_SECS,
        ));
        let enable_local_watcher = read_bool_env("VAULTINDEX_ENABLE_WATCHER", true);

        Ok(Self {
            vault_root,
            state_dir,
            api_base_url,
            api_key,
            store_name,
            include_paths,
            max_concurrent_uploads,
            reconcile_interval,
            enable_local_watcher,
        })
    }
}

/// Composition root: every collaborator is constructed and wired here,
/// nothing is ambient.
pub struct DaemonRuntime {
    config: DaemonConfig,
    vault: Arc<LocalVault>,
    state: Arc<StateStore>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<PersistentQueue>,
    reconciler: Arc<Reconciler>,
    controller: Arc<IndexingController>,
}

impl std::fmt::Debug for DaemonRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let client = match config.api_base_url.as_deref() {
            Some(base) => IndexClient::with_base_url(base, config.api_key.clone()),
            None => IndexClient::new(config.api_key.clone()),
        }
        .context("failed to construct index client")?;

        let state = StateStore::open(&config.state_dir, &config.vault_root)
            .context("failed to open state store")?;
        let mut settings = state.settings();
        settings.store_name = config.store_name.clone();
        settings.include_paths = config.include_paths.clone();
        settings.max_concurrent_uploads = config.max_concurrent_uploads;
        state.update_settings(settings.clone());

        let connectivity = Arc::new(ConnectivityMonitor::new());

        // An unreachable remote must not keep the daemon down: fall back
        // to the store id cached from the last successful resolution and
        // let the queue hold work until connectivity returns.
        let store_id = match client.create_or_find_store(&settings.store_name).await {
            Ok(id) => {
                state.set_store_id(&id);
                id
            }
            Err(err) if err.is_retryable() => match state.cached_store_id() {
                Some(id) => {
                    connectivity.report_offline();
                    eprintln!(
                        "[vaultindexd] remote store unreachable, starting offline with cached id: {err}"
                    );
                    id
                }
                None => {
                    return Err(anyhow::Error::from(err)
                        .context("failed to resolve remote store and no cached id exists"));
                }
            },
            Err(err) => {
                return Err(anyhow::Error::from(err).context("failed to resolve remote store"));
            }
        };
        if connectivity.state().connected {
            match client.get_store_stats(&store_id).await {
                Ok(stats) => eprintln!(
                    "[vaultindexd] remote store {}: {} documents, {} bytes",
                    settings.store_name, stats.document_count, stats.total_size_bytes
                ),
                Err(err) => eprintln!("[vaultindexd] store stats unavailable: {err}"),
            }
        }

        let vault = Arc::new(LocalVault::new(
            config.vault_root.clone(),
            settings.include_paths.clone(),
        ));
        let vault_id = collection_id(&config.vault_root);

        let replacer = DocumentReplacer::new(client.clone(), store_id.clone());
        let ops = QueueOps::new(
            Arc::clone(&state),
            Arc::clone(&vault),
            replacer,
            client.clone(),
            vault_id,
        );
        let queue = PersistentQueue::new(Arc::clone(&state), Arc::clone(&connectivity), ops);

        // Reconnects and restored credentials kick the queue back into
        // motion without waiting for the next reconcile.
        let queue_for_monitor = Arc::clone(&queue);
        connectivity.subscribe(move |snapshot| {
            if snapshot.connected {
                queue_for_monitor.notify_changed();
            }
        });

        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&state),
            Arc::clone(&vault),
            client.clone(),
            store_id.clone(),
            Arc::clone(&queue),
            Arc::clone(&connectivity),
        ));
        let janitor = Janitor::new(client, store_id, Arc::clone(&state));
        let controller = IndexingController::new(
            Arc::clone(&reconciler),
            janitor,
            Arc::clone(&queue),
            Arc::clone(&state),
        );

        Ok(Self {
            config,
            vault,
            state,
            connectivity,
            queue,
            reconciler,
            controller,
        })
    }

    pub fn controller(&self) -> Arc<IndexingController> {
        Arc::clone(&self.controller)
    }

    /// One-shot mode helper: process whatever is queued, then persist.
    pub async fn drain_queue(&self) {
        self.queue.notify_changed();
        self.queue.wait_for_idle().await;
        if let Err(err) = self.state.flush() {
            eprintln!("[vaultindexd] failed to flush state: {err}");
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        eprintln!(
            "[vaultindexd] started: vault={}, store={}, watcher={}",
            self.config.vault_root.display(),
            self.state.settings().store_name,
            if self.config.enable_local_watcher {
                "enabled"
            } else {
                "disabled"
            }
        );

        let (_watcher, mut local_rx) = if self.config.enable_local_watcher {
            match start_notify_watcher(&self.vault) {
                Ok((watcher, rx)) => (Some(watcher), Some(rx)),
                Err(err) => {
                    eprintln!("[vaultindexd] warning: failed to start local watcher: {err}");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let reconciler_for_events = Arc::clone(&self.reconciler);
        let event_handle = local_rx.take().map(|mut rx| {
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let result = match event {
                        LocalEvent::Created(path) => {
                            reconciler_for_events.on_create(&path).await
                        }
                        LocalEvent::Modified(path) => {
                            reconciler_for_events.on_modify(&path).await
                        }
                        LocalEvent::Renamed { from, to } => {
                            reconciler_for_events.on_rename(&to, &from).await
                        }
                        LocalEvent::Deleted(path) => {
                            reconciler_for_events.on_delete(&path);
                            Ok(())
                        }
                    };
                    if let Err(err) = result {
                        eprintln!("[vaultindexd] event handling failed: {err}");
                    }
                }
            })
        });

        let controller_for_interval = Arc::clone(&self.controller);
        let reconcile_interval = self.config.reconcile_interval;
        let interval_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(reconcile_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = controller_for_interval.run_full_reconcile().await {
                    eprintln!("[vaultindexd] periodic reconcile failed: {err}");
                }
            }
        });

        self.controller.start().await?;

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        eprintln!("[vaultindexd] shutting down");

        interval_handle.abort();
        if let Some(handle) = event_handle {
            handle.abort();
        }
        self.queue.pause();
        self.state.flush().context("failed to flush state on shutdown")?;
        Ok(())
    }
}

fn read_usize_env(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}
