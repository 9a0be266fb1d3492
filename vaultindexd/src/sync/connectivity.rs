use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

/// Derived connection snapshot. `connected` is always
/// `online && credential_valid`, recomputed before every notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub online: bool,
    pub credential_valid: bool,
    pub credential_error: Option<String>,
    pub connected: bool,
}

impl ConnectionState {
    fn derive(online: bool, credential_valid: bool, credential_error: Option<String>) -> Self {
        Self {
            online,
            credential_valid,
            credential_error,
            connected: online && credential_valid,
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        // Optimistic until a network operation says otherwise.
        Self::derive(true, true, None)
    }
}

type Listener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct MonitorInner {
    state: ConnectionState,
    listeners: HashMap<u64, Listener>,
    next_id: u64,
}

/// Tracks online/offline and credential validity; gates all network work
/// through the derived `connected` flag.
pub struct ConnectivityMonitor {
    inner: Mutex<MonitorInner>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MonitorInner {
                state: ConnectionState::default(),
                listeners: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    pub fn report_online(&self) {
        self.set_online(true);
    }

    pub fn report_offline(&self) {
        self.set_online(false);
    }

    fn set_online(&self, online: bool) {
        let notification = {
            let mut inner = self.lock();
            if inner.state.online == online {
                return;
            }
            inner.state = ConnectionState::derive(
                online,
                inner.state.credential_valid,
                inner.state.credential_error.clone(),
            );
            (inner.state.clone(), Self::listener_snapshot(&inner))
        };
        Self::notify(notification);
    }

    pub fn set_credential_valid(&self, valid: bool, reason: Option<String>) {
        let notification = {
            let mut inner = self.lock();
            let error = if valid { None } else { reason };
            if inner.state.credential_valid == valid && inner.state.credential_error == error {
                return;
            }
            inner.state = ConnectionState::derive(inner.state.online, valid, error);
            (inner.state.clone(), Self::listener_snapshot(&inner))
        };
        Self::notify(notification);
    }

    /// Registers `listener`, invoking it immediately with the current
    /// snapshot and again on every subsequent transition.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        let (id, state) = {
            let mut inner = self.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.listeners.insert(id, Arc::clone(&listener));
            (id, inner.state.clone())
        };
        Self::invoke(&listener, &state);
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().listeners.remove(&id.0);
    }

    fn listener_snapshot(inner: &MonitorInner) -> Vec<Listener> {
        inner.listeners.values().cloned().collect()
    }

    fn notify((state, listeners): (ConnectionState, Vec<Listener>)) {
        for listener in listeners {
            Self::invoke(&listener, &state);
        }
    }

    // A panicking listener must not block the others.
    fn invoke(listener: &Listener, state: &ConnectionState) {
        let result = catch_unwind(AssertUnwindSafe(|| listener(state)));
        if result.is_err() {
            eprintln!("[vaultindexd] connectivity listener panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn connected_is_online_and_credential_valid() {
        let monitor = ConnectivityMonitor::new();
        assert!(monitor.state().connected);

        monitor.report_offline();
        assert!(!monitor.state().connected);

        monitor.report_online();
        monitor.set_credential_valid(false, Some("expired key".into()));
        let state = monitor.state();
        assert!(state.online);
        assert!(!state.connected);
        assert_eq!(state.credential_error.as_deref(), Some("expired key"));

        monitor.set_credential_valid(true, None);
        assert!(monitor.state().connected);
        assert!(monitor.state().credential_error.is_none());
    }

    #[test]
    fn subscribe_fires_immediately_and_on_transitions() {
        let monitor = ConnectivityMonitor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = monitor.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        monitor.report_offline();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Idempotent report: no transition, no notification.
        monitor.report_offline();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        monitor.unsubscribe(id);
        monitor.report_online();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let monitor = ConnectivityMonitor::new();
        monitor.subscribe(|state| {
            if !state.online {
                panic!("listener bug");
            }
        });
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        monitor.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        monitor.report_offline();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
