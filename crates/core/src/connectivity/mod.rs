//! Connectivity monitor.
//!
//! The environment pushes online/offline transitions; the outcome of real application
//! requests refines them. A request that fails while the environment claims to be
//! online puts the monitor in `Degraded`, and the first success afterwards brings it
//! back to `Online`. Nothing here resolves hostnames: a cached DNS answer says nothing
//! about whether the request path works.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;

/// Effective connectivity as seen by sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    /// The environment reports a network but application requests are failing.
    Degraded,
    Offline,
}

impl ConnectivityState {
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }
}

type Listener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

struct MonitorInner {
    environment_online: bool,
    request_failing: bool,
    next_listener_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

impl MonitorInner {
    fn effective(&self) -> ConnectivityState {
        match (self.environment_online, self.request_failing) {
            (false, _) => ConnectivityState::Offline,
            (true, true) => ConnectivityState::Degraded,
            (true, false) => ConnectivityState::Online,
        }
    }
}

struct MonitorShared {
    inner: Mutex<MonitorInner>,
    state_tx: watch::Sender<ConnectivityState>,
}

impl MonitorShared {
    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        // Callbacks never run under this lock; a poisoned guard still holds valid state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide connectivity tracker. Construct one per application instance and
/// share it through `Arc`.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    shared: Arc<MonitorShared>,
}

impl ConnectivityMonitor {
    pub fn new(environment_online: bool) -> Self {
        let inner = MonitorInner {
            environment_online,
            request_failing: false,
            next_listener_id: 0,
            listeners: BTreeMap::new(),
        };
        let (state_tx, _) = watch::channel(inner.effective());
        Self {
            shared: Arc::new(MonitorShared {
                inner: Mutex::new(inner),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.shared.lock().effective()
    }

    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Whether the environment itself reports a network, regardless of request health.
    pub fn environment_online(&self) -> bool {
        self.shared.lock().environment_online
    }

    /// Environment-level online/offline notification.
    pub fn set_environment_online(&self, online: bool) {
        self.update(|inner| {
            inner.environment_online = online;
            if online {
                // A new online signal clears any earlier request failure.
                inner.request_failing = false;
            }
        });
    }

    /// A real application request reached the remote and got an answer.
    pub fn record_request_success(&self) {
        self.update(|inner| inner.request_failing = false);
    }

    /// A real application request failed on the network path.
    pub fn record_request_failure(&self) {
        self.update(|inner| inner.request_failing = true);
    }

    /// Register a callback invoked on every change of the effective state.
    ///
    /// The callback stays registered until the returned `Subscription` is
    /// unsubscribed or dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let mut inner = self.shared.lock();
        inner.next_listener_id += 1;
        let id = inner.next_listener_id;
        inner.listeners.insert(id, Arc::new(callback));
        Subscription {
            id,
            monitor: Arc::downgrade(&self.shared),
        }
    }

    /// Async view of the effective state for long-running tasks.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.shared.state_tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }

    fn update(&self, mutate: impl FnOnce(&mut MonitorInner)) {
        let (previous, current, listeners) = {
            let mut inner = self.shared.lock();
            let previous = inner.effective();
            mutate(&mut inner);
            let current = inner.effective();
            let listeners: Vec<Listener> = if previous != current {
                // Published under the lock so concurrent updates reach the watch in order.
                self.shared.state_tx.send_replace(current);
                inner.listeners.values().cloned().collect()
            } else {
                Vec::new()
            };
            (previous, current, listeners)
        };

        if previous == current {
            return;
        }

        match current {
            ConnectivityState::Online => info!("[Connectivity] {:?} -> online", previous),
            ConnectivityState::Degraded => {
                info!("[Connectivity] requests failing; treating network as degraded")
            }
            ConnectivityState::Offline => info!("[Connectivity] {:?} -> offline", previous),
        }

        debug!("[Connectivity] notifying {} listener(s)", listeners.len());
        for listener in listeners {
            listener(current);
        }
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Handle to a registered connectivity callback.
pub struct Subscription {
    id: u64,
    monitor: Weak<MonitorShared>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.monitor.upgrade() {
            shared.lock().listeners.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder(monitor: &ConnectivityMonitor) -> (Subscription, Arc<Mutex<Vec<ConnectivityState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = monitor.subscribe(move |state| sink.lock().unwrap().push(state));
        (subscription, seen)
    }

    #[test]
    fn request_failure_degrades_until_next_success() {
        let monitor = ConnectivityMonitor::new(true);
        let (_sub, seen) = recorder(&monitor);

        monitor.record_request_failure();
        assert_eq!(monitor.state(), ConnectivityState::Degraded);
        assert!(!monitor.is_online());
        assert!(monitor.environment_online());

        monitor.record_request_success();
        assert_eq!(monitor.state(), ConnectivityState::Online);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectivityState::Degraded, ConnectivityState::Online]
        );
    }

    #[test]
    fn callbacks_fire_only_on_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        let (_sub, seen) = recorder(&monitor);

        monitor.set_environment_online(true);
        monitor.record_request_success();
        monitor.set_environment_online(false);
        monitor.set_environment_online(false);
        monitor.record_request_failure();
        monitor.set_environment_online(true);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectivityState::Offline, ConnectivityState::Online]
        );
    }

    #[test]
    fn offline_wins_over_request_outcomes() {
        let monitor = ConnectivityMonitor::new(false);
        monitor.record_request_success();
        assert_eq!(monitor.state(), ConnectivityState::Offline);
    }

    #[test]
    fn unsubscribe_and_drop_remove_listeners() {
        let monitor = ConnectivityMonitor::new(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let first = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&calls);
        let second = monitor.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(monitor.listener_count(), 2);

        first.unsubscribe();
        monitor.set_environment_online(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(second);
        assert_eq!(monitor.listener_count(), 0);
        monitor.set_environment_online(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscription_outliving_monitor_is_harmless() {
        let monitor = ConnectivityMonitor::new(true);
        let subscription = monitor.subscribe(|_| {});
        drop(monitor);
        drop(subscription);
    }

    #[tokio::test]
    async fn watch_receivers_see_transitions() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.watch();
        assert_eq!(*rx.borrow(), ConnectivityState::Offline);

        monitor.set_environment_online(true);
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow_and_update(), ConnectivityState::Online);
    }

    #[test]
    fn watch_matches_state_after_concurrent_updates() {
        let monitor = ConnectivityMonitor::new(true);
        let rx = monitor.watch();

        for round in 0..200 {
            let handles: Vec<_> = (0..4)
                .map(|worker| {
                    let monitor = monitor.clone();
                    std::thread::spawn(move || {
                        for step in 0..25 {
                            match (worker + step + round) % 3 {
                                0 => monitor.set_environment_online(step % 2 == 0),
                                1 => monitor.record_request_failure(),
                                _ => monitor.record_request_success(),
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().expect("worker panicked");
            }
            assert_eq!(*rx.borrow(), monitor.state(), "round {}", round);
        }
    }
}
