//! Connectivity monitor.
//!
//! Tracks the platform's notion of online/offline and notifies listeners when
//! it changes. It performs no network probing of its own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tokio::task::JoinHandle;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;

/// Online/offline state holder with change listeners.
///
/// Listeners run synchronously, in registration order, only when the state
/// actually flips. Setting the current value again is a no-op.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    binding: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectivityMonitor {
    /// Create a monitor with an initial state
    pub fn new(online: bool) -> Arc<Self> {
        let (state, _) = watch::channel(online);
        Arc::new(Self {
            state,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            binding: Mutex::new(None),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Observe the state as a watch channel
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Record a new state, notifying listeners if it differs
    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if !changed {
            return;
        }

        tracing::info!("Connectivity changed: {}", if online { "online" } else { "offline" });

        // Snapshot so listeners can (un)subscribe without deadlocking
        let listeners = self
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(online);
        }
    }

    /// Register a change listener
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_listeners().push((id, Arc::new(listener)));
        ListenerHandle {
            id,
            monitor: Arc::downgrade(self),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Follow a platform connectivity signal until unbound.
    ///
    /// The current value of `platform` is applied immediately. Binding again
    /// replaces the previous binding.
    pub fn bind(self: &Arc<Self>, mut platform: watch::Receiver<bool>) {
        self.set_online(*platform.borrow_and_update());

        let monitor = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while platform.changed().await.is_ok() {
                let online = *platform.borrow_and_update();
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.set_online(online);
            }
        });

        let previous = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop following the platform signal, if bound
    pub fn unbind(&self) {
        let task = self
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock_listeners().retain(|(listener_id, _)| *listener_id != id);
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(u64, Listener)>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Handle returned by [`ConnectivityMonitor::subscribe`]
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    monitor: Weak<ConnectivityMonitor>,
}

impl ListenerHandle {
    /// Remove the listener. Calling this more than once has no effect.
    pub fn unsubscribe(&self) {
        if let Some(monitor) = self.monitor.upgrade() {
            monitor.unsubscribe(self.id);
        }
    }
}
