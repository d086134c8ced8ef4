//! Engine wiring: builds every service once and owns their lifecycle.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::models::OwnerId;
use crate::remote::RemoteStore;
use crate::services::{CharacterService, LocalStore};
use crate::session::Session;
use crate::sync::{DrainReport, SyncEvent, SyncQueue};
use crate::Result;

/// Offline-first character engine.
///
/// Holds the local store, the remote client, the owner session, the
/// connectivity monitor, the mutation queue and the character service, and
/// injects them into each other. Nothing is global.
pub struct Engine {
    config: EngineConfig,
    store: LocalStore,
    session: Arc<Session>,
    connectivity: Arc<ConnectivityMonitor>,
    queue: Arc<SyncQueue>,
    characters: Arc<CharacterService>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine around an opened store and a remote client.
    ///
    /// `online` seeds the connectivity monitor; nothing runs until
    /// [`Engine::start`].
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
        online: bool,
    ) -> Self {
        let session = Arc::new(Session::new());
        let connectivity = ConnectivityMonitor::new(online);
        let queue = SyncQueue::new(
            store.clone(),
            Arc::clone(&remote),
            Arc::clone(&session),
            Arc::clone(&connectivity),
            config.clone(),
        );
        let characters = Arc::new(CharacterService::new(
            store.clone(),
            remote,
            Arc::clone(&session),
            Arc::clone(&connectivity),
            Arc::clone(&queue),
            config.clone(),
        ));

        Self {
            config,
            store,
            session,
            connectivity,
            queue,
            characters,
            forwarder: Mutex::new(None),
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn characters(&self) -> &Arc<CharacterService> {
        &self.characters
    }

    pub const fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub const fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Follow connectivity, start syncing if online and forward sync events
    /// into the character projection.
    pub fn start(&self) {
        self.queue.attach();
        if self.connectivity.is_online() {
            self.queue.start_sync();
        }
        self.start_forwarding();
        tracing::debug!("Engine started");
    }

    fn start_forwarding(&self) {
        let mut forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if forwarder.is_some() || tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let mut events = self.queue.subscribe_events();
        let characters: Weak<CharacterService> = Arc::downgrade(&self.characters);
        *forwarder = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(characters) = characters.upgrade() else {
                            break;
                        };
                        characters.apply_sync_event(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Character view missed {skipped} sync events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Stop the periodic drain; connectivity is still followed
    pub fn stop(&self) {
        self.queue.stop_sync();
    }

    /// Stop everything and drop every listener
    pub fn dispose(&self) {
        self.queue.dispose();
        self.connectivity.unbind();
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
    }

    /// Sign an owner in and replay their queue when online.
    ///
    /// A blank owner id signs out.
    pub fn sign_in(&self, owner: OwnerId) {
        self.session.sign_in(owner);
        self.characters.clear();
        self.queue.refresh_pending();
        if let Some(owner) = self.session.owner() {
            tracing::info!("Signed in as {owner}");
            if self.connectivity.is_online() {
                self.queue.trigger_drain();
            }
        }
    }

    pub fn sign_out(&self) {
        self.session.sign_out();
        self.characters.clear();
        self.queue.refresh_pending();
        tracing::info!("Signed out");
    }

    pub fn owner(&self) -> Option<OwnerId> {
        self.session.owner()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
    }

    /// Mirror a platform connectivity signal
    pub fn bind_connectivity(&self, signal: watch::Receiver<bool>) {
        self.connectivity.bind(signal);
    }

    /// Drain the queue now and wait for the outcome
    pub async fn sync_now(&self) -> Result<DrainReport> {
        self.queue.sync_now().await
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.queue.pending_count()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.queue.subscribe_events()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}
