//! Mutation queue manager.
//!
//! Every local mutation leaves an entry in the durable queue. While online,
//! [`SyncQueue`] drains the queue against the remote store in atomic
//! batches: a periodic timer, enqueue-while-online and connectivity
//! restoration all trigger a drain, and a single-flight guard makes sure
//! only one drain runs at a time.

pub mod merge;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::EngineConfig;
use crate::connectivity::{ConnectivityMonitor, ListenerHandle};
use crate::models::{CharacterId, EnqueueOutcome, OperationKind, QueueEntry, QueuedOperation};
use crate::remote::{RemoteStore, RemoteWrite};
use crate::services::LocalStore;
use crate::session::Session;
use crate::util::now_millis;
use crate::Result;

pub use merge::{merge, resolve, SyncRecord, Winner};

const EVENT_CAPACITY: usize = 64;

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Document writes committed remotely
    pub applied: usize,
    /// Queue entries removed after their write landed
    pub cleared: usize,
    /// Queue entries left queued with a higher retry count
    pub retried: usize,
    /// Queue entries dropped after exhausting their retries
    pub dropped: usize,
    /// Queue entries left queued because a newer operation was folded into
    /// them while their write was in flight
    pub superseded: usize,
    /// The pass did nothing: offline, signed out, or another drain running
    pub skipped: bool,
}

impl DrainReport {
    const fn skipped() -> Self {
        Self {
            applied: 0,
            cleared: 0,
            retried: 0,
            dropped: 0,
            superseded: 0,
            skipped: true,
        }
    }
}

/// Notifications published while draining
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A document write landed and the local copy is unchanged since
    Synced {
        collection: String,
        document_id: String,
        last_modified: i64,
        synced_at: i64,
    },
    /// An entry was discarded after too many failed attempts
    Dropped {
        collection: String,
        document_id: String,
        kind: OperationKind,
        retry_count: u32,
    },
    Drained(DrainReport),
}

/// One remote write plus every queue entry it settles
struct PlannedWrite {
    write: RemoteWrite,
    latest: QueueEntry,
    covered: Vec<QueueEntry>,
}

/// Clears the single-flight flag when a drain ends
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncQueue {
    store: LocalStore,
    remote: Arc<dyn RemoteStore>,
    session: Arc<Session>,
    connectivity: Arc<ConnectivityMonitor>,
    config: EngineConfig,
    syncing: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<ListenerHandle>>,
    events: broadcast::Sender<SyncEvent>,
    pending: watch::Sender<usize>,
}

impl SyncQueue {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteStore>,
        session: Arc<Session>,
        connectivity: Arc<ConnectivityMonitor>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (pending, _) = watch::channel(0);
        Arc::new(Self {
            store,
            remote,
            session,
            connectivity,
            config,
            syncing: AtomicBool::new(false),
            timer: Mutex::new(None),
            listener: Mutex::new(None),
            events,
            pending,
        })
    }

    /// Record an intended remote write for the signed-in owner.
    ///
    /// Without an owner nothing is queued and `NoOwner` is returned; the
    /// caller's local copy is already durable. While online an immediate
    /// drain is started in the background.
    pub fn enqueue(self: &Arc<Self>, op: &QueuedOperation) -> Result<EnqueueOutcome> {
        let Some(owner) = self.session.owner() else {
            tracing::warn!(
                "Cannot queue {} for {}/{}: no owner is signed in",
                op.kind,
                op.collection,
                op.document_id
            );
            return Ok(EnqueueOutcome::NoOwner);
        };

        let outcome = self.store.enqueue_operation(&owner, op, now_millis())?;
        match outcome {
            EnqueueOutcome::Appended(id) => {
                tracing::debug!("Queued {} for {} as entry {id}", op.kind, op.document_id);
            }
            EnqueueOutcome::Coalesced(id) => {
                tracing::debug!("Coalesced {} for {} into entry {id}", op.kind, op.document_id);
            }
            EnqueueOutcome::Unchanged(id) => {
                tracing::debug!("Delete for {} already queued as entry {id}", op.document_id);
            }
            EnqueueOutcome::NoOwner => {}
        }

        self.refresh_pending();
        if self.connectivity.is_online() {
            self.trigger_drain();
        }
        Ok(outcome)
    }

    /// Start the periodic drain loop. The first tick drains immediately.
    ///
    /// Starting an already running loop is a no-op.
    pub fn start_sync(self: &Arc<Self>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.is_some() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("Cannot start sync loop outside a tokio runtime");
            return;
        }

        let queue = Arc::downgrade(self);
        let period = self.config.sync_interval();
        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                queue.trigger_drain();
            }
        }));
        tracing::debug!("Sync loop started ({}s interval)", period.as_secs());
    }

    /// Stop the periodic drain loop. A drain already running finishes.
    pub fn stop_sync(&self) {
        let task = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::debug!("Sync loop stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_draining(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Follow the connectivity monitor: online starts the loop, offline stops it
    pub fn attach(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return;
        }

        let queue: Weak<Self> = Arc::downgrade(self);
        *listener = Some(self.connectivity.subscribe(move |online| {
            let Some(queue) = queue.upgrade() else {
                return;
            };
            if online {
                queue.start_sync();
            } else {
                queue.stop_sync();
            }
        }));
    }

    /// Stop following the connectivity monitor
    pub fn detach(&self) {
        let handle = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.unsubscribe();
        }
    }

    /// Stop the loop and detach from connectivity
    pub fn dispose(&self) {
        self.stop_sync();
        self.detach();
    }

    /// Start a drain in the background without waiting for it
    pub fn trigger_drain(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(error) = queue.sync_now().await {
                tracing::error!("Sync queue drain failed: {error}");
            }
        });
    }

    /// Drain now and wait for the result.
    ///
    /// Returns a skipped report if another drain is already running.
    pub async fn sync_now(&self) -> Result<DrainReport> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Drain already in progress, skipping");
            return Ok(DrainReport::skipped());
        }
        let _guard = DrainGuard(&self.syncing);

        let report = self.drain().await;
        self.refresh_pending();
        let report = report?;
        if !report.skipped {
            let _ = self.events.send(SyncEvent::Drained(report));
        }
        Ok(report)
    }

    async fn drain(&self) -> Result<DrainReport> {
        if !self.connectivity.is_online() {
            return Ok(DrainReport::skipped());
        }
        let Some(owner) = self.session.owner() else {
            return Ok(DrainReport::skipped());
        };

        let entries = self.store.queued_operations(&owner)?;
        if entries.is_empty() {
            return Ok(DrainReport::default());
        }
        tracing::debug!("Draining {} queued operations for {owner}", entries.len());

        let mut report = DrainReport::default();
        let batch_size = self.config.effective_batch_size();

        for (collection, planned) in plan_writes(entries) {
            let mut writable = Vec::with_capacity(planned.len());
            for plan in planned {
                match plan {
                    Ok(plan) => writable.push(plan),
                    Err(entry) => {
                        tracing::warn!(
                            "Queued {} for {}/{} has no payload",
                            entry.kind,
                            entry.collection,
                            entry.document_id
                        );
                        self.record_failure(std::slice::from_ref(&entry), &mut report)?;
                    }
                }
            }

            for batch in writable.chunks(batch_size) {
                let writes = batch
                    .iter()
                    .map(|plan| plan.write.clone())
                    .collect::<Vec<_>>();

                match self.remote.commit_batch(&writes).await {
                    Ok(()) => self.record_success(batch, &mut report)?,
                    Err(error) => {
                        tracing::warn!(
                            "Batch of {} writes to {collection} failed: {error}",
                            writes.len()
                        );
                        let covered = batch
                            .iter()
                            .flat_map(|plan| plan.covered.iter().cloned())
                            .collect::<Vec<_>>();
                        self.record_failure(&covered, &mut report)?;
                    }
                }
            }
        }

        tracing::info!(
            "Drain finished: {} applied, {} retried, {} dropped, {} superseded",
            report.applied,
            report.retried,
            report.dropped,
            report.superseded
        );
        Ok(report)
    }

    fn record_success(&self, batch: &[PlannedWrite], report: &mut DrainReport) -> Result<()> {
        let covered = batch
            .iter()
            .flat_map(|plan| plan.covered.iter().cloned())
            .collect::<Vec<_>>();
        // Entries rewritten during the commit carry a payload that was never sent
        let cleared = self.store.remove_queued(&covered)?;
        if cleared < covered.len() {
            tracing::debug!(
                "{} queue entries changed during the commit and stay queued",
                covered.len() - cleared
            );
        }
        report.cleared += cleared;
        report.superseded += covered.len().saturating_sub(cleared);
        report.applied += batch.len();

        let synced_at = now_millis();
        for plan in batch {
            let Some(last_modified) = plan.latest.payload_last_modified() else {
                continue;
            };
            if plan.latest.collection != self.config.collection {
                continue;
            }
            let Ok(id) = plan.latest.document_id.parse::<CharacterId>() else {
                continue;
            };
            if self
                .store
                .mark_synced_if_unchanged(&id, last_modified, synced_at)?
            {
                let _ = self.events.send(SyncEvent::Synced {
                    collection: plan.latest.collection.clone(),
                    document_id: plan.latest.document_id.clone(),
                    last_modified,
                    synced_at,
                });
            }
        }
        Ok(())
    }

    fn record_failure(&self, entries: &[QueueEntry], report: &mut DrainReport) -> Result<()> {
        for entry in entries {
            let retry_count = entry.retry_count.saturating_add(1);
            if retry_count > self.config.max_retries {
                if self.store.remove_queued(std::slice::from_ref(entry))? == 0 {
                    report.superseded += 1;
                    continue;
                }
                report.dropped += 1;
                tracing::warn!(
                    "Dropping {} for {}/{} after {retry_count} failed attempts",
                    entry.kind,
                    entry.collection,
                    entry.document_id
                );
                let _ = self.events.send(SyncEvent::Dropped {
                    collection: entry.collection.clone(),
                    document_id: entry.document_id.clone(),
                    kind: entry.kind,
                    retry_count,
                });
            } else if self.store.set_retry_count(entry, retry_count)? {
                report.retried += 1;
            } else {
                report.superseded += 1;
            }
        }
        Ok(())
    }

    /// Pending entries of the signed-in owner; zero when signed out
    pub fn pending_count(&self) -> Result<usize> {
        match self.session.owner() {
            Some(owner) => self.store.queued_count(&owner),
            None => Ok(0),
        }
    }

    pub fn has_pending_operations(&self) -> Result<bool> {
        Ok(self.pending_count()? > 0)
    }

    /// Recompute the pending count and publish it
    pub fn refresh_pending(&self) {
        match self.pending_count() {
            Ok(count) => {
                self.pending.send_replace(count);
            }
            Err(error) => tracing::warn!("Failed to count pending operations: {error}"),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }
}

impl Drop for SyncQueue {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Group entries by collection and reduce each document to its latest entry.
///
/// Entries arrive in enqueue order; a document keeps the position of its
/// first entry. Entries whose write cannot be built come back as `Err`.
fn plan_writes(
    entries: Vec<QueueEntry>,
) -> BTreeMap<String, Vec<std::result::Result<PlannedWrite, QueueEntry>>> {
    let mut grouped: BTreeMap<String, Vec<Vec<QueueEntry>>> = BTreeMap::new();
    let mut positions: BTreeMap<(String, String), usize> = BTreeMap::new();

    for entry in entries {
        let documents = grouped.entry(entry.collection.clone()).or_default();
        let key = (entry.collection.clone(), entry.document_id.clone());
        match positions.get(&key) {
            Some(position) => documents[*position].push(entry),
            None => {
                positions.insert(key, documents.len());
                documents.push(vec![entry]);
            }
        }
    }

    grouped
        .into_iter()
        .map(|(collection, documents)| {
            let planned = documents
                .into_iter()
                .filter_map(|covered| {
                    let latest = covered.last()?.clone();
                    Some(match RemoteWrite::from_entry(&latest) {
                        Ok(write) => Ok(PlannedWrite {
                            write,
                            latest,
                            covered,
                        }),
                        Err(_) => Err(latest),
                    })
                })
                .collect();
            (collection, planned)
        })
        .collect()
}
