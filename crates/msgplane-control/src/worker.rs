//! Per-space work queues.
//!
//! Every address space gets one worker task that runs reconciliation passes
//! one at a time. Triggers (admission changes, infrastructure events,
//! catalog refreshes, periodic resync) land in a bounded queue; a burst of
//! triggers collapses into one pass. Each trigger also bumps the space's
//! generation so an in-flight pass abandons its blocking waits and the next
//! pass starts from fresh state.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use msgplane_core::AddressSpaceId;
use msgplane_store::Store;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::budget::Supersede;
use crate::reconcile::{PassOutcome, Reconciler};

/// Why a pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// An address or space was created, changed or deleted.
    Admission,
    /// A workload of the space changed.
    Infra,
    /// The plan catalog changed.
    Catalog,
    /// Periodic resync.
    Resync,
}

impl Trigger {
    /// Returns the trigger as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admission => "admission",
            Self::Infra => "infra",
            Self::Catalog => "catalog",
            Self::Resync => "resync",
        }
    }
}

/// Something that schedules reconciliation passes.
pub trait ReconcileTrigger: Send + Sync {
    /// Request a pass for a space.
    fn notify(&self, space_id: &AddressSpaceId, trigger: Trigger);
}

/// A trigger that drops every request.
///
/// Useful when passes are driven by hand, as in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrigger;

impl ReconcileTrigger for NoopTrigger {
    fn notify(&self, space_id: &AddressSpaceId, trigger: Trigger) {
        tracing::trace!(space_id = %space_id, trigger = trigger.as_str(), "Dropping trigger");
    }
}

struct WorkerHandle {
    tx: mpsc::Sender<Trigger>,
    generation: watch::Sender<u64>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_alive(&self) -> bool {
        !self.task.is_finished() && !self.tx.is_closed()
    }
}

/// Routes triggers to per-space workers, spawning them on demand.
pub struct Dispatcher<S: Store> {
    reconciler: Arc<Reconciler<S>>,
    workers: Mutex<HashMap<AddressSpaceId, WorkerHandle>>,
}

impl<S: Store + 'static> Dispatcher<S> {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler<S>>) -> Self {
        Self {
            reconciler,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Get a reference to the reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler<S>> {
        &self.reconciler
    }

    /// Number of running workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers.lock().values().filter(|w| w.is_alive()).count()
    }

    fn spawn(&self, space_id: AddressSpaceId) -> WorkerHandle {
        let depth = self.reconciler.config().event_queue_depth.max(1);
        let (tx, rx) = mpsc::channel(depth);
        let (generation, generation_rx) = watch::channel(0);
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.reconciler),
            space_id,
            rx,
            generation_rx,
        ));
        tracing::debug!(space_id = %space_id, "Spawned space worker");
        WorkerHandle {
            tx,
            generation,
            task,
        }
    }

    /// Request a pass for every known space.
    ///
    /// Returns the number of spaces notified.
    pub fn notify_all(&self, trigger: Trigger) -> usize {
        let spaces = match self.reconciler.store().list_spaces() {
            Ok(spaces) => spaces,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list address spaces");
                return 0;
            }
        };
        for space in &spaces {
            self.notify(&space.space_id, trigger);
        }
        spaces.len()
    }

    /// Resync every space on the configured cadence, re-reading the plan
    /// catalog from `catalog_path` first when given.
    pub async fn run_periodic(self: Arc<Self>, catalog_path: Option<PathBuf>) {
        let mut interval = tokio::time::interval(self.reconciler.config().resync_interval());
        loop {
            interval.tick().await;
            if let Some(path) = &catalog_path {
                match self.reconciler.catalog().refresh_from_path(path) {
                    Ok(true) => {
                        let notified = self.notify_all(Trigger::Catalog);
                        tracing::info!(spaces = notified, "Plan catalog changed");
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(error = %e, "Failed to refresh plan catalog"),
                }
            }
            self.workers.lock().retain(|_, w| w.is_alive());
            self.notify_all(Trigger::Resync);
        }
    }
}

impl<S: Store + 'static> ReconcileTrigger for Dispatcher<S> {
    fn notify(&self, space_id: &AddressSpaceId, trigger: Trigger) {
        let mut workers = self.workers.lock();
        if workers.get(space_id).is_some_and(|w| !w.is_alive()) {
            workers.remove(space_id);
        }
        let handle = workers
            .entry(*space_id)
            .or_insert_with(|| self.spawn(*space_id));

        handle.generation.send_modify(|g| *g += 1);
        match handle.tx.try_send(trigger) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(space_id = %space_id, trigger = trigger.as_str(), "Trigger coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let handle = self.spawn(*space_id);
                if handle.tx.try_send(trigger).is_err() {
                    tracing::warn!(space_id = %space_id, "Failed to queue trigger");
                }
                workers.insert(*space_id, handle);
            }
        }
    }
}

async fn run_worker<S: Store + 'static>(
    reconciler: Arc<Reconciler<S>>,
    space_id: AddressSpaceId,
    mut rx: mpsc::Receiver<Trigger>,
    generation: watch::Receiver<u64>,
) {
    while let Some(trigger) = rx.recv().await {
        let mut coalesced = 0usize;
        while rx.try_recv().is_ok() {
            coalesced += 1;
        }
        tracing::debug!(
            space_id = %space_id,
            trigger = trigger.as_str(),
            coalesced,
            "Starting reconciliation pass"
        );

        let mut supersede = Supersede::new(generation.clone());
        match reconciler.reconcile(&space_id, &mut supersede).await {
            Ok(PassOutcome::Committed { superseded }) => {
                if superseded {
                    tracing::debug!(space_id = %space_id, "Pass superseded, rerunning");
                }
            }
            Ok(PassOutcome::Interrupted) => {}
            Ok(PassOutcome::TornDown | PassOutcome::Missing) => break,
            Err(e) => {
                tracing::warn!(
                    space_id = %space_id,
                    error = %e,
                    retriable = e.is_retriable(),
                    "Reconciliation pass failed"
                );
            }
        }
    }
    tracing::debug!(space_id = %space_id, "Space worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PlanCatalog;
    use crate::slot::fixtures::{catalog, plan};
    use crate::status::StatusBoard;
    use crate::types::ControlConfig;
    use chrono::Utc;
    use msgplane_core::InfraId;
    use msgplane_infra::{Infra, MockInfra};
    use msgplane_store::{
        Address, AddressSpace, AddressSpaceType, AddressType, Phase, RocksStore, Status,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (Arc<Dispatcher<RocksStore>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let catalog: Arc<PlanCatalog> = Arc::new(catalog(vec![plan("small", 0.3, None)]));
        let config = ControlConfig {
            drain_budget_seconds: 0,
            readiness_budget_seconds: 0,
            ..Default::default()
        };
        let reconciler = Reconciler::new(
            store,
            Arc::new(MockInfra::new()) as Arc<dyn Infra>,
            catalog,
            Arc::new(StatusBoard::new()),
            config,
        );
        (Arc::new(Dispatcher::new(Arc::new(reconciler))), dir)
    }

    fn seed(store: &RocksStore) -> AddressSpaceId {
        let now = Utc::now();
        let space = AddressSpace {
            space_id: AddressSpaceId::generate(),
            namespace: "tenant".to_string(),
            name: "space".to_string(),
            space_type: AddressSpaceType::Standard,
            plan: "space".to_string(),
            infra_id: InfraId::derive("tenant", "space"),
            endpoints: vec![],
            version: 1,
            deleting: false,
            created_at: now,
            updated_at: now,
        };
        store.put_space(&space).unwrap();
        store
            .put_address(&Address {
                space_id: space.space_id,
                name: "orders".to_string(),
                address: "orders".to_string(),
                address_type: AddressType::Queue,
                plan: "small".to_string(),
                applied_plan: None,
                terminating: false,
                status: Status::default(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        space.space_id
    }

    async fn wait_for_phase(store: &RocksStore, space_id: &AddressSpaceId, phase: Phase) {
        for _ in 0..200 {
            let current = store
                .get_address(space_id, "orders")
                .unwrap()
                .map(|a| a.status.phase);
            if current == Some(phase) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("address never reached {phase:?}");
    }

    #[tokio::test]
    async fn notify_runs_a_pass() {
        let (dispatcher, _dir) = setup();
        let store = Arc::clone(dispatcher.reconciler().store());
        let space_id = seed(&store);

        dispatcher.notify(&space_id, Trigger::Admission);

        wait_for_phase(&store, &space_id, Phase::Active).await;
        assert_eq!(dispatcher.active_workers(), 1);
    }

    #[tokio::test]
    async fn worker_stops_for_missing_space() {
        let (dispatcher, _dir) = setup();

        dispatcher.notify(&AddressSpaceId::generate(), Trigger::Resync);

        for _ in 0..200 {
            if dispatcher.active_workers() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker for a missing space kept running");
    }

    #[tokio::test]
    async fn notify_all_reaches_every_space() {
        let (dispatcher, _dir) = setup();
        let store = Arc::clone(dispatcher.reconciler().store());
        let space_id = seed(&store);

        assert_eq!(dispatcher.notify_all(Trigger::Resync), 1);
        wait_for_phase(&store, &space_id, Phase::Active).await;
    }

    #[test]
    fn noop_trigger_accepts_everything() {
        NoopTrigger.notify(&AddressSpaceId::generate(), Trigger::Catalog);
        assert_eq!(Trigger::Catalog.as_str(), "catalog");
    }
}
