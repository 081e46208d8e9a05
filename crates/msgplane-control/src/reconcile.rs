//! The per-space reconciliation pass.
//!
//! A pass is level-triggered: it reloads the space, its addresses and its
//! broker pool, recomputes the whole desired state and publishes it in one
//! commit. Steps run in a fixed order:
//!
//! ```text
//!   load ─▶ place ─▶ apply infra ─▶ drain ─▶ aggregate ─▶ commit ─▶ decommission
//! ```
//!
//! If the space is deleted while a pass runs, the pass finishes its current
//! step and exits without committing. A deleting space is drained without
//! successor waits and torn down once no address and no broker is left.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use msgplane_core::AddressSpaceId;
use msgplane_infra::{Infra, InfraOwner};
use msgplane_store::{
    AddressUpdate, BrokerPool, BrokerState, InfraConfig, PassCommit, Store,
};

use crate::accountant;
use crate::budget::Supersede;
use crate::catalog::PlanCatalog;
use crate::drain::DrainOrchestrator;
use crate::error::Result;
use crate::placement::BrokerScheduler;
use crate::router;
use crate::slot::{AddressSlot, Condition};
use crate::status::{self, Observations, SpaceStatus, StatusBoard};
use crate::types::ControlConfig;

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The pass committed its result.
    Committed {
        /// A newer trigger cut the drain step short.
        superseded: bool,
    },
    /// The space was deleted mid-pass; nothing was committed.
    Interrupted,
    /// The space finished deleting and is gone.
    TornDown,
    /// The space does not exist.
    Missing,
}

/// Runs reconciliation passes.
pub struct Reconciler<S: Store> {
    store: Arc<S>,
    infra: Arc<dyn Infra>,
    catalog: Arc<PlanCatalog>,
    board: Arc<StatusBoard>,
    config: ControlConfig,
}

impl<S: Store> Reconciler<S> {
    /// Create a reconciler.
    pub fn new(
        store: Arc<S>,
        infra: Arc<dyn Infra>,
        catalog: Arc<PlanCatalog>,
        board: Arc<StatusBoard>,
        config: ControlConfig,
    ) -> Self {
        Self {
            store,
            infra,
            catalog,
            board,
            config,
        }
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Get a reference to the plan catalog.
    pub fn catalog(&self) -> &Arc<PlanCatalog> {
        &self.catalog
    }

    /// Get a reference to the status board.
    pub fn board(&self) -> &Arc<StatusBoard> {
        &self.board
    }

    /// Get a reference to the configuration.
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Run one pass for a space.
    ///
    /// Per-address problems end up as conditions in the committed status;
    /// infrastructure failures are logged and retried on the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or if tearing down a deleted
    /// space fails.
    pub async fn reconcile(
        &self,
        space_id: &AddressSpaceId,
        supersede: &mut Supersede,
    ) -> Result<PassOutcome> {
        let Some(space) = self.store.get_space(space_id)? else {
            self.board.remove(space_id);
            return Ok(PassOutcome::Missing);
        };
        let snapshot = self.catalog.snapshot();
        let owner = InfraOwner::new(space.space_id, space.infra_id);
        let deleting = space.deleting;

        let space_plan = snapshot.space_plan(&space.plan);
        if space_plan.is_none() {
            tracing::warn!(space_id = %space_id, plan = %space.plan, "Space plan missing from catalog");
        }
        let infra_config = space_plan.and_then(|p| snapshot.infra_config(&p.infra_config));
        let broker_spec = infra_config.and_then(InfraConfig::broker);

        let mut pool = self.store.get_pool(space_id)?.unwrap_or_default();
        self.decommission_drained(&owner, &mut pool).await;

        let mut records = self.store.list_addresses(space_id)?;
        if deleting {
            for record in records.iter_mut().filter(|r| !r.terminating) {
                record.terminating = true;
                self.store.put_address(record)?;
            }
        }
        let usage = space_plan
            .map(|plan| accountant::usage(&snapshot, plan, &records))
            .unwrap_or_default();
        let mut slots: Vec<AddressSlot> = records
            .iter()
            .map(|r| AddressSlot::load(r, &snapshot, space_plan, deleting))
            .collect();

        // Place
        let health = self.probe_pool(&owner, &pool).await;
        let placement = BrokerScheduler::new(&space.infra_id, broker_spec, &self.config)
            .retiring(deleting)
            .schedule(&mut pool, &mut slots, &health, Utc::now());
        tracing::debug!(
            space_id = %space_id,
            addresses = slots.len(),
            brokers = pool.brokers.len(),
            exhausted = placement.exhausted.len(),
            "Placement computed"
        );

        // Apply
        if !deleting {
            self.apply_infra(&owner, infra_config, &mut pool, &mut slots).await;
        }
        if self.interrupted(space_id, deleting)? {
            return Ok(PassOutcome::Interrupted);
        }

        // Drain
        let report = DrainOrchestrator::new(self.infra.as_ref(), &owner, &self.config, deleting)
            .run(&mut slots, &mut pool, supersede)
            .await;
        if self.interrupted(space_id, deleting)? {
            return Ok(PassOutcome::Interrupted);
        }

        // Aggregate
        let has_routers = infra_config.and_then(InfraConfig::router).is_some();
        let observed = self.observe(&owner, &slots, has_routers && !deleting).await;
        let mut updates = Vec::with_capacity(slots.len());
        let mut removed = Vec::new();
        for slot in &mut slots {
            if slot.terminating && slot.entries.is_empty() {
                removed.push(slot.name.clone());
                continue;
            }
            let status = status::aggregate(slot, &observed, self.config.max_status_messages);
            updates.push(AddressUpdate {
                name: slot.name.clone(),
                status,
                applied_plan: slot.applied_plan.clone(),
            });
        }

        // Commit
        self.store.commit_pass(&PassCommit {
            space_id: *space_id,
            updates,
            removed: removed.clone(),
            pool: pool.clone(),
        })?;
        let committed = self.store.list_addresses(space_id)?;
        self.board
            .publish(SpaceStatus::from_records(&space, &committed, &pool, usage));
        tracing::info!(
            space_id = %space_id,
            addresses = committed.len(),
            removed = removed.len(),
            drained = report.drained.len(),
            superseded = report.superseded,
            "Reconciled address space"
        );

        // Decommission
        if self.decommission_drained(&owner, &mut pool).await {
            self.store.commit_pass(&PassCommit {
                space_id: *space_id,
                updates: Vec::new(),
                removed: Vec::new(),
                pool: pool.clone(),
            })?;
        }

        if deleting && committed.is_empty() && pool.brokers.is_empty() {
            self.infra.teardown(&owner).await?;
            self.store.delete_space(space_id)?;
            self.board.remove(space_id);
            tracing::info!(space_id = %space_id, "Address space torn down");
            return Ok(PassOutcome::TornDown);
        }

        Ok(PassOutcome::Committed {
            superseded: report.superseded,
        })
    }

    fn interrupted(&self, space_id: &AddressSpaceId, was_deleting: bool) -> Result<bool> {
        let interrupted = match self.store.get_space(space_id)? {
            None => true,
            Some(space) => space.deleting && !was_deleting,
        };
        if interrupted {
            tracing::info!(space_id = %space_id, "Space deleted mid-pass, not committing");
        }
        Ok(interrupted)
    }

    /// Readiness of every Active broker, used for health tracking.
    async fn probe_pool(&self, owner: &InfraOwner, pool: &BrokerPool) -> HashMap<String, bool> {
        let mut health = HashMap::new();
        for broker in pool.brokers.iter().filter(|b| b.state == BrokerState::Active) {
            match self.infra.broker_ready(owner, &broker.cluster_id).await {
                Ok(ready) => {
                    health.insert(broker.cluster_id.clone(), ready);
                }
                Err(e) => tracing::warn!(
                    cluster_id = %broker.cluster_id,
                    error = %e,
                    retriable = e.is_retriable(),
                    "Failed to probe broker"
                ),
            }
        }
        health
    }

    async fn apply_infra(
        &self,
        owner: &InfraOwner,
        infra_config: Option<&InfraConfig>,
        pool: &mut BrokerPool,
        slots: &mut [AddressSlot],
    ) {
        if let Some(spec) = infra_config.and_then(InfraConfig::broker) {
            for broker in pool.brokers.iter().filter(|b| b.state == BrokerState::Active) {
                if let Err(e) = self.infra.ensure_broker(owner, &broker.cluster_id, spec).await {
                    tracing::warn!(
                        cluster_id = %broker.cluster_id,
                        error = %e,
                        retriable = e.is_retriable(),
                        "Failed to apply broker"
                    );
                    let failure = Condition::InfraApplyFailed {
                        object: broker.cluster_id.clone(),
                        reason: e.to_string(),
                    };
                    for slot in slots.iter_mut().filter(|s| s.has_entry_on(&broker.cluster_id)) {
                        slot.observe(failure.clone());
                    }
                }
            }
        }

        let router_spec = infra_config.and_then(InfraConfig::router);
        if let Some(spec) = router_spec {
            let links = router::aggregate_link_load(slots.iter());
            let replicas = router::target_replicas(links, Some(spec));
            match self.infra.scale_routers(owner, replicas, spec).await {
                Ok(()) => {
                    if pool.router_replicas != replicas {
                        tracing::info!(
                            space_id = %owner.space_id,
                            links,
                            from = pool.router_replicas,
                            to = replicas,
                            "Scaled router mesh"
                        );
                    }
                    pool.router_replicas = replicas;
                }
                Err(e) => {
                    tracing::warn!(error = %e, retriable = e.is_retriable(), "Failed to scale routers");
                    let failure = Condition::InfraApplyFailed {
                        object: "router mesh".to_string(),
                        reason: e.to_string(),
                    };
                    for slot in slots.iter_mut().filter(|s| s.is_live()) {
                        slot.observe(failure.clone());
                    }
                }
            }
        } else {
            pool.router_replicas = 0;
        }

        if let Some(spec) = infra_config.and_then(InfraConfig::admin) {
            if let Err(e) = self.infra.ensure_admin(owner, spec).await {
                tracing::warn!(error = %e, retriable = e.is_retriable(), "Failed to apply admin");
            }
        }
    }

    async fn observe(&self, owner: &InfraOwner, slots: &[AddressSlot], has_routers: bool) -> Observations {
        let mut brokers = HashMap::new();
        for entry in slots.iter().flat_map(AddressSlot::active_entries) {
            if brokers.contains_key(&entry.cluster_id) {
                continue;
            }
            let ready = match self.infra.broker_ready(owner, &entry.cluster_id).await {
                Ok(ready) => ready,
                Err(e) => {
                    tracing::warn!(cluster_id = %entry.cluster_id, error = %e, "Failed to probe broker");
                    false
                }
            };
            brokers.insert(entry.cluster_id.clone(), ready);
        }

        let routers = if has_routers {
            self.infra.routers_ready(owner).await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to probe routers");
                false
            })
        } else {
            true
        };
        Observations { brokers, routers }
    }

    /// Decommission Drained brokers; returns true if any was removed.
    async fn decommission_drained(&self, owner: &InfraOwner, pool: &mut BrokerPool) -> bool {
        let drained: Vec<String> = pool
            .brokers
            .iter()
            .filter(|b| b.state == BrokerState::Drained)
            .map(|b| b.cluster_id.clone())
            .collect();
        let mut gone = Vec::new();
        for cluster_id in drained {
            match self.infra.decommission_broker(owner, &cluster_id).await {
                Ok(()) => {
                    tracing::info!(space_id = %owner.space_id, cluster_id = %cluster_id, "Decommissioned broker");
                    gone.push(cluster_id);
                }
                Err(e) => tracing::warn!(
                    cluster_id = %cluster_id,
                    error = %e,
                    retriable = e.is_retriable(),
                    "Failed to decommission broker"
                ),
            }
        }
        pool.brokers.retain(|b| !gone.contains(&b.cluster_id));
        !gone.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::fixtures::{catalog, plan};
    use msgplane_core::InfraId;
    use msgplane_infra::MockInfra;
    use msgplane_store::{Address, AddressSpace, AddressSpaceType, AddressType, Phase, RocksStore, Status};
    use tempfile::TempDir;

    fn setup() -> (Reconciler<RocksStore>, Arc<MockInfra>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let infra = Arc::new(MockInfra::new());
        let catalog = Arc::new(catalog(vec![plan("small", 0.3, None)]));
        let config = ControlConfig {
            drain_budget_seconds: 0,
            readiness_budget_seconds: 0,
            ..Default::default()
        };
        let reconciler = Reconciler::new(
            store,
            Arc::clone(&infra) as Arc<dyn Infra>,
            catalog,
            Arc::new(StatusBoard::new()),
            config,
        );
        (reconciler, infra, dir)
    }

    fn create_space(store: &RocksStore) -> AddressSpace {
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
        space
    }

    fn create_address(store: &RocksStore, space: &AddressSpace, name: &str) {
        let now = Utc::now();
        store
            .put_address(&Address {
                space_id: space.space_id,
                name: name.to_string(),
                address: name.to_string(),
                address_type: AddressType::Queue,
                plan: "small".to_string(),
                applied_plan: None,
                terminating: false,
                status: Status::default(),
                created_at: now,
                updated_at: now,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn missing_space() {
        let (reconciler, _infra, _dir) = setup();

        let outcome = reconciler
            .reconcile(&AddressSpaceId::generate(), &mut Supersede::never())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Missing);
    }

    #[tokio::test]
    async fn first_pass_activates_address() {
        let (reconciler, infra, _dir) = setup();
        let space = create_space(reconciler.store());
        create_address(reconciler.store(), &space, "orders");

        let outcome = reconciler
            .reconcile(&space.space_id, &mut Supersede::never())
            .await
            .unwrap();
        assert_eq!(outcome, PassOutcome::Committed { superseded: false });

        let record = reconciler
            .store()
            .get_address(&space.space_id, "orders")
            .unwrap()
            .unwrap();
        assert_eq!(record.status.phase, Phase::Active);
        assert!(record.status.ready);
        assert_eq!(record.applied_plan.as_deref(), Some("small"));
        assert_eq!(infra.brokers_of(&space.space_id).len(), 1);
        assert_eq!(infra.router_replicas(&space.space_id), Some(1));

        let published = reconciler.board().get(&space.space_id).unwrap();
        assert_eq!(published.broker_replicas, 1);
        assert_eq!(published.router_replicas, 1);
        assert!((published.consumed.broker - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deleting_space_is_torn_down() {
        let (reconciler, infra, _dir) = setup();
        let mut space = create_space(reconciler.store());
        create_address(reconciler.store(), &space, "orders");
        reconciler
            .reconcile(&space.space_id, &mut Supersede::never())
            .await
            .unwrap();

        space.deleting = true;
        reconciler.store().put_space(&space).unwrap();
        let outcome = reconciler
            .reconcile(&space.space_id, &mut Supersede::never())
            .await
            .unwrap();

        assert_eq!(outcome, PassOutcome::TornDown);
        assert!(reconciler.store().get_space(&space.space_id).unwrap().is_none());
        assert!(infra.was_torn_down(&space.space_id));
        assert!(infra.brokers_of(&space.space_id).is_empty());
        assert!(reconciler.board().get(&space.space_id).is_none());
    }

    #[tokio::test]
    async fn unready_routers_keep_address_configuring() {
        let (reconciler, infra, _dir) = setup();
        let space = create_space(reconciler.store());
        create_address(reconciler.store(), &space, "orders");
        infra.set_routers_ready(false);

        reconciler
            .reconcile(&space.space_id, &mut Supersede::never())
            .await
            .unwrap();

        let record = reconciler
            .store()
            .get_address(&space.space_id, "orders")
            .unwrap()
            .unwrap();
        assert_eq!(record.status.phase, Phase::Configuring);
        assert_eq!(record.status.messages, vec!["Router mesh is not ready".to_string()]);
    }
}
