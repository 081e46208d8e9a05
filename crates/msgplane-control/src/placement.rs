//! Broker pool scheduling.
//!
//! Assigns every live address (or every shard of a sharded address) to a
//! broker of its space's pool and decides how many brokers the pool needs.
//!
//! # Algorithm
//!
//! ```text
//!   health / shrink ──▶ retire entries ──▶ reshape ──▶ overflow ──▶ first-fit-decreasing
//!   (brokers to         (entries on        (plan       (brokers     (new shards onto Active
//!    Draining)           Draining brokers)  changed     over         brokers, new brokers up
//!                                           shards)     capacity)    to the bound)
//! ```
//!
//! Placement is sticky: an Active assignment only moves when its plan needs
//! a different shard shape, its broker leaves the pool, or its broker is
//! overloaded. Moves are never applied directly. The old assignment turns
//! Draining and the new one is added next to it; the drain orchestrator
//! retires the old one later. A move whose successor cannot be placed is
//! abandoned and the old assignment stays Active.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use msgplane_core::{InfraId, COST_EPSILON};
use msgplane_store::{AddressPlan, BrokerInstance, BrokerPool, BrokerSpec, BrokerState, BrokerStatus};

use crate::lifecycle;
use crate::slot::{AddressSlot, Condition};
use crate::types::ControlConfig;

/// What one scheduling run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementOutcome {
    /// Brokers added to the pool.
    pub provisioned: Vec<String>,
    /// Brokers that entered Draining.
    pub draining: Vec<String>,
    /// Idle brokers retired without holding any address.
    pub removed: Vec<String>,
    /// Addresses that received a successor placement.
    pub moved: Vec<String>,
    /// Addresses left without a placement.
    pub exhausted: Vec<String>,
}

impl PlacementOutcome {
    /// Returns true if the run changed nothing.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.provisioned.is_empty()
            && self.draining.is_empty()
            && self.removed.is_empty()
            && self.moved.is_empty()
            && self.exhausted.is_empty()
    }
}

/// Number of shards an address on `plan` is split into.
///
/// A declared shard factor is authoritative. Otherwise an address is sharded
/// only when its broker share exceeds `shard_threshold` of one broker, into
/// as many shards as it takes to fit, capped at `max_shard_factor`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn shard_count(plan: &AddressPlan, capacity: f64, config: &ControlConfig) -> u32 {
    if let Some(declared) = plan.shard_factor {
        return declared.max(1);
    }
    let share = plan.resources.broker / capacity;
    if share <= config.shard_threshold + COST_EPSILON {
        return 1;
    }
    let limit = config.max_shard_factor.max(1);
    let wanted = share.ceil();
    if wanted >= f64::from(limit) {
        limit
    } else {
        (wanted as u32).max(1)
    }
}

struct Request {
    slot: usize,
    per_shard: f64,
    need: usize,
}

/// Schedules addresses onto the broker pool of one space.
pub struct BrokerScheduler<'a> {
    infra_id: &'a InfraId,
    spec: Option<&'a BrokerSpec>,
    config: &'a ControlConfig,
    retiring: bool,
}

impl<'a> BrokerScheduler<'a> {
    /// Create a scheduler for a space with the given broker sizing.
    ///
    /// Without a broker spec the pool is drained to zero.
    #[must_use]
    pub const fn new(
        infra_id: &'a InfraId,
        spec: Option<&'a BrokerSpec>,
        config: &'a ControlConfig,
    ) -> Self {
        Self {
            infra_id,
            spec,
            config,
            retiring: false,
        }
    }

    /// Drain the whole pool; used while the space is being deleted.
    #[must_use]
    pub fn retiring(mut self, retiring: bool) -> Self {
        self.retiring = retiring;
        self
    }

    /// Capacity units of one broker.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.spec
            .and_then(|s| s.capacity)
            .unwrap_or(self.config.broker_capacity)
    }

    /// Replica bounds `(min, max)` of the pool.
    #[must_use]
    pub fn bounds(&self) -> (usize, usize) {
        match self.spec {
            Some(spec) if !self.retiring => {
                (spec.min_replicas as usize, spec.max_replicas as usize)
            }
            _ => (0, 0),
        }
    }

    /// Broker share of one shard of an address on `plan`.
    #[must_use]
    pub fn per_shard(&self, plan: &AddressPlan) -> f64 {
        plan.resources.broker / f64::from(shard_count(plan, self.capacity(), self.config))
    }

    /// Run one scheduling round over `pool` and `slots`.
    ///
    /// `health` holds the readiness observed for Active brokers this pass;
    /// brokers without an entry keep their health record.
    pub fn schedule(
        &self,
        pool: &mut BrokerPool,
        slots: &mut [AddressSlot],
        health: &HashMap<String, bool>,
        now: DateTime<Utc>,
    ) -> PlacementOutcome {
        let mut outcome = PlacementOutcome::default();

        self.track_health(pool, health, now, &mut outcome);
        self.shrink(pool, now, &mut outcome);
        Self::retire_entries(pool, slots);

        let mut tentative = Vec::new();
        let mut requests = self.reshape(slots, &mut tentative);
        self.relieve_overflow(pool, slots, &mut requests, &mut tentative);

        let mut loads = self.loads(pool, slots);
        requests.sort_by(|a, b| {
            b.per_shard
                .total_cmp(&a.per_shard)
                .then_with(|| slots[a.slot].name.cmp(&slots[b.slot].name))
        });
        for request in &requests {
            self.fulfil(pool, slots, &mut loads, request, &tentative, &mut outcome);
        }

        self.ensure_minimum(pool, &mut outcome);
        self.retire_idle(pool, slots, now, &mut outcome);

        if !outcome.is_quiet() {
            tracing::debug!(
                infra_id = %self.infra_id,
                provisioned = ?outcome.provisioned,
                draining = ?outcome.draining,
                removed = ?outcome.removed,
                moved = outcome.moved.len(),
                exhausted = outcome.exhausted.len(),
                "Computed placement"
            );
        }
        outcome
    }

    fn start_drain(broker: &mut BrokerInstance, now: DateTime<Utc>, reason: &'static str) -> bool {
        match lifecycle::validate_broker_transition(
            &broker.cluster_id,
            broker.state,
            BrokerState::Draining,
        ) {
            Ok(state) => {
                broker.state = state;
                broker.draining_since = Some(now);
                tracing::info!(cluster_id = %broker.cluster_id, reason, "Draining broker");
                true
            }
            Err(_) => false,
        }
    }

    fn track_health(
        &self,
        pool: &mut BrokerPool,
        health: &HashMap<String, bool>,
        now: DateTime<Utc>,
        outcome: &mut PlacementOutcome,
    ) {
        let grace = self.config.unhealthy_grace();
        for broker in pool
            .brokers
            .iter_mut()
            .filter(|b| b.state == BrokerState::Active)
        {
            match health.get(&broker.cluster_id) {
                Some(true) => broker.unhealthy_since = None,
                Some(false) => {
                    let since = *broker.unhealthy_since.get_or_insert(now);
                    if now - since >= grace && Self::start_drain(broker, now, "unhealthy") {
                        outcome.draining.push(broker.cluster_id.clone());
                    }
                }
                None => {}
            }
        }
    }

    fn shrink(&self, pool: &mut BrokerPool, now: DateTime<Utc>, outcome: &mut PlacementOutcome) {
        let (_, max) = self.bounds();
        let mut excess = pool.count(BrokerState::Active).saturating_sub(max);
        // Highest ordinals go first.
        for broker in pool.brokers.iter_mut().rev() {
            if excess == 0 {
                break;
            }
            if broker.state == BrokerState::Active && Self::start_drain(broker, now, "shrink") {
                outcome.draining.push(broker.cluster_id.clone());
                excess -= 1;
            }
        }
    }

    fn retire_entries(pool: &BrokerPool, slots: &mut [AddressSlot]) {
        for slot in slots.iter_mut() {
            let leaves_brokers = slot.terminating || (slot.plan.is_some() && !slot.needs_broker());
            let retiring: Vec<String> = slot
                .active_entries()
                .filter(|e| {
                    leaves_brokers
                        || !pool
                            .get(&e.cluster_id)
                            .is_some_and(BrokerInstance::is_placement_target)
                })
                .map(|e| e.cluster_id.clone())
                .collect();
            for cluster_id in retiring {
                slot.set_state(&cluster_id, BrokerState::Draining);
            }
        }
    }

    fn reshape(&self, slots: &mut [AddressSlot], tentative: &mut Vec<(usize, String)>) -> Vec<Request> {
        let mut requests = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.terminating {
                continue;
            }
            let Some(plan) = slot.plan.clone() else {
                continue;
            };
            if !plan.needs_broker() {
                slot.mark_applied();
                continue;
            }

            let shards = shard_count(&plan, self.capacity(), self.config) as usize;
            let active = slot.active_count();
            let plan_changed = slot
                .applied_plan
                .as_deref()
                .is_some_and(|applied| applied != plan.name);

            let placed = if active > shards {
                // Fewer shards: the first ones stay put, the surplus drains.
                let surplus: Vec<String> = slot
                    .active_entries()
                    .skip(shards)
                    .map(|e| e.cluster_id.clone())
                    .collect();
                for cluster_id in surplus {
                    slot.set_state(&cluster_id, BrokerState::Draining);
                }
                shards
            } else if active > 0 && plan_changed && active < shards {
                let clusters: Vec<String> =
                    slot.active_entries().map(|e| e.cluster_id.clone()).collect();
                for cluster_id in clusters {
                    if slot.set_state(&cluster_id, BrokerState::Draining) {
                        tentative.push((index, cluster_id));
                    }
                }
                0
            } else {
                active
            };

            let need = shards.saturating_sub(placed);
            if need == 0 {
                slot.mark_applied();
            } else {
                requests.push(Request {
                    slot: index,
                    per_shard: self.per_shard(&plan),
                    need,
                });
            }
        }
        requests
    }

    fn relieve_overflow(
        &self,
        pool: &BrokerPool,
        slots: &mut [AddressSlot],
        requests: &mut Vec<Request>,
        tentative: &mut Vec<(usize, String)>,
    ) {
        let capacity = self.capacity();
        for broker in pool.brokers.iter().filter(|b| b.is_placement_target()) {
            let cluster_id = broker.cluster_id.as_str();
            let mut residents: Vec<(usize, f64)> = slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.is_live() && s.active_entries().any(|e| e.cluster_id == cluster_id))
                .map(|(i, s)| (i, self.entry_cost(s, BrokerState::Active)))
                .collect();
            let mut load: f64 = residents.iter().map(|(_, cost)| cost).sum();
            if load <= capacity + COST_EPSILON {
                continue;
            }

            residents.sort_by(|a, b| {
                b.1.total_cmp(&a.1)
                    .then_with(|| slots[a.0].name.cmp(&slots[b.0].name))
            });
            for (index, cost) in residents {
                if load <= capacity + COST_EPSILON {
                    break;
                }
                if !slots[index].needs_broker()
                    || !slots[index].set_state(cluster_id, BrokerState::Draining)
                {
                    continue;
                }
                tentative.push((index, cluster_id.to_string()));
                load -= cost;
                match requests.iter_mut().find(|r| r.slot == index) {
                    Some(request) => request.need += 1,
                    None => requests.push(Request {
                        slot: index,
                        per_shard: cost,
                        need: 1,
                    }),
                }
                tracing::debug!(
                    cluster_id,
                    address = %slots[index].name,
                    "Moving address off overloaded broker"
                );
            }
        }
    }

    /// Broker share held by one assignment of `slot` in `state`.
    ///
    /// Active assignments follow the requested plan; draining ones still
    /// hold what the previous placement put there.
    fn entry_cost(&self, slot: &AddressSlot, state: BrokerState) -> f64 {
        let current = slot.plan.as_ref().filter(|p| p.needs_broker());
        let placed = slot.applied.as_ref();
        let plan = if state == BrokerState::Active {
            current.or(placed)
        } else {
            placed.or(current)
        };
        plan.map_or(0.0, |p| self.per_shard(p))
    }

    fn loads(&self, pool: &BrokerPool, slots: &[AddressSlot]) -> HashMap<String, f64> {
        let mut loads: HashMap<String, f64> = pool
            .brokers
            .iter()
            .map(|b| (b.cluster_id.clone(), 0.0))
            .collect();
        for slot in slots {
            for entry in &slot.entries {
                if lifecycle::holds_messages(entry.state) {
                    *loads.entry(entry.cluster_id.clone()).or_default() +=
                        self.entry_cost(slot, entry.state);
                }
            }
        }
        loads
    }

    fn fulfil(
        &self,
        pool: &mut BrokerPool,
        slots: &mut [AddressSlot],
        loads: &mut HashMap<String, f64>,
        request: &Request,
        tentative: &[(usize, String)],
        outcome: &mut PlacementOutcome,
    ) {
        let capacity = self.capacity();
        let (_, max) = self.bounds();
        let slot = &mut slots[request.slot];
        let draining_cost = self.entry_cost(slot, BrokerState::Draining);
        // (broker, load added, revived a draining entry)
        let mut chosen: Vec<(String, f64, bool)> = Vec::new();
        let mut provisioned: Vec<String> = Vec::new();

        for _ in 0..request.need {
            let fit = pool
                .brokers
                .iter()
                .filter(|b| b.is_placement_target())
                .map(|b| b.cluster_id.as_str())
                .find(|cluster_id| {
                    !slot.has_entry_on(cluster_id)
                        && !chosen.iter().any(|(c, _, _)| c == cluster_id)
                        && loads.get(*cluster_id).copied().unwrap_or(0.0) + request.per_shard
                            <= capacity + COST_EPSILON
                })
                .map(str::to_string);

            let pick = match fit {
                Some(cluster_id) => (cluster_id, request.per_shard, false),
                None if pool.count(BrokerState::Active) < max
                    && request.per_shard <= capacity + COST_EPSILON =>
                {
                    let cluster_id = pool.provision(self.infra_id);
                    provisioned.push(cluster_id.clone());
                    (cluster_id, request.per_shard, false)
                }
                // Last resort: take back a broker this pass started moving
                // the address off; its messages never leave.
                None => {
                    let delta = request.per_shard - draining_cost;
                    let revived = tentative
                        .iter()
                        .filter(|(i, _)| *i == request.slot)
                        .map(|(_, cluster_id)| cluster_id.as_str())
                        .find(|cluster_id| {
                            !chosen.iter().any(|(c, _, _)| c == cluster_id)
                                && pool
                                    .get(cluster_id)
                                    .is_some_and(BrokerInstance::is_placement_target)
                                && loads.get(*cluster_id).copied().unwrap_or(0.0) + delta
                                    <= capacity + COST_EPSILON
                        });
                    match revived {
                        Some(cluster_id) => (cluster_id.to_string(), delta, true),
                        None => break,
                    }
                }
            };
            *loads.entry(pick.0.clone()).or_default() += pick.1;
            chosen.push(pick);
        }

        if chosen.len() == request.need {
            for (cluster_id, _, revived) in &chosen {
                if *revived {
                    slot.set_state(cluster_id, BrokerState::Active);
                } else {
                    slot.entries.push(BrokerStatus::active(cluster_id.clone()));
                }
            }
            slot.mark_applied();
            if slot.is_draining() {
                outcome.moved.push(slot.name.clone());
            }
            outcome.provisioned.extend(provisioned);
            let brokers: Vec<&str> = chosen.iter().map(|(c, _, _)| c.as_str()).collect();
            tracing::debug!(address = %slot.name, ?brokers, "Placed address");
            return;
        }

        // Roll back: nothing of this request is applied.
        for (cluster_id, added, _) in &chosen {
            if let Some(load) = loads.get_mut(cluster_id) {
                *load -= added;
            }
        }
        if !provisioned.is_empty() {
            // Unpublished names hold the highest ordinals and may be handed out again.
            pool.brokers.retain(|b| !provisioned.contains(&b.cluster_id));
            #[allow(clippy::cast_possible_truncation)]
            let unused = provisioned.len() as u32;
            pool.next_ordinal = pool.next_ordinal.saturating_sub(unused);
        }
        for (_, cluster_id) in tentative.iter().filter(|(i, _)| *i == request.slot) {
            slot.set_state(cluster_id, BrokerState::Active);
        }
        #[allow(clippy::cast_possible_truncation)]
        let shards = request.need as u32;
        slot.observe(Condition::CapacityExhausted {
            shards,
            per_shard: request.per_shard,
        });
        outcome.exhausted.push(slot.name.clone());
        tracing::warn!(
            address = %slot.name,
            shards,
            per_shard = request.per_shard,
            "Broker capacity exhausted"
        );
    }

    fn ensure_minimum(&self, pool: &mut BrokerPool, outcome: &mut PlacementOutcome) {
        let (min, _) = self.bounds();
        while pool.count(BrokerState::Active) < min {
            outcome.provisioned.push(pool.provision(self.infra_id));
        }
    }

    /// Idle brokers hold nothing, so they skip the drain and go straight to
    /// Draining; the drain step retires them in the same pass.
    fn retire_idle(
        &self,
        pool: &mut BrokerPool,
        slots: &[AddressSlot],
        now: DateTime<Utc>,
        outcome: &mut PlacementOutcome,
    ) {
        let (min, _) = self.bounds();
        let referenced: HashSet<&str> = slots
            .iter()
            .flat_map(|s| s.entries.iter())
            .map(|e| e.cluster_id.as_str())
            .collect();
        let serving = pool
            .brokers
            .iter()
            .filter(|b| b.is_placement_target() && referenced.contains(b.cluster_id.as_str()))
            .count();
        let mut removable = pool
            .count(BrokerState::Active)
            .saturating_sub(serving.max(min));

        for broker in pool.brokers.iter_mut().rev() {
            if removable == 0 {
                break;
            }
            if broker.is_placement_target()
                && !referenced.contains(broker.cluster_id.as_str())
                && Self::start_drain(broker, now, "idle")
            {
                outcome.provisioned.retain(|c| *c != broker.cluster_id);
                outcome.removed.push(broker.cluster_id.clone());
                removable -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::fixtures::{broker_spec, plan, slot};
    use chrono::Duration;

    fn infra_id() -> InfraId {
        InfraId::derive("tenant", "space")
    }

    fn spec(min: u32, max: u32, capacity: f64) -> BrokerSpec {
        BrokerSpec {
            capacity: Some(capacity),
            ..broker_spec(min, max)
        }
    }

    fn clusters(slot: &AddressSlot, state: BrokerState) -> Vec<String> {
        slot.entries
            .iter()
            .filter(|e| e.state == state)
            .map(|e| e.cluster_id.clone())
            .collect()
    }

    #[test]
    fn shard_count_prefers_declared_factor() {
        let config = ControlConfig::default();

        assert_eq!(shard_count(&plan("small", 0.3, Some(2)), 1.0, &config), 2);
        assert_eq!(shard_count(&plan("small", 0.3, None), 1.0, &config), 1);
        assert_eq!(shard_count(&plan("big", 2.5, None), 1.0, &config), 3);
        assert_eq!(shard_count(&plan("huge", 9.0, None), 1.0, &config), 4);
        // Threshold is relative to broker capacity.
        assert_eq!(shard_count(&plan("big", 2.5, None), 4.0, &config), 1);
    }

    #[test]
    fn first_fit_decreasing_packs_brokers() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![
            slot("d", &plan("p3", 0.3, None)),
            slot("a", &plan("p6", 0.6, None)),
            slot("c", &plan("p4", 0.4, None)),
            slot("b", &plan("p5", 0.5, None)),
        ];

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        let b0 = BrokerInstance::cluster_name(&infra_id, 0);
        let b1 = BrokerInstance::cluster_name(&infra_id, 1);
        assert_eq!(outcome.provisioned, vec![b0.clone(), b1.clone()]);
        assert_eq!(clusters(&slots[1], BrokerState::Active), vec![b0.clone()]);
        assert_eq!(clusters(&slots[3], BrokerState::Active), vec![b1.clone()]);
        assert_eq!(clusters(&slots[2], BrokerState::Active), vec![b0]);
        assert_eq!(clusters(&slots[0], BrokerState::Active), vec![b1]);
        assert!(slots.iter().all(|s| s.applied_plan.is_some()));
    }

    #[test]
    fn rescheduling_is_idempotent() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![
            slot("a", &plan("p6", 0.6, None)),
            slot("b", &plan("p5", 0.5, None)),
            slot("c", &plan("sharded", 0.4, Some(2))),
        ];

        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        let pool_before = pool.clone();
        let entries_before: Vec<_> = slots.iter().map(|s| s.entries.clone()).collect();

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert!(outcome.is_quiet());
        assert_eq!(pool, pool_before);
        let entries_after: Vec<_> = slots.iter().map(|s| s.entries.clone()).collect();
        assert_eq!(entries_after, entries_before);
    }

    #[test]
    fn capacity_exhaustion_leaves_address_unplaced() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 1, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![
            slot("a", &plan("p6", 0.6, None)),
            slot("b", &plan("p6", 0.6, None)),
        ];

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(outcome.exhausted, vec!["b".to_string()]);
        assert!(slots[1].entries.is_empty());
        assert!(matches!(
            slots[1].conditions[0],
            Condition::CapacityExhausted { shards: 1, .. }
        ));
        assert_eq!(pool.brokers.len(), 1);
    }

    #[test]
    fn shards_land_on_distinct_brokers() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("big", &plan("sharded", 0.3, Some(2)))];

        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        let active = clusters(&slots[0], BrokerState::Active);
        assert_eq!(active.len(), 2);
        assert_ne!(active[0], active[1]);
    }

    #[test]
    fn partial_shard_placement_rolls_back() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 1, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("big", &plan("sharded", 0.3, Some(2)))];

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(outcome.exhausted, vec!["big".to_string()]);
        assert!(slots[0].entries.is_empty());
        // The minimum broker stays, nothing else was left behind.
        assert_eq!(pool.brokers.len(), 1);
        assert_eq!(pool.next_ordinal, 1);
    }

    #[test]
    fn plan_change_to_more_shards_moves_address() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let small = plan("small", 0.3, None);
        let mut slots = vec![slot("orders", &small)];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        let original = clusters(&slots[0], BrokerState::Active);

        slots[0].plan = Some(plan("large", 0.3, Some(2)));
        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(outcome.moved, vec!["orders".to_string()]);
        assert_eq!(clusters(&slots[0], BrokerState::Draining), original);
        let successors = clusters(&slots[0], BrokerState::Active);
        assert_eq!(successors.len(), 2);
        assert!(!successors.contains(&original[0]));
        assert_eq!(slots[0].applied_plan.as_deref(), Some("large"));
    }

    #[test]
    fn abandoned_move_keeps_old_assignment_active() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 1, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("orders", &plan("small", 0.3, None))];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        slots[0].plan = Some(plan("large", 0.3, Some(2)));
        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(outcome.exhausted, vec!["orders".to_string()]);
        assert_eq!(slots[0].active_count(), 1);
        assert!(!slots[0].is_draining());
        assert_eq!(slots[0].applied_plan.as_deref(), Some("small"));
    }

    #[test]
    fn plan_change_to_fewer_shards_keeps_one_in_place() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 2, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("orders", &plan("large", 0.3, Some(2)))];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        let b0 = BrokerInstance::cluster_name(&infra_id, 0);
        let b1 = BrokerInstance::cluster_name(&infra_id, 1);
        assert_eq!(clusters(&slots[0], BrokerState::Active), vec![b0.clone(), b1.clone()]);

        slots[0].plan = Some(plan("small", 0.3, None));
        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert!(outcome.exhausted.is_empty());
        assert!(outcome.provisioned.is_empty());
        assert_eq!(clusters(&slots[0], BrokerState::Active), vec![b0]);
        assert_eq!(clusters(&slots[0], BrokerState::Draining), vec![b1]);
        assert_eq!(slots[0].applied_plan.as_deref(), Some("small"));
        assert!(slots[0].conditions.is_empty());
    }

    #[test]
    fn plan_change_reuses_draining_broker_when_pool_is_full() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 2, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("orders", &plan("small", 0.3, None))];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        let b0 = BrokerInstance::cluster_name(&infra_id, 0);
        let b1 = BrokerInstance::cluster_name(&infra_id, 1);

        slots[0].plan = Some(plan("large", 0.3, Some(2)));
        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert!(outcome.exhausted.is_empty());
        assert_eq!(outcome.provisioned, vec![b1.clone()]);
        assert_eq!(clusters(&slots[0], BrokerState::Active), vec![b0, b1]);
        assert!(!slots[0].is_draining());
        assert_eq!(slots[0].applied_plan.as_deref(), Some("large"));
    }

    #[test]
    fn shrink_drains_highest_ordinals_and_reassigns() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let wide = spec(1, 3, 0.5);
        let mut pool = BrokerPool::default();
        let mut slots = vec![
            slot("a", &plan("p4", 0.4, None)),
            slot("b", &plan("p4", 0.4, None)),
            slot("c", &plan("p4", 0.4, None)),
        ];
        BrokerScheduler::new(&infra_id, Some(&wide), &config).schedule(
            &mut pool,
            &mut slots,
            &HashMap::new(),
            Utc::now(),
        );
        assert_eq!(pool.count(BrokerState::Active), 3);

        let narrow = spec(1, 1, 2.0);
        let outcome = BrokerScheduler::new(&infra_id, Some(&narrow), &config).schedule(
            &mut pool,
            &mut slots,
            &HashMap::new(),
            Utc::now(),
        );

        let b0 = BrokerInstance::cluster_name(&infra_id, 0);
        assert_eq!(
            outcome.draining,
            vec![
                BrokerInstance::cluster_name(&infra_id, 2),
                BrokerInstance::cluster_name(&infra_id, 1)
            ]
        );
        assert_eq!(pool.count(BrokerState::Active), 1);
        for slot in &slots {
            assert_eq!(clusters(slot, BrokerState::Active), vec![b0.clone()]);
        }
        assert!(slots[1].is_draining());
        assert!(slots[2].is_draining());
        assert!(!slots[0].is_draining());
    }

    #[test]
    fn unhealthy_broker_drains_after_grace() {
        let config = ControlConfig {
            unhealthy_grace_seconds: 60,
            ..Default::default()
        };
        let infra_id = infra_id();
        let spec = spec(1, 2, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("a", &plan("p4", 0.4, None))];
        let start = Utc::now();
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), start);
        let b0 = BrokerInstance::cluster_name(&infra_id, 0);
        let unhealthy = HashMap::from([(b0.clone(), false)]);

        let outcome = scheduler.schedule(&mut pool, &mut slots, &unhealthy, start);
        assert!(outcome.draining.is_empty());
        assert_eq!(pool.get(&b0).unwrap().unhealthy_since, Some(start));

        let later = start + Duration::seconds(61);
        let outcome = scheduler.schedule(&mut pool, &mut slots, &unhealthy, later);
        assert_eq!(outcome.draining, vec![b0.clone()]);
        assert_eq!(clusters(&slots[0], BrokerState::Draining), vec![b0]);
        assert_eq!(slots[0].active_count(), 1);
    }

    #[test]
    fn recovery_clears_unhealthy_mark() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 1, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        let b0 = BrokerInstance::cluster_name(&infra_id, 0);

        scheduler.schedule(&mut pool, &mut slots, &HashMap::from([(b0.clone(), false)]), Utc::now());
        assert!(pool.get(&b0).unwrap().unhealthy_since.is_some());
        scheduler.schedule(&mut pool, &mut slots, &HashMap::from([(b0.clone(), true)]), Utc::now());
        assert!(pool.get(&b0).unwrap().unhealthy_since.is_none());
    }

    #[test]
    fn overloaded_broker_sheds_largest_address() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 2, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![
            slot("a", &plan("p4", 0.4, None)),
            slot("b", &plan("p4", 0.4, None)),
        ];
        scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());
        assert_eq!(pool.brokers.len(), 1);

        // Same shard shape, bigger share: b0 would hold 1.2.
        slots[0].plan = Some(plan("p8", 0.8, None));
        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        let b1 = BrokerInstance::cluster_name(&infra_id, 1);
        assert_eq!(outcome.moved, vec!["a".to_string()]);
        assert_eq!(clusters(&slots[0], BrokerState::Active), vec![b1]);
        assert!(slots[0].is_draining());
        assert!(!slots[1].is_draining());
    }

    #[test]
    fn idle_brokers_are_retired_down_to_minimum() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        pool.provision(&infra_id);
        pool.provision(&infra_id);
        pool.provision(&infra_id);
        let mut slots = vec![];

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(
            outcome.removed,
            vec![
                BrokerInstance::cluster_name(&infra_id, 2),
                BrokerInstance::cluster_name(&infra_id, 1)
            ]
        );
        assert_eq!(pool.count(BrokerState::Active), 1);
        assert_eq!(pool.count(BrokerState::Draining), 2);
        assert!(outcome.draining.is_empty());
        assert_eq!(pool.next_ordinal, 3);
    }

    #[test]
    fn retiring_drains_everything() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(1, 3, 1.0);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("a", &plan("p4", 0.4, None))];
        BrokerScheduler::new(&infra_id, Some(&spec), &config).schedule(
            &mut pool,
            &mut slots,
            &HashMap::new(),
            Utc::now(),
        );

        slots[0].terminating = true;
        BrokerScheduler::new(&infra_id, Some(&spec), &config)
            .retiring(true)
            .schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert_eq!(pool.count(BrokerState::Active), 0);
        assert_eq!(pool.count(BrokerState::Draining), 1);
        assert_eq!(slots[0].active_count(), 0);
        assert!(slots[0].is_draining());
    }

    #[test]
    fn zero_broker_plans_need_no_placement() {
        let config = ControlConfig::default();
        let infra_id = infra_id();
        let spec = spec(0, 3, 1.0);
        let scheduler = BrokerScheduler::new(&infra_id, Some(&spec), &config);
        let mut pool = BrokerPool::default();
        let mut slots = vec![slot("direct", &plan("anycast", 0.0, None))];

        let outcome = scheduler.schedule(&mut pool, &mut slots, &HashMap::new(), Utc::now());

        assert!(outcome.is_quiet());
        assert!(pool.brokers.is_empty());
        assert!(slots[0].entries.is_empty());
        assert_eq!(slots[0].applied_plan.as_deref(), Some("anycast"));
    }
}
