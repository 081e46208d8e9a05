//! Migration and draining.
//!
//! Retires Draining assignments without losing messages. For each
//! (address, broker) pair in Draining:
//!
//! 1. wait until every Active successor assignment of the address reports
//!    ready, unless the address or its space is terminating;
//! 2. poll the broker's drain statistics until nothing is in flight and no
//!    consumer is attached;
//! 3. mark the assignment Drained and drop it.
//!
//! Both waits run under the pass's [`TimeoutBudget`]s. An assignment whose
//! wait fails stays Draining and carries a condition; the next pass retries.
//! Brokers are never deleted here. A Draining broker that no assignment
//! references anymore becomes Drained and is decommissioned after the pass
//! commits.

use std::collections::HashMap;

use msgplane_infra::{Infra, InfraOwner};
use msgplane_store::{BrokerPool, BrokerState};

use crate::budget::{PollOutcome, Supersede, TimeoutBudget};
use crate::lifecycle;
use crate::slot::{AddressSlot, Condition};
use crate::types::ControlConfig;

/// What one drain step achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// `(address, cluster_id)` pairs that finished draining.
    pub drained: Vec<(String, String)>,
    /// Brokers that became Drained.
    pub retired: Vec<String>,
    /// The step stopped early for a newer trigger.
    pub superseded: bool,
}

enum SuccessorState {
    Ready,
    NotReady,
    Unreachable(String),
}

/// Runs the drain protocol for one space.
pub struct DrainOrchestrator<'a> {
    infra: &'a dyn Infra,
    owner: &'a InfraOwner,
    config: &'a ControlConfig,
    space_deleting: bool,
}

impl<'a> DrainOrchestrator<'a> {
    /// Create an orchestrator for the space owned by `owner`.
    #[must_use]
    pub const fn new(
        infra: &'a dyn Infra,
        owner: &'a InfraOwner,
        config: &'a ControlConfig,
        space_deleting: bool,
    ) -> Self {
        Self {
            infra,
            owner,
            config,
            space_deleting,
        }
    }

    fn needs_successor(&self, slot: &AddressSlot) -> bool {
        // Zero-broker plans hand over to the routers.
        let leaves_brokers = slot.plan.is_some() && !slot.needs_broker();
        !self.space_deleting && !slot.terminating && !leaves_brokers
    }

    /// Drain every Draining assignment of `slots` and retire brokers left
    /// without assignments.
    pub async fn run(
        &self,
        slots: &mut [AddressSlot],
        pool: &mut BrokerPool,
        supersede: &mut Supersede,
    ) -> DrainReport {
        let mut report = DrainReport::default();

        let work: Vec<(usize, String)> = slots
            .iter()
            .enumerate()
            .flat_map(|(i, s)| {
                s.entries
                    .iter()
                    .filter(|e| e.state == BrokerState::Draining)
                    .map(move |e| (i, e.cluster_id.clone()))
            })
            .collect();

        if !work.is_empty() {
            let cleared = self.await_successors(slots, &work, supersede, &mut report).await;
            if !report.superseded {
                self.await_drain(slots, &cleared, supersede, &mut report).await;
            }
        }

        for slot in slots.iter_mut() {
            slot.entries.retain(|e| e.state != BrokerState::Drained);
        }
        self.retire_brokers(slots, pool, &mut report);
        report
    }

    /// Wait for successor readiness and return the work items allowed to drain.
    async fn await_successors(
        &self,
        slots: &mut [AddressSlot],
        work: &[(usize, String)],
        supersede: &mut Supersede,
        report: &mut DrainReport,
    ) -> Vec<(usize, String)> {
        let budget = TimeoutBudget::new(self.config.readiness_budget(), self.config.poll_interval());
        let mut readiness: HashMap<String, SuccessorState> = HashMap::new();
        let mut cleared = Vec::new();

        for (index, cluster_id) in work {
            if !self.needs_successor(&slots[*index]) {
                cleared.push((*index, cluster_id.clone()));
                continue;
            }
            let successors: Vec<String> = slots[*index]
                .active_entries()
                .map(|e| e.cluster_id.clone())
                .collect();
            if successors.is_empty() {
                slots[*index].observe(Condition::AwaitingSuccessor {
                    cluster_id: cluster_id.clone(),
                });
                continue;
            }

            let mut blocked = None;
            for successor in &successors {
                if !readiness.contains_key(successor) {
                    let outcome = self.probe_ready(&budget, supersede, successor).await;
                    let Some(outcome) = outcome else {
                        report.superseded = true;
                        return cleared;
                    };
                    readiness.insert(successor.clone(), outcome);
                }
                match &readiness[successor] {
                    SuccessorState::Ready => {}
                    SuccessorState::NotReady => {
                        blocked.get_or_insert(Condition::SuccessorNotReady {
                            cluster_id: cluster_id.clone(),
                        });
                    }
                    SuccessorState::Unreachable(reason) => {
                        blocked.get_or_insert(Condition::BrokerUnreachable {
                            cluster_id: successor.clone(),
                            reason: reason.clone(),
                        });
                    }
                }
            }
            match blocked {
                Some(condition) => slots[*index].observe(condition),
                None => cleared.push((*index, cluster_id.clone())),
            }
        }
        cleared
    }

    /// `None` if superseded.
    async fn probe_ready(
        &self,
        budget: &TimeoutBudget,
        supersede: &mut Supersede,
        cluster_id: &str,
    ) -> Option<SuccessorState> {
        let infra = self.infra;
        let owner = self.owner;
        let outcome = budget
            .poll_until(supersede, || async move {
                match infra.broker_ready(owner, cluster_id).await {
                    Ok(true) => Some(Ok(())),
                    Ok(false) => None,
                    Err(e) => Some(Err(e.to_string())),
                }
            })
            .await;
        match outcome {
            PollOutcome::Ready(Ok(())) => Some(SuccessorState::Ready),
            PollOutcome::Ready(Err(reason)) => Some(SuccessorState::Unreachable(reason)),
            PollOutcome::TimedOut => Some(SuccessorState::NotReady),
            PollOutcome::Superseded => None,
        }
    }

    async fn await_drain(
        &self,
        slots: &mut [AddressSlot],
        cleared: &[(usize, String)],
        supersede: &mut Supersede,
        report: &mut DrainReport,
    ) {
        let budget = TimeoutBudget::new(self.config.drain_budget(), self.config.poll_interval());
        let infra = self.infra;
        let owner = self.owner;

        for (index, cluster_id) in cleared {
            let slot = &mut slots[*index];
            let address = slot.address.as_str();
            let outcome = budget
                .poll_until(supersede, || async move {
                    match infra.drain_stats(owner, cluster_id, address).await {
                        Ok(stats) if stats.is_drained() => Some(Ok(())),
                        Ok(stats) => {
                            tracing::trace!(
                                cluster_id = %cluster_id,
                                address,
                                in_flight = stats.in_flight,
                                consumers = stats.consumers,
                                "Drain in progress"
                            );
                            None
                        }
                        Err(e) => Some(Err(e.to_string())),
                    }
                })
                .await;

            match outcome {
                PollOutcome::Ready(Ok(())) => {
                    if slot.set_state(cluster_id, BrokerState::Drained) {
                        tracing::info!(
                            space_id = %owner.space_id,
                            address = %slot.name,
                            cluster_id = %cluster_id,
                            "Address drained from broker"
                        );
                        report.drained.push((slot.name.clone(), cluster_id.clone()));
                    }
                }
                PollOutcome::Ready(Err(reason)) => {
                    tracing::warn!(
                        address = %slot.name,
                        cluster_id = %cluster_id,
                        error = %reason,
                        "Failed to read drain statistics"
                    );
                    slot.observe(Condition::BrokerUnreachable {
                        cluster_id: cluster_id.clone(),
                        reason,
                    });
                }
                PollOutcome::TimedOut => {
                    tracing::warn!(
                        address = %slot.name,
                        cluster_id = %cluster_id,
                        "Drain did not complete within budget"
                    );
                    slot.observe(Condition::DrainTimedOut {
                        cluster_id: cluster_id.clone(),
                    });
                }
                PollOutcome::Superseded => {
                    tracing::debug!(address = %slot.name, "Drain superseded by newer trigger");
                    report.superseded = true;
                    return;
                }
            }
        }
    }

    fn retire_brokers(&self, slots: &[AddressSlot], pool: &mut BrokerPool, report: &mut DrainReport) {
        for broker in pool
            .brokers
            .iter_mut()
            .filter(|b| b.state == BrokerState::Draining)
        {
            if slots.iter().any(|s| s.has_entry_on(&broker.cluster_id)) {
                continue;
            }
            if let Ok(state) = lifecycle::validate_broker_transition(
                &broker.cluster_id,
                broker.state,
                BrokerState::Drained,
            ) {
                broker.state = state;
                tracing::info!(
                    space_id = %self.owner.space_id,
                    cluster_id = %broker.cluster_id,
                    "Broker drained"
                );
                report.retired.push(broker.cluster_id.clone());
            }
        }
    }
}
