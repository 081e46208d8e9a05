//! Per-pass working state of one address.
//!
//! A reconciliation pass loads every address of a space into an
//! [`AddressSlot`], lets placement, drain and status aggregation work on the
//! slots in order, and publishes the result in one commit. Components record
//! what they observed as [`Condition`]s; only the status aggregator turns
//! conditions into a phase.

use std::fmt;

use msgplane_store::{
    Address, AddressPlan, AddressSpacePlan, BrokerState, BrokerStatus, Phase, Status,
};

use crate::catalog::CatalogSnapshot;
use crate::lifecycle;

/// A fact about an address observed during one pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The address references a plan that is absent or not permitted.
    UnknownPlan(String),
    /// No broker had room for the address and the pool is at its bound.
    CapacityExhausted {
        /// Shards that could not be placed.
        shards: u32,
        /// Broker share of one shard.
        per_shard: f64,
    },
    /// A draining assignment has no successor to hand over to yet.
    AwaitingSuccessor {
        /// The draining broker.
        cluster_id: String,
    },
    /// The successor assignment did not become ready within the budget.
    SuccessorNotReady {
        /// The draining broker.
        cluster_id: String,
    },
    /// The broker still held messages or consumers when the budget ran out.
    DrainTimedOut {
        /// The draining broker.
        cluster_id: String,
    },
    /// The broker could not be asked for drain statistics.
    BrokerUnreachable {
        /// The broker.
        cluster_id: String,
        /// The underlying error.
        reason: String,
    },
    /// An assigned broker does not report ready.
    BrokerNotReady {
        /// The broker.
        cluster_id: String,
    },
    /// The router mesh does not report ready.
    RoutersNotReady,
    /// Applying a workload failed.
    InfraApplyFailed {
        /// Object that could not be applied.
        object: String,
        /// The underlying error.
        reason: String,
    },
}

impl Condition {
    /// Returns true if the condition needs a tenant change to resolve.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::UnknownPlan(_))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPlan(plan) => write!(f, "Unknown address plan '{plan}'"),
            Self::CapacityExhausted { shards, per_shard } => write!(
                f,
                "Unable to place {shards} shard(s) of {per_shard:.3} broker capacity: broker pool exhausted"
            ),
            Self::AwaitingSuccessor { cluster_id } => {
                write!(f, "Draining from {cluster_id} is waiting for a new placement")
            }
            Self::SuccessorNotReady { cluster_id } => write!(
                f,
                "Draining from {cluster_id} is waiting for the new placement to become ready"
            ),
            Self::DrainTimedOut { cluster_id } => {
                write!(f, "Drain of {cluster_id} did not complete within its budget")
            }
            Self::BrokerUnreachable { cluster_id, reason } => {
                write!(f, "Broker {cluster_id} unreachable: {reason}")
            }
            Self::BrokerNotReady { cluster_id } => write!(f, "Broker {cluster_id} is not ready"),
            Self::RoutersNotReady => write!(f, "Router mesh is not ready"),
            Self::InfraApplyFailed { object, reason } => {
                write!(f, "Failed to apply {object}: {reason}")
            }
        }
    }
}

/// Working state of one address during a pass.
#[derive(Debug, Clone)]
pub struct AddressSlot {
    /// Resource name.
    pub name: String,
    /// Messaging address.
    pub address: String,
    /// The requested plan, if known and permitted.
    pub plan: Option<AddressPlan>,
    /// Name of the plan the current placement was computed for.
    pub applied_plan: Option<String>,
    /// The plan the current placement was computed for, if still known.
    pub applied: Option<AddressPlan>,
    /// Deletion requested, for the address or its space.
    pub terminating: bool,
    /// Broker assignments.
    pub entries: Vec<BrokerStatus>,
    /// Facts observed this pass.
    pub conditions: Vec<Condition>,
    /// Phase published by the previous pass.
    pub previous_phase: Phase,
}

impl AddressSlot {
    /// Load a slot from its stored record.
    #[must_use]
    pub fn load(
        record: &Address,
        catalog: &CatalogSnapshot,
        space_plan: Option<&AddressSpacePlan>,
        space_deleting: bool,
    ) -> Self {
        let plan = space_plan
            .and_then(|sp| catalog.permitted_plan(sp, &record.plan).ok())
            .cloned();
        let applied = record
            .applied_plan
            .as_deref()
            .and_then(|name| catalog.address_plan(name))
            .cloned();
        let mut conditions = Vec::new();
        if plan.is_none() && !record.terminating {
            conditions.push(Condition::UnknownPlan(record.plan.clone()));
        }
        Self {
            name: record.name.clone(),
            address: record.address.clone(),
            plan,
            applied_plan: record.applied_plan.clone(),
            applied,
            terminating: record.terminating || space_deleting,
            entries: record.status.broker_statuses.clone(),
            conditions,
            previous_phase: record.status.phase,
        }
    }

    /// Returns true if the address still holds a quota claim.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.terminating
    }

    /// Returns true if the requested plan lives on brokers.
    #[must_use]
    pub fn needs_broker(&self) -> bool {
        self.plan.as_ref().is_some_and(AddressPlan::needs_broker)
    }

    /// Active assignments.
    pub fn active_entries(&self) -> impl Iterator<Item = &BrokerStatus> {
        self.entries
            .iter()
            .filter(|e| e.state == BrokerState::Active)
    }

    /// Number of active assignments.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active_entries().count()
    }

    /// Returns true if any assignment is draining.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.state == BrokerState::Draining)
    }

    /// Returns true if the address has an assignment on `cluster_id`.
    #[must_use]
    pub fn has_entry_on(&self, cluster_id: &str) -> bool {
        self.entries.iter().any(|e| e.cluster_id == cluster_id)
    }

    /// Move the assignment on `cluster_id` to `state`.
    ///
    /// Returns true if the assignment existed and the move was legal.
    pub fn set_state(&mut self, cluster_id: &str, state: BrokerState) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.cluster_id == cluster_id) else {
            return false;
        };
        match lifecycle::validate_broker_transition(cluster_id, entry.state, state) {
            Ok(next) => {
                entry.state = next;
                true
            }
            Err(e) => {
                tracing::warn!(address = %self.name, error = %e, "Rejected assignment change");
                false
            }
        }
    }

    /// Record a condition once.
    pub fn observe(&mut self, condition: Condition) {
        if !self.conditions.contains(&condition) {
            self.conditions.push(condition);
        }
    }

    /// Record that the current placement matches the requested plan.
    pub fn mark_applied(&mut self) {
        if let Some(plan) = &self.plan {
            self.applied_plan = Some(plan.name.clone());
            self.applied = Some(plan.clone());
        }
    }

    /// Build a status carrying the slot's current assignments.
    #[must_use]
    pub fn status_with(&self, ready: bool, phase: Phase, messages: Vec<String>) -> Status {
        Status {
            ready,
            phase,
            messages,
            broker_statuses: self.entries.clone(),
        }
    }
}
