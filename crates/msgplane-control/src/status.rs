//! Status aggregation and the status board.
//!
//! The aggregator is the only place that decides an address's phase. It
//! folds the pass's conditions and the readiness observed for the address's
//! brokers and the router mesh into one [`Status`]. Messages are rebuilt
//! from scratch every pass, so a diagnostic disappears as soon as its
//! condition stops holding.
//!
//! The [`StatusBoard`] keeps the last committed snapshot of every space for
//! the read path. A snapshot is replaced whole at the end of a pass; readers
//! never see a pass in progress.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use msgplane_core::{AddressSpaceId, ResourceCost};
use msgplane_store::{Address, AddressSpace, BrokerPool, BrokerState, Phase, Status};
use parking_lot::RwLock;
use serde::Serialize;

use crate::accountant::QuotaUsage;
use crate::lifecycle;
use crate::slot::{AddressSlot, Condition};

/// Readiness observed for one space during a pass.
#[derive(Debug, Clone, Default)]
pub struct Observations {
    /// Readiness per broker cluster; missing brokers count as not ready.
    pub brokers: HashMap<String, bool>,
    /// Router mesh readiness; true for spaces without routers.
    pub routers: bool,
}

impl Observations {
    fn broker_ready(&self, cluster_id: &str) -> bool {
        self.brokers.get(cluster_id).copied().unwrap_or(false)
    }
}

/// Compute the status of one address.
///
/// Not-ready facts are recorded on the slot as conditions first; at most
/// `max_messages` diagnostics are published.
pub fn aggregate(slot: &mut AddressSlot, observed: &Observations, max_messages: usize) -> Status {
    if !slot.terminating {
        let unready: Vec<String> = slot
            .active_entries()
            .filter(|e| !observed.broker_ready(&e.cluster_id))
            .map(|e| e.cluster_id.clone())
            .collect();
        for cluster_id in unready {
            slot.observe(Condition::BrokerNotReady { cluster_id });
        }
        if slot.plan.is_some() && !observed.routers {
            slot.observe(Condition::RoutersNotReady);
        }
    }

    let placed = if slot.needs_broker() {
        slot.active_count() > 0
            && slot.entries.iter().all(|e| e.state == BrokerState::Active)
            && slot.applied_plan.as_deref() == slot.plan.as_ref().map(|p| p.name.as_str())
    } else {
        slot.entries.is_empty()
    };
    let ready = !slot.terminating && slot.plan.is_some() && placed && slot.conditions.is_empty();

    let phase = if slot.terminating {
        Phase::Terminating
    } else if slot.conditions.iter().any(Condition::is_failure) {
        Phase::Failed
    } else if ready {
        Phase::Active
    } else if !slot.entries.is_empty() || (slot.plan.is_some() && !slot.needs_broker()) {
        Phase::Configuring
    } else {
        Phase::Pending
    };

    let phase = match lifecycle::validate_transition(&slot.name, slot.previous_phase, phase) {
        Ok(phase) => phase,
        Err(e) => {
            tracing::warn!(address = %slot.name, error = %e, "Keeping previous phase");
            slot.previous_phase
        }
    };
    let ready = ready && phase == Phase::Active;
    if phase != slot.previous_phase {
        tracing::debug!(
            address = %slot.name,
            from = ?slot.previous_phase,
            to = ?phase,
            "Address phase changed"
        );
    }

    let messages = slot
        .conditions
        .iter()
        .take(max_messages)
        .map(ToString::to_string)
        .collect();
    slot.status_with(ready, phase, messages)
}

/// Published status of one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressStatus {
    /// Resource name.
    pub name: String,
    /// Messaging address.
    pub address: String,
    /// Requested plan.
    pub plan: String,
    /// Aggregated status.
    pub status: Status,
}

impl From<&Address> for AddressStatus {
    fn from(record: &Address) -> Self {
        Self {
            name: record.name.clone(),
            address: record.address.clone(),
            plan: record.plan.clone(),
            status: record.status.clone(),
        }
    }
}

/// Published status of one address space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpaceStatus {
    /// The space.
    pub space_id: AddressSpaceId,
    /// Space plan.
    pub plan: String,
    /// Record version the snapshot was computed from.
    pub version: u64,
    /// Deletion in progress.
    pub deleting: bool,
    /// Brokers still holding messages.
    pub broker_replicas: u32,
    /// Router replicas applied.
    pub router_replicas: u32,
    /// Quota claimed by live addresses.
    pub consumed: ResourceCost,
    /// Quota left.
    pub available: ResourceCost,
    /// Per-address statuses, ordered by name.
    pub addresses: Vec<AddressStatus>,
    /// When the snapshot was computed.
    pub updated_at: DateTime<Utc>,
}

impl SpaceStatus {
    /// Build a snapshot from committed records.
    #[must_use]
    pub fn from_records(
        space: &AddressSpace,
        addresses: &[Address],
        pool: &BrokerPool,
        usage: QuotaUsage,
    ) -> Self {
        let brokers = pool
            .brokers
            .iter()
            .filter(|b| lifecycle::holds_messages(b.state))
            .count();
        Self {
            space_id: space.space_id,
            plan: space.plan.clone(),
            version: space.version,
            deleting: space.deleting,
            broker_replicas: u32::try_from(brokers).unwrap_or(u32::MAX),
            router_replicas: pool.router_replicas,
            consumed: usage.consumed,
            available: usage.available,
            addresses: addresses.iter().map(AddressStatus::from).collect(),
            updated_at: Utc::now(),
        }
    }

    /// Look up one address.
    #[must_use]
    pub fn address(&self, name: &str) -> Option<&AddressStatus> {
        self.addresses.iter().find(|a| a.name == name)
    }
}

/// Last committed status snapshot per space.
#[derive(Debug, Default)]
pub struct StatusBoard {
    spaces: RwLock<HashMap<AddressSpaceId, Arc<SpaceStatus>>>,
}

impl StatusBoard {
    /// Create an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of a space.
    pub fn publish(&self, status: SpaceStatus) {
        self.spaces.write().insert(status.space_id, Arc::new(status));
    }

    /// The snapshot of a space.
    #[must_use]
    pub fn get(&self, space_id: &AddressSpaceId) -> Option<Arc<SpaceStatus>> {
        self.spaces.read().get(space_id).cloned()
    }

    /// The status of one address from the last snapshot.
    #[must_use]
    pub fn address(&self, space_id: &AddressSpaceId, name: &str) -> Option<AddressStatus> {
        self.get(space_id)?.address(name).cloned()
    }

    /// Forget a space.
    pub fn remove(&self, space_id: &AddressSpaceId) {
        self.spaces.write().remove(space_id);
    }

    /// Number of spaces on the board.
    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }

    /// Returns true if no space is on the board.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.read().is_empty()
    }
}
