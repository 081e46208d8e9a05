//! Domain types stored in the database.
//!
//! These types represent the persisted state of address spaces, their
//! addresses (including the externally visible status), and the broker pool
//! each space runs on.

use chrono::{DateTime, Utc};
use msgplane_core::{AddressSpaceId, InfraId};
use serde::{Deserialize, Serialize};

/// The kind of address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSpaceType {
    /// Router mesh in front of a pool of brokers.
    Standard,
    /// A single broker, no routers.
    Brokered,
}

/// The kind of address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    /// Store-and-forward point to point.
    Queue,
    /// Store-and-forward publish/subscribe.
    Topic,
    /// Direct routed point to point, no broker.
    Anycast,
    /// Direct routed fan-out, no broker.
    Multicast,
}

/// An endpoint advertised by an address space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Endpoint name (`messaging`, `console`).
    pub name: String,
    /// Kubernetes service backing the endpoint.
    pub service: String,
    /// Service port.
    pub port: u16,
}

/// An address space record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressSpace {
    /// Unique identifier for the space.
    pub space_id: AddressSpaceId,
    /// Tenant namespace.
    pub namespace: String,
    /// Space name, unique within the namespace.
    pub name: String,
    /// Space type.
    pub space_type: AddressSpaceType,
    /// Name of the address space plan.
    pub plan: String,
    /// Identifier stamped on all provisioned infrastructure.
    pub infra_id: InfraId,
    /// Advertised endpoints.
    pub endpoints: Vec<Endpoint>,
    /// Optimistic concurrency token, bumped on every mutation of the record.
    pub version: u64,
    /// Deletion requested; the space is torn down once drained.
    #[serde(default)]
    pub deleting: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// An address record, including its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    /// Owning space.
    pub space_id: AddressSpaceId,
    /// Resource name, unique within the space.
    pub name: String,
    /// The messaging address clients attach to.
    pub address: String,
    /// Address type.
    pub address_type: AddressType,
    /// Name of the requested address plan.
    pub plan: String,
    /// The plan the current broker placement was computed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_plan: Option<String>,
    /// Deletion requested.
    #[serde(default)]
    pub terminating: bool,
    /// Externally visible status.
    #[serde(default)]
    pub status: Status,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Address {
    /// Returns true if the address still holds a quota claim.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !self.terminating
    }
}

/// Externally visible lifecycle stage of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Requested, no placement yet.
    #[default]
    Pending,
    /// Placement exists, infrastructure not ready yet.
    Configuring,
    /// Ready for traffic.
    Active,
    /// Deletion requested.
    Terminating,
    /// A condition requiring a tenant change (unknown plan).
    Failed,
}

/// State of one (address, broker) assignment or of a broker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerState {
    /// Serving.
    Active,
    /// Being retired; still holds messages.
    Draining,
    /// Retired; safe to remove.
    Drained,
}

/// Per-(address, broker) assignment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStatus {
    /// Broker cluster (StatefulSet) name.
    pub cluster_id: String,
    /// Broker container (pod) name.
    pub container_id: String,
    /// Assignment state.
    pub state: BrokerState,
}

impl BrokerStatus {
    /// Create an active assignment on a broker cluster.
    #[must_use]
    pub fn active(cluster_id: impl Into<String>) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            container_id: BrokerInstance::container_for(&cluster_id),
            cluster_id,
            state: BrokerState::Active,
        }
    }
}

/// Per-address aggregate status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Status {
    /// Ready for traffic.
    pub ready: bool,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Diagnostic messages for conditions true in the last pass.
    pub messages: Vec<String>,
    /// Broker assignments, more than one for sharded or migrating addresses.
    pub broker_statuses: Vec<BrokerStatus>,
}

impl Status {
    /// Active assignments.
    pub fn active_brokers(&self) -> impl Iterator<Item = &BrokerStatus> {
        self.broker_statuses
            .iter()
            .filter(|b| b.state == BrokerState::Active)
    }

    /// Returns true if the address has an assignment on `cluster_id`.
    #[must_use]
    pub fn is_assigned_to(&self, cluster_id: &str) -> bool {
        self.broker_statuses.iter().any(|b| b.cluster_id == cluster_id)
    }
}

/// One broker instance of a space's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerInstance {
    /// Broker cluster (StatefulSet) name.
    pub cluster_id: String,
    /// Ordinal within the pool; names are never reused.
    pub ordinal: u32,
    /// Lifecycle state of the instance.
    pub state: BrokerState,
    /// When readiness was first observed false, cleared on recovery.
    #[serde(default)]
    pub unhealthy_since: Option<DateTime<Utc>>,
    /// When the instance entered Draining.
    #[serde(default)]
    pub draining_since: Option<DateTime<Utc>>,
}

impl BrokerInstance {
    /// Create a fresh active instance.
    #[must_use]
    pub fn new(infra_id: &InfraId, ordinal: u32) -> Self {
        Self {
            cluster_id: Self::cluster_name(infra_id, ordinal),
            ordinal,
            state: BrokerState::Active,
            unhealthy_since: None,
            draining_since: None,
        }
    }

    /// Cluster name for the broker with the given ordinal.
    #[must_use]
    pub fn cluster_name(infra_id: &InfraId, ordinal: u32) -> String {
        format!("broker-{infra_id}-{ordinal}")
    }

    /// The single container of a broker cluster.
    #[must_use]
    pub fn container_for(cluster_id: &str) -> String {
        format!("{cluster_id}-0")
    }

    /// Returns true if the instance accepts new placements.
    #[must_use]
    pub fn is_placement_target(&self) -> bool {
        self.state == BrokerState::Active
    }
}

/// The broker pool and router size of one address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BrokerPool {
    /// Known broker instances, in ordinal order.
    pub brokers: Vec<BrokerInstance>,
    /// Router replicas last applied.
    pub router_replicas: u32,
    /// Next ordinal to hand out.
    pub next_ordinal: u32,
}

impl BrokerPool {
    /// Look up an instance by cluster name.
    #[must_use]
    pub fn get(&self, cluster_id: &str) -> Option<&BrokerInstance> {
        self.brokers.iter().find(|b| b.cluster_id == cluster_id)
    }

    /// Look up an instance by cluster name, mutably.
    pub fn get_mut(&mut self, cluster_id: &str) -> Option<&mut BrokerInstance> {
        self.brokers.iter_mut().find(|b| b.cluster_id == cluster_id)
    }

    /// Number of instances in the given state.
    #[must_use]
    pub fn count(&self, state: BrokerState) -> usize {
        self.brokers.iter().filter(|b| b.state == state).count()
    }

    /// Add a fresh instance and return its cluster name.
    pub fn provision(&mut self, infra_id: &InfraId) -> String {
        let instance = BrokerInstance::new(infra_id, self.next_ordinal);
        self.next_ordinal += 1;
        let cluster_id = instance.cluster_id.clone();
        self.brokers.push(instance);
        cluster_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_names_follow_infra_id() {
        let infra_id = InfraId::from_bytes([0xab; 8]);
        let instance = BrokerInstance::new(&infra_id, 3);
        assert_eq!(instance.cluster_id, "broker-abababababababab-3");
        assert_eq!(
            BrokerInstance::container_for(&instance.cluster_id),
            "broker-abababababababab-3-0"
        );
    }

    #[test]
    fn pool_never_reuses_ordinals() {
        let infra_id = InfraId::from_bytes([1; 8]);
        let mut pool = BrokerPool::default();
        let first = pool.provision(&infra_id);
        pool.brokers.clear();
        let second = pool.provision(&infra_id);
        assert_ne!(first, second);
        assert_eq!(pool.next_ordinal, 2);
    }

    #[test]
    fn status_default_is_pending() {
        let status = Status::default();
        assert_eq!(status.phase, Phase::Pending);
        assert!(!status.ready);
        assert!(status.broker_statuses.is_empty());
    }
}
