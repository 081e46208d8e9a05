//! Plan and infrastructure configuration types.
//!
//! Plans are immutable values: a plan is built once, fully populated, and
//! referenced by name from addresses and address spaces. A changed plan is a
//! new catalog snapshot, never an in-place edit.

use msgplane_core::ResourceCost;
use serde::{Deserialize, Serialize};

use crate::types::{AddressSpaceType, AddressType};

/// Estimated router link usage of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEstimate {
    /// Expected client connections.
    pub connections: u32,
    /// Links (senders plus receivers) per connection.
    pub links_per_connection: u32,
}

impl Default for LinkEstimate {
    fn default() -> Self {
        Self {
            connections: 1,
            links_per_connection: 2,
        }
    }
}

impl LinkEstimate {
    /// Total links this address is expected to hold open.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.connections as u64 * self.links_per_connection as u64
    }
}

/// Per-address resource shares declared by an address plan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanResources {
    /// Share of one broker.
    #[serde(default)]
    pub broker: f64,
    /// Share of one router.
    #[serde(default)]
    pub router: f64,
}

/// A named per-address cost definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressPlan {
    /// Plan name.
    pub name: String,
    /// Address type this plan applies to.
    pub address_type: AddressType,
    /// Resource shares.
    pub resources: PlanResources,
    /// Explicit number of shards; absent means the cost threshold decides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_factor: Option<u32>,
    /// Router link estimate.
    #[serde(default)]
    pub links: LinkEstimate,
}

impl AddressPlan {
    /// The cost vector of one address on this plan.
    #[must_use]
    pub fn cost(&self) -> ResourceCost {
        ResourceCost::for_address(self.resources.broker, self.resources.router)
    }

    /// Returns true if addresses on this plan live on brokers.
    #[must_use]
    pub fn needs_broker(&self) -> bool {
        self.resources.broker > msgplane_core::COST_EPSILON
    }
}

/// A named aggregate quota and the address plans it permits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressSpacePlan {
    /// Plan name.
    pub name: String,
    /// Space type this plan applies to.
    pub space_type: AddressSpaceType,
    /// Name of the infrastructure configuration.
    pub infra_config: String,
    /// Aggregate quota.
    pub quota: ResourceCost,
    /// Names of permitted address plans.
    pub address_plans: Vec<String>,
}

impl AddressSpacePlan {
    /// Returns true if the named address plan may be used in this space.
    #[must_use]
    pub fn permits(&self, address_plan: &str) -> bool {
        self.address_plans.iter().any(|p| p == address_plan)
    }
}

/// A single Kubernetes resource requirement, such as `memory=512Mi`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    /// Resource name (`memory`, `storage`, `cpu`).
    pub name: String,
    /// Quantity in Kubernetes notation.
    pub value: String,
}

impl ResourceRequirement {
    /// Create a requirement.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

fn default_one() -> u32 {
    1
}

fn default_link_capacity() -> u32 {
    250
}

/// Sizing of broker pods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSpec {
    /// Requests and limits (`memory`, `storage`).
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
    /// Lower replica bound.
    #[serde(default = "default_one")]
    pub min_replicas: u32,
    /// Upper replica bound.
    #[serde(default = "default_one")]
    pub max_replicas: u32,
    /// Capacity units one broker offers to placement; unset uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    /// Apply storage changes to existing volume claims.
    #[serde(default)]
    pub update_persistent_volume_claim: bool,
    /// Broker behaviour when an address is full.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_full_policy: Option<String>,
    /// Storage class for broker volumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

/// Sizing of the router mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterSpec {
    /// Requests and limits.
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
    /// Links one router carries.
    #[serde(default = "default_link_capacity")]
    pub link_capacity: u32,
    /// Lower replica bound.
    #[serde(default = "default_one")]
    pub min_replicas: u32,
    /// Upper replica bound.
    #[serde(default = "default_one")]
    pub max_replicas: u32,
}

/// Sizing of the admin pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSpec {
    /// Requests and limits.
    #[serde(default)]
    pub resources: Vec<ResourceRequirement>,
}

/// The kind of an infrastructure component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Broker pods.
    Broker,
    /// Router pods.
    Router,
    /// Admin pod.
    Admin,
}

/// One component of an infrastructure configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComponentSpec {
    /// Broker sizing.
    Broker(BrokerSpec),
    /// Router sizing.
    Router(RouterSpec),
    /// Admin sizing.
    Admin(AdminSpec),
}

impl ComponentSpec {
    /// The component kind.
    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        match self {
            Self::Broker(_) => ComponentKind::Broker,
            Self::Router(_) => ComponentKind::Router,
            Self::Admin(_) => ComponentKind::Admin,
        }
    }

    /// Resource requirements of the component.
    #[must_use]
    pub fn resources(&self) -> &[ResourceRequirement] {
        match self {
            Self::Broker(spec) => &spec.resources,
            Self::Router(spec) => &spec.resources,
            Self::Admin(spec) => &spec.resources,
        }
    }
}

/// Per-component sizing for an address space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Configuration name.
    pub name: String,
    /// Components, at most one per kind.
    pub components: Vec<ComponentSpec>,
}

impl InfraConfig {
    /// Look up a component by kind.
    #[must_use]
    pub fn component(&self, kind: ComponentKind) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    /// Broker sizing, if the configuration has brokers.
    #[must_use]
    pub fn broker(&self) -> Option<&BrokerSpec> {
        match self.component(ComponentKind::Broker) {
            Some(ComponentSpec::Broker(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Router sizing, if the configuration has routers.
    #[must_use]
    pub fn router(&self) -> Option<&RouterSpec> {
        match self.component(ComponentKind::Router) {
            Some(ComponentSpec::Router(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Admin sizing, if the configuration has an admin pod.
    #[must_use]
    pub fn admin(&self) -> Option<&AdminSpec> {
        match self.component(ComponentKind::Admin) {
            Some(ComponentSpec::Admin(spec)) => Some(spec),
            _ => None,
        }
    }
}
