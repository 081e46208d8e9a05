//! Types for the infrastructure crate.

use msgplane_core::{AddressSpaceId, InfraId};
use serde::{Deserialize, Serialize};

/// The address space that owns a set of infrastructure objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfraOwner {
    /// Owning space.
    pub space_id: AddressSpaceId,
    /// Identifier stamped on every object of the space.
    pub infra_id: InfraId,
}

impl InfraOwner {
    /// Create an owner.
    #[must_use]
    pub const fn new(space_id: AddressSpaceId, infra_id: InfraId) -> Self {
        Self { space_id, infra_id }
    }
}

/// Drain statistics reported by a broker for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DrainStats {
    /// Deliverable messages still held.
    pub in_flight: u64,
    /// Connected consumers.
    pub consumers: u32,
}

impl DrainStats {
    /// Returns true if nothing is held and nobody is attached.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.in_flight == 0 && self.consumers == 0
    }
}

/// Observed replica readiness of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    /// Replicas requested by the workload spec.
    pub desired: u32,
    /// Replicas reporting ready.
    pub ready: u32,
}

impl Readiness {
    /// Returns true if every desired replica is ready.
    ///
    /// A workload scaled to zero is trivially ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready >= self.desired
    }
}

/// A change observed on an infrastructure object of a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraEvent {
    /// Space the object belongs to.
    pub space_id: AddressSpaceId,
    /// Name of the changed object.
    pub object: String,
}

/// Configuration for the Kubernetes infrastructure layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraSettings {
    /// Kubernetes namespace for messaging infrastructure.
    pub namespace: String,
    /// Container image for brokers.
    pub broker_image: String,
    /// Container image for routers.
    pub router_image: String,
    /// Container image for the admin console.
    pub admin_image: String,
    /// Broker management port serving drain statistics.
    pub broker_management_port: u16,
    /// Field manager name used for server-side apply.
    pub field_manager: String,
    /// Timeout for drain statistics requests, in seconds.
    pub http_timeout_seconds: u64,
}

impl Default for InfraSettings {
    fn default() -> Self {
        Self {
            namespace: "msgplane-infra".to_string(),
            broker_image: "quay.io/msgplane/broker:latest".to_string(),
            router_image: "quay.io/msgplane/router:latest".to_string(),
            admin_image: "quay.io/msgplane/admin:latest".to_string(),
            broker_management_port: 8161,
            field_manager: "msgplane-control".to_string(),
            http_timeout_seconds: 5,
        }
    }
}

impl InfraSettings {
    /// Create settings with the given namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `INFRA_NAMESPACE`: Kubernetes namespace for messaging infrastructure
    /// - `BROKER_IMAGE`, `ROUTER_IMAGE`, `ADMIN_IMAGE`: container images
    /// - `BROKER_MANAGEMENT_PORT`: port serving drain statistics
    /// - `INFRA_HTTP_TIMEOUT_SECONDS`: drain statistics request timeout
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("INFRA_NAMESPACE") {
            config.namespace = val;
        }
        if let Ok(val) = std::env::var("BROKER_IMAGE") {
            config.broker_image = val;
        }
        if let Ok(val) = std::env::var("ROUTER_IMAGE") {
            config.router_image = val;
        }
        if let Ok(val) = std::env::var("ADMIN_IMAGE") {
            config.admin_image = val;
        }
        if let Ok(val) = std::env::var("BROKER_MANAGEMENT_PORT") {
            if let Ok(n) = val.parse() {
                config.broker_management_port = n;
            }
        }
        if let Ok(val) = std::env::var("INFRA_HTTP_TIMEOUT_SECONDS") {
            if let Ok(n) = val.parse() {
                config.http_timeout_seconds = n;
            }
        }

        config
    }
}
