//! Request types and engine configuration.

use std::time::Duration;

use msgplane_store::{AddressSpaceType, AddressType};
use serde::{Deserialize, Serialize};

/// Request to create a new address space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAddressSpaceRequest {
    /// Tenant namespace.
    pub namespace: String,
    /// Space name, unique within the namespace.
    pub name: String,
    /// Space type.
    #[serde(rename = "type")]
    pub space_type: AddressSpaceType,
    /// Address space plan.
    pub plan: String,
}

impl CreateAddressSpaceRequest {
    /// Create a request for a standard space.
    #[must_use]
    pub fn standard(
        namespace: impl Into<String>,
        name: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            space_type: AddressSpaceType::Standard,
            plan: plan.into(),
        }
    }
}

/// Request to create a new address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAddressRequest {
    /// Resource name, unique within the space.
    pub name: String,
    /// Messaging address; defaults to the resource name.
    #[serde(default)]
    pub address: Option<String>,
    /// Address type.
    #[serde(rename = "type")]
    pub address_type: AddressType,
    /// Address plan.
    pub plan: String,
}

impl CreateAddressRequest {
    /// Create a request whose messaging address equals its name.
    #[must_use]
    pub fn new(name: impl Into<String>, address_type: AddressType, plan: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            address_type,
            plan: plan.into(),
        }
    }
}

/// Request to move an address space to another plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceSpacePlanRequest {
    /// The new address space plan.
    pub plan: String,
    /// The last version of the space the caller observed.
    pub expected_version: u64,
}

/// Request to move an address to another plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceAddressPlanRequest {
    /// The new address plan.
    pub plan: String,
}

/// Configuration for the reconciliation engine.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Broker share, relative to one broker's capacity, above which an address
    /// without a declared shard factor is sharded.
    pub shard_threshold: f64,
    /// Upper bound on computed shard counts.
    pub max_shard_factor: u32,
    /// Capacity units per broker when the broker spec leaves it unset.
    pub broker_capacity: f64,
    /// How long a broker may stay unready before it is drained (seconds).
    pub unhealthy_grace_seconds: u64,
    /// Drain completion budget per pass (seconds).
    pub drain_budget_seconds: u64,
    /// Successor readiness budget per pass (seconds).
    pub readiness_budget_seconds: u64,
    /// Interval between polls of drain and readiness checks (milliseconds).
    pub poll_interval_ms: u64,
    /// Diagnostic messages retained per address and pass.
    pub max_status_messages: usize,
    /// Periodic resync of every space (seconds).
    pub resync_interval_seconds: u64,
    /// Depth of each space's event queue.
    pub event_queue_depth: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            shard_threshold: 1.0,
            max_shard_factor: 4,
            broker_capacity: 1.0,
            unhealthy_grace_seconds: 300, // 5 minutes
            drain_budget_seconds: 30,
            readiness_budget_seconds: 10,
            poll_interval_ms: 500,
            max_status_messages: 10,
            resync_interval_seconds: 30,
            event_queue_depth: 64,
        }
    }
}

impl ControlConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            shard_threshold: env_or("SHARD_THRESHOLD", defaults.shard_threshold),
            max_shard_factor: env_or("MAX_SHARD_FACTOR", defaults.max_shard_factor),
            broker_capacity: env_or("BROKER_CAPACITY", defaults.broker_capacity),
            unhealthy_grace_seconds: env_or(
                "UNHEALTHY_GRACE_SECONDS",
                defaults.unhealthy_grace_seconds,
            ),
            drain_budget_seconds: env_or("DRAIN_BUDGET_SECONDS", defaults.drain_budget_seconds),
            readiness_budget_seconds: env_or(
                "READINESS_BUDGET_SECONDS",
                defaults.readiness_budget_seconds,
            ),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", defaults.poll_interval_ms),
            max_status_messages: env_or("MAX_STATUS_MESSAGES", defaults.max_status_messages),
            resync_interval_seconds: env_or(
                "RESYNC_INTERVAL_SECONDS",
                defaults.resync_interval_seconds,
            ),
            event_queue_depth: env_or("EVENT_QUEUE_DEPTH", defaults.event_queue_depth).max(1),
        }
    }

    /// Drain completion budget.
    #[must_use]
    pub const fn drain_budget(&self) -> Duration {
        Duration::from_secs(self.drain_budget_seconds)
    }

    /// Successor readiness budget.
    #[must_use]
    pub const fn readiness_budget(&self) -> Duration {
        Duration::from_secs(self.readiness_budget_seconds)
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resync interval.
    #[must_use]
    pub const fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    /// Grace period for unready brokers.
    #[must_use]
    pub fn unhealthy_grace(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.unhealthy_grace_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(seconds.min(i64::MAX / 1000))
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_address_request_new() {
        let req = CreateAddressRequest::new("orders", AddressType::Queue, "small-queue");
        assert_eq!(req.name, "orders");
        assert!(req.address.is_none());
        assert_eq!(req.plan, "small-queue");
    }

    #[test]
    fn create_address_request_from_json() {
        let req: CreateAddressRequest =
            serde_json::from_str(r#"{"name":"events","type":"topic","plan":"large-topic"}"#)
                .unwrap();
        assert_eq!(req.address_type, AddressType::Topic);
    }

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert!((config.shard_threshold - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.max_shard_factor, 4);
        assert_eq!(config.unhealthy_grace_seconds, 300);
        assert_eq!(config.drain_budget(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.max_status_messages, 10);
    }

    #[test]
    fn unhealthy_grace_as_chrono() {
        let config = ControlConfig {
            unhealthy_grace_seconds: 90,
            ..Default::default()
        };
        assert_eq!(config.unhealthy_grace(), chrono::Duration::seconds(90));
    }
}
