//! Resource accounting.
//!
//! Pure functions that price addresses against their plans and compare the
//! result with a space's quota. Nothing here touches the store.

use msgplane_core::{Dimension, ResourceCost};
use msgplane_store::{Address, AddressSpacePlan};
use serde::Serialize;

use crate::catalog::CatalogSnapshot;
use crate::error::{ControlError, Result};

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuotaDecision {
    /// The candidate fits.
    Allow,
    /// The candidate does not fit on `dimension`.
    Reject {
        /// First violated dimension.
        dimension: Dimension,
        /// Quota left on that dimension.
        available: f64,
        /// Cost requested on that dimension.
        requested: f64,
    },
}

impl QuotaDecision {
    /// Convert into an admission result.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::QuotaExceeded` for a rejection.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allow => Ok(()),
            Self::Reject {
                dimension,
                available,
                requested,
            } => Err(ControlError::QuotaExceeded {
                dimension,
                available,
                requested,
            }),
        }
    }
}

/// Consumed and remaining quota of a space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QuotaUsage {
    /// Sum of the costs of live addresses.
    pub consumed: ResourceCost,
    /// Quota left.
    pub available: ResourceCost,
}

/// Price one address on its plan.
///
/// # Errors
///
/// Returns `ControlError::UnknownPlan` if the plan is absent.
pub fn cost(catalog: &CatalogSnapshot, plan: &str) -> Result<ResourceCost> {
    catalog
        .address_plan(plan)
        .map(msgplane_store::AddressPlan::cost)
        .ok_or_else(|| ControlError::UnknownPlan(plan.to_string()))
}

/// Check whether `candidate` fits in `quota` on top of `consumed`.
///
/// Dimensions are checked in broker, router, aggregate order and the first
/// violation is reported.
#[must_use]
pub fn check_quota(
    quota: &ResourceCost,
    consumed: &ResourceCost,
    candidate: &ResourceCost,
) -> QuotaDecision {
    let total = *consumed + *candidate;
    match total.first_exceeding(quota) {
        None => QuotaDecision::Allow,
        Some(dimension) => QuotaDecision::Reject {
            dimension,
            available: (quota.get(dimension) - consumed.get(dimension)).max(0.0),
            requested: candidate.get(dimension),
        },
    }
}

/// Sum the costs of the live addresses in `addresses`.
///
/// Addresses whose plan is no longer in the catalog hold no claim.
pub fn consumed<'a>(
    catalog: &CatalogSnapshot,
    addresses: impl IntoIterator<Item = &'a Address>,
) -> ResourceCost {
    addresses
        .into_iter()
        .filter(|a| a.is_live())
        .filter_map(|a| cost(catalog, &a.plan).ok())
        .sum()
}

/// Consumed and available quota of a space.
pub fn usage<'a>(
    catalog: &CatalogSnapshot,
    plan: &AddressSpacePlan,
    addresses: impl IntoIterator<Item = &'a Address>,
) -> QuotaUsage {
    let consumed = consumed(catalog, addresses);
    QuotaUsage {
        consumed,
        available: plan.quota - consumed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogDocument, PlanCatalog};
    use chrono::Utc;
    use msgplane_core::AddressSpaceId;
    use msgplane_store::{AddressPlan, AddressSpaceType, AddressType, PlanResources, Status};

    fn plan(name: &str, broker: f64, router: f64) -> AddressPlan {
        AddressPlan {
            name: name.to_string(),
            address_type: AddressType::Queue,
            resources: PlanResources { broker, router },
            shard_factor: None,
            links: msgplane_store::LinkEstimate::default(),
        }
    }

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(CatalogDocument {
            address_plans: vec![plan("medium", 0.6, 0.1), plan("small", 0.2, 0.1)],
            address_space_plans: vec![AddressSpacePlan {
                name: "space".to_string(),
                space_type: AddressSpaceType::Standard,
                infra_config: "infra".to_string(),
                quota: ResourceCost::new(1.0, 1.0, 2.0),
                address_plans: vec!["medium".to_string(), "small".to_string()],
            }],
            infra_configs: vec![msgplane_store::InfraConfig {
                name: "infra".to_string(),
                components: vec![],
            }],
        })
        .unwrap()
    }

    fn address(name: &str, plan: &str, terminating: bool) -> Address {
        let now = Utc::now();
        Address {
            space_id: AddressSpaceId::from_bytes([3u8; 16]),
            name: name.to_string(),
            address: name.to_string(),
            address_type: AddressType::Queue,
            plan: plan.to_string(),
            applied_plan: None,
            terminating,
            status: Status::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cost_of_unknown_plan() {
        let catalog = catalog();
        let snapshot = catalog.snapshot();

        assert!(matches!(
            cost(&snapshot, "ghost"),
            Err(ControlError::UnknownPlan(name)) if name == "ghost"
        ));
        let small = cost(&snapshot, "small").unwrap();
        assert!((small.aggregate - 0.3).abs() < 1e-9);
    }

    #[test]
    fn check_quota_reports_first_dimension() {
        let quota = ResourceCost::new(1.0, 0.1, 2.0);
        let consumed = ResourceCost::for_address(0.6, 0.1);
        let candidate = ResourceCost::for_address(0.6, 0.1);

        // Broker and router both overflow; broker is reported.
        match check_quota(&quota, &consumed, &candidate) {
            QuotaDecision::Reject {
                dimension,
                available,
                requested,
            } => {
                assert_eq!(dimension, Dimension::Broker);
                assert!((available - 0.4).abs() < 1e-9);
                assert!((requested - 0.6).abs() < 1e-9);
            }
            QuotaDecision::Allow => panic!("expected rejection"),
        }
    }

    #[test]
    fn check_quota_allows_exact_fit() {
        let quota = ResourceCost::new(1.0, 1.0, 2.0);
        let consumed = ResourceCost::for_address(0.4, 0.0);
        let candidate = ResourceCost::for_address(0.6, 0.0);

        assert_eq!(check_quota(&quota, &consumed, &candidate), QuotaDecision::Allow);
        assert!(check_quota(&quota, &consumed, &candidate).into_result().is_ok());
    }

    #[test]
    fn check_quota_aggregate_only() {
        let quota = ResourceCost::new(1.0, 1.0, 1.0);
        let consumed = ResourceCost::for_address(0.5, 0.4);
        let candidate = ResourceCost::for_address(0.1, 0.1);

        assert!(matches!(
            check_quota(&quota, &consumed, &candidate).into_result(),
            Err(ControlError::QuotaExceeded {
                dimension: Dimension::Aggregate,
                ..
            })
        ));
    }

    #[test]
    fn consumed_ignores_terminating_addresses() {
        let catalog = catalog();
        let snapshot = catalog.snapshot();
        let addresses = vec![
            address("a", "medium", false),
            address("b", "small", true),
            address("c", "ghost", false),
        ];

        let total = consumed(&snapshot, &addresses);
        assert!((total.broker - 0.6).abs() < 1e-9);

        let space_plan = snapshot.space_plan("space").unwrap();
        let usage = usage(&snapshot, space_plan, &addresses);
        assert!((usage.available.broker - 0.4).abs() < 1e-9);
        assert!((usage.available.aggregate - 1.3).abs() < 1e-9);
    }
}
