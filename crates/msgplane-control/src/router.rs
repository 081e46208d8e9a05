//! Router mesh sizing.

use msgplane_store::RouterSpec;

use crate::slot::AddressSlot;

/// Total links expected by the live addresses of a space.
///
/// Addresses whose plan is unknown contribute nothing.
pub fn aggregate_link_load<'a>(slots: impl IntoIterator<Item = &'a AddressSlot>) -> u64 {
    slots
        .into_iter()
        .filter(|s| s.is_live())
        .filter_map(|s| s.plan.as_ref())
        .map(|p| p.links.total())
        .sum()
}

/// Router replicas needed to carry `links`.
///
/// The result is clamped to the router replica bounds. A configuration without
/// routers needs none.
#[must_use]
pub fn target_replicas(links: u64, spec: Option<&RouterSpec>) -> u32 {
    let Some(spec) = spec else {
        return 0;
    };
    let capacity = u64::from(spec.link_capacity.max(1));
    let needed = u32::try_from(links.div_ceil(capacity)).unwrap_or(u32::MAX);
    let max = spec.max_replicas.max(spec.min_replicas);
    needed.clamp(spec.min_replicas, max)
}
