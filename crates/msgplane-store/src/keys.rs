//! Key encoding utilities for `RocksDB`.
//!
//! Address keys are `space_id || name` so all addresses of a space can be
//! listed with a prefix scan.

use msgplane_core::AddressSpaceId;

/// Encode an address space key (just the space ID bytes).
#[must_use]
pub fn space_key(space_id: &AddressSpaceId) -> Vec<u8> {
    space_id.as_bytes().to_vec()
}

/// Encode a broker pool key. Pools are keyed like their space.
#[must_use]
pub fn pool_key(space_id: &AddressSpaceId) -> Vec<u8> {
    space_key(space_id)
}

/// Encode an address key: `space_id || name`.
#[must_use]
pub fn address_key(space_id: &AddressSpaceId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + name.len());
    key.extend_from_slice(space_id.as_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

/// Encode a space prefix for scanning all addresses of a space.
#[must_use]
pub fn space_prefix(space_id: &AddressSpaceId) -> Vec<u8> {
    space_id.as_bytes().to_vec()
}
