//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Address space records, keyed by `space_id`.
    pub const ADDRESS_SPACES: &str = "address_spaces";

    /// Address records with their status, keyed by `space_id || name`.
    pub const ADDRESSES: &str = "addresses";

    /// Broker pool per space, keyed by `space_id`.
    pub const BROKER_POOLS: &str = "broker_pools";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ADDRESS_SPACES, cf::ADDRESSES, cf::BROKER_POOLS]
}
