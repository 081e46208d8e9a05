//! `RocksDB` storage layer for msgplane.
//!
//! This crate provides persistent storage for address spaces, addresses and
//! broker pools using `RocksDB` with column families.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `address_spaces`: Address space records, keyed by `space_id`
//! - `addresses`: Address records and their status, keyed by `space_id || name`
//! - `broker_pools`: Broker pool and router size per space, keyed by `space_id`
//!
//! Admission writes (new addresses, deletion marks, plan changes) and the
//! reconciliation pass write the same address records. The pass only owns the
//! `status` and `applied_plan` fields; [`Store::commit_pass`] merges those into
//! the current records instead of overwriting them.
//!
//! # Example
//!
//! ```no_run
//! use msgplane_store::{RocksStore, Store};
//! use msgplane_core::AddressSpaceId;
//!
//! let store = RocksStore::open("/tmp/msgplane-db").unwrap();
//!
//! let space_id = AddressSpaceId::from_bytes([0u8; 16]);
//! let addresses = store.list_addresses(&space_id).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod plans;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use plans::{
    AddressPlan, AddressSpacePlan, AdminSpec, BrokerSpec, ComponentKind, ComponentSpec,
    InfraConfig, LinkEstimate, PlanResources, ResourceRequirement, RouterSpec,
};
pub use rocks::RocksStore;
pub use types::{
    Address, AddressSpace, AddressSpaceType, AddressType, BrokerInstance, BrokerPool,
    BrokerState, BrokerStatus, Endpoint, Phase, Status,
};

use msgplane_core::AddressSpaceId;

/// The pass-owned fields of one address.
#[derive(Debug, Clone)]
pub struct AddressUpdate {
    /// Address name.
    pub name: String,
    /// Freshly aggregated status.
    pub status: Status,
    /// Plan the placement was computed for.
    pub applied_plan: Option<String>,
}

/// Everything one reconciliation pass publishes for a space.
#[derive(Debug, Clone)]
pub struct PassCommit {
    /// The space.
    pub space_id: AddressSpaceId,
    /// Status updates for live and draining addresses.
    pub updates: Vec<AddressUpdate>,
    /// Terminating addresses whose drain finished.
    pub removed: Vec<String>,
    /// The broker pool after the pass.
    pub pool: BrokerPool,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different implementations
/// (e.g., `RocksDB`, in-memory for testing).
pub trait Store: Send + Sync {
    // =========================================================================
    // Address Space Operations
    // =========================================================================

    /// Insert or update an address space record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_space(&self, space: &AddressSpace) -> Result<()>;

    /// Get an address space by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_space(&self, space_id: &AddressSpaceId) -> Result<Option<AddressSpace>>;

    /// List all address spaces.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_spaces(&self) -> Result<Vec<AddressSpace>>;

    /// Delete an address space together with its addresses and broker pool.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the space doesn't exist.
    fn delete_space(&self, space_id: &AddressSpaceId) -> Result<()>;

    // =========================================================================
    // Address Operations
    // =========================================================================

    /// Insert or update an address record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_address(&self, address: &Address) -> Result<()>;

    /// Get an address by space and name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<Option<Address>>;

    /// List all addresses of a space, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_addresses(&self, space_id: &AddressSpaceId) -> Result<Vec<Address>>;

    /// Delete an address record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the address doesn't exist.
    fn delete_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<()>;

    // =========================================================================
    // Broker Pool Operations
    // =========================================================================

    /// Get the broker pool of a space.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_pool(&self, space_id: &AddressSpaceId) -> Result<Option<BrokerPool>>;

    /// Publish the result of a reconciliation pass in one atomic write.
    ///
    /// Updates for addresses that no longer exist are skipped. Removals only
    /// apply to addresses still marked terminating.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the space doesn't exist.
    fn commit_pass(&self, commit: &PassCommit) -> Result<()>;
}
