//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store` trait.

use std::path::Path;
use std::sync::Arc;

use msgplane_core::AddressSpaceId;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Address, AddressSpace, BrokerPool};
use crate::{PassCommit, Store};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-modify-write sequences on address records.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Collect the keys of all addresses of a space.
    fn address_keys(&self, space_id: &AddressSpaceId) -> Result<Vec<Box<[u8]>>> {
        let cf_addresses = self.cf(cf::ADDRESSES)?;
        let prefix = keys::space_prefix(space_id);

        let mut found = Vec::new();
        let iter = self.db.iterator_cf(
            &cf_addresses,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            // Stop if we're past the prefix
            if !key.starts_with(&prefix) {
                break;
            }
            found.push(key);
        }

        Ok(found)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Address Space Operations
    // =========================================================================

    fn put_space(&self, space: &AddressSpace) -> Result<()> {
        let cf = self.cf(cf::ADDRESS_SPACES)?;
        let key = keys::space_key(&space.space_id);
        let value = Self::serialize(space)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_space(&self, space_id: &AddressSpaceId) -> Result<Option<AddressSpace>> {
        let cf = self.cf(cf::ADDRESS_SPACES)?;
        let key = keys::space_key(space_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_spaces(&self) -> Result<Vec<AddressSpace>> {
        let cf = self.cf(cf::ADDRESS_SPACES)?;

        let mut spaces = Vec::new();
        let iter = self.db.iterator_cf(&cf, IteratorMode::Start);

        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            spaces.push(Self::deserialize(&value)?);
        }

        Ok(spaces)
    }

    fn delete_space(&self, space_id: &AddressSpaceId) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_spaces = self.cf(cf::ADDRESS_SPACES)?;
        let cf_addresses = self.cf(cf::ADDRESSES)?;
        let cf_pools = self.cf(cf::BROKER_POOLS)?;

        if self.get_space(space_id)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_spaces, keys::space_key(space_id));
        batch.delete_cf(&cf_pools, keys::pool_key(space_id));
        for key in self.address_keys(space_id)? {
            batch.delete_cf(&cf_addresses, key);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    // =========================================================================
    // Address Operations
    // =========================================================================

    fn put_address(&self, address: &Address) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(cf::ADDRESSES)?;
        let key = keys::address_key(&address.space_id, &address.name);
        let value = Self::serialize(address)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn get_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<Option<Address>> {
        let cf = self.cf(cf::ADDRESSES)?;
        let key = keys::address_key(space_id, name);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn list_addresses(&self, space_id: &AddressSpaceId) -> Result<Vec<Address>> {
        let cf = self.cf(cf::ADDRESSES)?;
        let prefix = keys::space_prefix(space_id);

        let mut addresses = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward));

        for item in iter {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            if !key.starts_with(&prefix) {
                break;
            }

            addresses.push(Self::deserialize(&value)?);
        }

        Ok(addresses)
    }

    fn delete_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf = self.cf(cf::ADDRESSES)?;
        let key = keys::address_key(space_id, name);

        if self
            .db
            .get_cf(&cf, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_none()
        {
            return Err(StoreError::NotFound);
        }

        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    // =========================================================================
    // Broker Pool Operations
    // =========================================================================

    fn get_pool(&self, space_id: &AddressSpaceId) -> Result<Option<BrokerPool>> {
        let cf = self.cf(cf::BROKER_POOLS)?;
        let key = keys::pool_key(space_id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn commit_pass(&self, commit: &PassCommit) -> Result<()> {
        let _guard = self.write_lock.lock();
        let cf_addresses = self.cf(cf::ADDRESSES)?;
        let cf_pools = self.cf(cf::BROKER_POOLS)?;

        if self.get_space(&commit.space_id)?.is_none() {
            return Err(StoreError::NotFound);
        }

        let now = chrono::Utc::now();
        let mut batch = WriteBatch::default();
        let mut written = 0usize;

        for update in &commit.updates {
            // Merge into the current record; admission may have changed it mid-pass.
            let Some(mut current) = self.get_address(&commit.space_id, &update.name)? else {
                continue;
            };
            current.status = update.status.clone();
            current.applied_plan.clone_from(&update.applied_plan);
            current.updated_at = now;

            let key = keys::address_key(&commit.space_id, &update.name);
            batch.put_cf(&cf_addresses, key, Self::serialize(&current)?);
            written += 1;
        }

        let mut removed = 0usize;
        for name in &commit.removed {
            match self.get_address(&commit.space_id, name)? {
                Some(current) if current.terminating => {
                    batch.delete_cf(&cf_addresses, keys::address_key(&commit.space_id, name));
                    removed += 1;
                }
                _ => {}
            }
        }

        batch.put_cf(
            &cf_pools,
            keys::pool_key(&commit.space_id),
            Self::serialize(&commit.pool)?,
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(
            space_id = %commit.space_id,
            written,
            removed,
            brokers = commit.pool.brokers.len(),
            "Committed reconciliation pass"
        );

        Ok(())
    }
}
