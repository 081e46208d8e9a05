//! Plan catalog.
//!
//! The catalog holds the address plans, address space plans and
//! infrastructure configurations every space worker reads. Readers take an
//! `Arc` to the current [`CatalogSnapshot`] and keep it for a whole pass; a
//! refresh validates a new document and swaps the whole snapshot, so nobody
//! ever observes a half-updated catalog.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use msgplane_store::{AddressPlan, AddressSpacePlan, AddressSpaceType, InfraConfig};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};

/// The document a catalog is loaded from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Per-address plans.
    #[serde(default)]
    pub address_plans: Vec<AddressPlan>,
    /// Per-space plans.
    #[serde(default)]
    pub address_space_plans: Vec<AddressSpacePlan>,
    /// Infrastructure configurations.
    #[serde(default)]
    pub infra_configs: Vec<InfraConfig>,
}

/// One validated, immutable version of the catalog.
#[derive(Debug)]
pub struct CatalogSnapshot {
    version: u64,
    document: CatalogDocument,
    address_plans: HashMap<String, AddressPlan>,
    space_plans: HashMap<String, AddressSpacePlan>,
    infra_configs: HashMap<String, InfraConfig>,
}

impl CatalogSnapshot {
    /// Validate a document and index it.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if names repeat, a space plan
    /// references an unknown infrastructure configuration or address plan,
    /// or a value is out of range.
    pub fn from_document(document: CatalogDocument, version: u64) -> Result<Self> {
        let mut address_plans = HashMap::new();
        for plan in &document.address_plans {
            if plan.resources.broker < 0.0 || plan.resources.router < 0.0 {
                return Err(ControlError::Catalog(format!(
                    "address plan {} has a negative cost",
                    plan.name
                )));
            }
            if plan.shard_factor == Some(0) {
                return Err(ControlError::Catalog(format!(
                    "address plan {} declares zero shards",
                    plan.name
                )));
            }
            if address_plans
                .insert(plan.name.clone(), plan.clone())
                .is_some()
            {
                return Err(duplicate("address plan", &plan.name));
            }
        }

        let mut infra_configs = HashMap::new();
        for config in &document.infra_configs {
            validate_infra_config(config)?;
            if infra_configs
                .insert(config.name.clone(), config.clone())
                .is_some()
            {
                return Err(duplicate("infra config", &config.name));
            }
        }

        let mut space_plans = HashMap::new();
        for plan in &document.address_space_plans {
            let Some(infra) = infra_configs.get(&plan.infra_config) else {
                return Err(ControlError::Catalog(format!(
                    "address space plan {} references unknown infra config {}",
                    plan.name, plan.infra_config
                )));
            };
            if plan.space_type == AddressSpaceType::Brokered && infra.router().is_some() {
                return Err(ControlError::Catalog(format!(
                    "brokered address space plan {} uses infra config {} with routers",
                    plan.name, plan.infra_config
                )));
            }
            if let Some(unknown) = plan
                .address_plans
                .iter()
                .find(|name| !address_plans.contains_key(*name))
            {
                return Err(ControlError::Catalog(format!(
                    "address space plan {} permits unknown address plan {unknown}",
                    plan.name
                )));
            }
            if space_plans
                .insert(plan.name.clone(), plan.clone())
                .is_some()
            {
                return Err(duplicate("address space plan", &plan.name));
            }
        }

        Ok(Self {
            version,
            document,
            address_plans,
            space_plans,
            infra_configs,
        })
    }

    /// Monotonic version, bumped on every content change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Look up an address plan.
    #[must_use]
    pub fn address_plan(&self, name: &str) -> Option<&AddressPlan> {
        self.address_plans.get(name)
    }

    /// Look up an address space plan.
    #[must_use]
    pub fn space_plan(&self, name: &str) -> Option<&AddressSpacePlan> {
        self.space_plans.get(name)
    }

    /// Look up an infrastructure configuration.
    #[must_use]
    pub fn infra_config(&self, name: &str) -> Option<&InfraConfig> {
        self.infra_configs.get(name)
    }

    /// Look up an address plan as permitted by a space plan.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownPlan` if the plan is absent or the space
    /// plan does not permit it.
    pub fn permitted_plan(&self, space_plan: &AddressSpacePlan, name: &str) -> Result<&AddressPlan> {
        if !space_plan.permits(name) {
            return Err(ControlError::UnknownPlan(name.to_string()));
        }
        self.address_plan(name)
            .ok_or_else(|| ControlError::UnknownPlan(name.to_string()))
    }

    /// The document this snapshot was built from.
    #[must_use]
    pub const fn document(&self) -> &CatalogDocument {
        &self.document
    }
}

fn duplicate(kind: &str, name: &str) -> ControlError {
    ControlError::Catalog(format!("duplicate {kind} {name}"))
}

fn validate_infra_config(config: &InfraConfig) -> Result<()> {
    let mut seen = Vec::new();
    for component in &config.components {
        if seen.contains(&component.kind()) {
            return Err(ControlError::Catalog(format!(
                "infra config {} repeats component {:?}",
                config.name,
                component.kind()
            )));
        }
        seen.push(component.kind());
    }
    if let Some(broker) = config.broker() {
        if broker.min_replicas > broker.max_replicas {
            return Err(ControlError::Catalog(format!(
                "infra config {} has broker min_replicas above max_replicas",
                config.name
            )));
        }
        if broker.capacity.is_some_and(|c| c <= 0.0) {
            return Err(ControlError::Catalog(format!(
                "infra config {} has a non-positive broker capacity",
                config.name
            )));
        }
    }
    if let Some(router) = config.router() {
        if router.min_replicas > router.max_replicas || router.link_capacity == 0 {
            return Err(ControlError::Catalog(format!(
                "infra config {} has invalid router bounds",
                config.name
            )));
        }
    }
    Ok(())
}

/// Process-wide plan catalog with publish-by-replace refresh.
#[derive(Debug)]
pub struct PlanCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl PlanCatalog {
    /// Create a catalog from a validated document.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if the document is invalid.
    pub fn new(document: CatalogDocument) -> Result<Self> {
        let snapshot = CatalogSnapshot::from_document(document, 1)?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// Create a catalog from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if the JSON or its content is invalid.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::new(parse(json)?)
    }

    /// Load a catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&read(path.as_ref())?)
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Replace the catalog content if it changed.
    ///
    /// Returns true if a new snapshot was published.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if the document is invalid; the
    /// current snapshot stays in place.
    pub fn replace(&self, document: CatalogDocument) -> Result<bool> {
        let current = self.snapshot();
        if current.document == document {
            return Ok(false);
        }
        let snapshot = CatalogSnapshot::from_document(document, current.version + 1)?;
        let version = snapshot.version;
        *self.current.write() = Arc::new(snapshot);
        tracing::info!(version, "Published plan catalog");
        Ok(true)
    }

    /// Re-read a JSON file and replace the catalog if its content changed.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Catalog` if the file cannot be read or is invalid.
    pub fn refresh_from_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.replace(parse(&read(path.as_ref())?)?)
    }
}

fn parse(json: &str) -> Result<CatalogDocument> {
    serde_json::from_str(json).map_err(|e| ControlError::Catalog(e.to_string()))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| ControlError::Catalog(format!("{}: {e}", path.display())))
}
