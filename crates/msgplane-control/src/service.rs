//! Control plane service implementation.
//!
//! This module provides the `ControlPlane` trait and `ControlPlaneService`,
//! the admission side of the engine. Admission validates mutations against
//! the plan catalog and the space quota, persists them, and asks for a
//! reconciliation pass. It never touches placement or status; those belong
//! to the pass.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use msgplane_core::{AddressSpaceId, InfraId, ResourceCost};
use msgplane_infra::objects::space_endpoints;
use msgplane_store::{Address, AddressPlan, AddressSpace, AddressSpacePlan, Status, Store};
use parking_lot::Mutex;

use crate::accountant;
use crate::catalog::{CatalogSnapshot, PlanCatalog};
use crate::error::{ControlError, Result};
use crate::status::{AddressStatus, SpaceStatus, StatusBoard};
use crate::types::{
    CreateAddressRequest, CreateAddressSpaceRequest, ReplaceAddressPlanRequest,
    ReplaceSpacePlanRequest,
};
use crate::worker::{NoopTrigger, ReconcileTrigger, Trigger};

/// Trait defining the control plane operations.
///
/// Mutating operations are admitted or rejected synchronously; the effect
/// on brokers and routers follows in a later reconciliation pass.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Address Space Operations
    // =========================================================================

    /// Create a new address space.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownPlan` if the plan is not in the catalog.
    /// Returns `ControlError::SpaceExists` if the namespace already has a
    /// space with that name.
    async fn create_address_space(&self, request: CreateAddressSpaceRequest)
        -> Result<AddressSpace>;

    /// Get an address space by ID.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::SpaceNotFound` if the space doesn't exist.
    async fn get_address_space(&self, space_id: &AddressSpaceId) -> Result<AddressSpace>;

    /// List all address spaces.
    async fn list_address_spaces(&self) -> Result<Vec<AddressSpace>>;

    /// Move an address space to another plan.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Conflict` if `expected_version` is stale.
    /// Returns `ControlError::UnknownPlan` if the plan is unknown or does not
    /// permit a plan in use. Returns `ControlError::QuotaExceeded` if the
    /// live addresses do not fit the new quota.
    async fn replace_address_space_plan(
        &self,
        space_id: &AddressSpaceId,
        request: ReplaceSpacePlanRequest,
    ) -> Result<AddressSpace>;

    /// Request deletion of an address space.
    ///
    /// The space is drained and removed by later passes.
    async fn delete_address_space(&self, space_id: &AddressSpaceId) -> Result<()>;

    // =========================================================================
    // Address Operations
    // =========================================================================

    /// Admit a new address.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownPlan` if the plan is absent or not
    /// permitted by the space plan. Returns `ControlError::QuotaExceeded` if
    /// the address does not fit the remaining quota.
    async fn create_address(
        &self,
        space_id: &AddressSpaceId,
        request: CreateAddressRequest,
    ) -> Result<Address>;

    /// Get an address record.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::AddressNotFound` if the address doesn't exist.
    async fn get_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<Address>;

    /// List the addresses of a space.
    async fn list_addresses(&self, space_id: &AddressSpaceId) -> Result<Vec<Address>>;

    /// Move an address to another plan.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::UnknownPlan` or `ControlError::QuotaExceeded`
    /// under the same rules as creation.
    async fn replace_address_plan(
        &self,
        space_id: &AddressSpaceId,
        name: &str,
        request: ReplaceAddressPlanRequest,
    ) -> Result<Address>;

    /// Mark an address Terminating.
    ///
    /// The record is removed once its brokers have drained it. Deleting an
    /// address twice is not an error.
    async fn delete_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<()>;

    // =========================================================================
    // Status
    // =========================================================================

    /// The last committed status of an address.
    async fn get_address_status(&self, space_id: &AddressSpaceId, name: &str)
        -> Result<AddressStatus>;

    /// The last committed status of a space.
    async fn get_space_status(&self, space_id: &AddressSpaceId) -> Result<SpaceStatus>;
}

/// The main control plane service implementation.
pub struct ControlPlaneService<S: Store> {
    store: Arc<S>,
    catalog: Arc<PlanCatalog>,
    board: Arc<StatusBoard>,
    trigger: Arc<dyn ReconcileTrigger>,
    /// Serializes quota check-then-write sequences.
    admission: Mutex<()>,
}

impl<S: Store> ControlPlaneService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        catalog: Arc<PlanCatalog>,
        board: Arc<StatusBoard>,
        trigger: Arc<dyn ReconcileTrigger>,
    ) -> Self {
        Self {
            store,
            catalog,
            board,
            trigger,
            admission: Mutex::new(()),
        }
    }

    /// Create a service without a status board or reconciliation.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, catalog: Arc<PlanCatalog>) -> Self {
        Self::new(
            store,
            catalog,
            Arc::new(StatusBoard::new()),
            Arc::new(NoopTrigger),
        )
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get a reference to the plan catalog.
    #[must_use]
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    fn get_space(&self, space_id: &AddressSpaceId) -> Result<AddressSpace> {
        self.store
            .get_space(space_id)?
            .ok_or(ControlError::SpaceNotFound(*space_id))
    }

    /// Get a space that still accepts changes.
    fn get_open_space(&self, space_id: &AddressSpaceId) -> Result<AddressSpace> {
        let space = self.get_space(space_id)?;
        if space.deleting {
            return Err(ControlError::SpaceDeleting(*space_id));
        }
        Ok(space)
    }

    fn get_address_record(&self, space_id: &AddressSpaceId, name: &str) -> Result<Address> {
        self.store
            .get_address(space_id, name)?
            .ok_or_else(|| ControlError::AddressNotFound {
                space_id: *space_id,
                name: name.to_string(),
            })
    }

    fn space_plan<'a>(snapshot: &'a CatalogSnapshot, space: &AddressSpace) -> Result<&'a AddressSpacePlan> {
        snapshot
            .space_plan(&space.plan)
            .ok_or_else(|| ControlError::UnknownPlan(space.plan.clone()))
    }

    /// Resolve an address plan for a space and check it matches the type.
    fn resolve_plan<'a>(
        snapshot: &'a CatalogSnapshot,
        space_plan: &AddressSpacePlan,
        plan: &str,
        address_type: msgplane_store::AddressType,
    ) -> Result<&'a AddressPlan> {
        let plan = snapshot.permitted_plan(space_plan, plan)?;
        if plan.address_type != address_type {
            return Err(ControlError::InvalidRequest(format!(
                "plan {} is for {:?} addresses, not {address_type:?}",
                plan.name, plan.address_type
            )));
        }
        Ok(plan)
    }

    fn admit_address(&self, space_id: &AddressSpaceId, request: CreateAddressRequest) -> Result<Address> {
        if request.name.is_empty() {
            return Err(ControlError::InvalidRequest("address name is empty".to_string()));
        }
        let snapshot = self.catalog.snapshot();

        let _admission = self.admission.lock();
        let space = self.get_open_space(space_id)?;
        if self.store.get_address(space_id, &request.name)?.is_some() {
            return Err(ControlError::AddressExists {
                space_id: *space_id,
                name: request.name,
            });
        }
        let space_plan = Self::space_plan(&snapshot, &space)?;
        let plan = Self::resolve_plan(&snapshot, space_plan, &request.plan, request.address_type)?;

        let addresses = self.store.list_addresses(space_id)?;
        let consumed = accountant::consumed(&snapshot, &addresses);
        let cost = accountant::cost(&snapshot, &plan.name)?;
        accountant::check_quota(&space_plan.quota, &consumed, &cost).into_result()?;

        let now = Utc::now();
        let address = Address {
            space_id: *space_id,
            address: request.address.unwrap_or_else(|| request.name.clone()),
            name: request.name,
            address_type: request.address_type,
            plan: plan.name.clone(),
            applied_plan: None,
            terminating: false,
            status: Status::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.put_address(&address)?;
        Ok(address)
    }

    fn admit_address_plan(
        &self,
        space_id: &AddressSpaceId,
        name: &str,
        request: ReplaceAddressPlanRequest,
    ) -> Result<Address> {
        let snapshot = self.catalog.snapshot();

        let _admission = self.admission.lock();
        let space = self.get_open_space(space_id)?;
        let mut address = self.get_address_record(space_id, name)?;
        if address.terminating {
            return Err(ControlError::InvalidRequest(format!("address {name} is terminating")));
        }
        if address.plan == request.plan {
            return Ok(address);
        }
        let space_plan = Self::space_plan(&snapshot, &space)?;
        let plan = Self::resolve_plan(&snapshot, space_plan, &request.plan, address.address_type)?;

        let others: Vec<Address> = self
            .store
            .list_addresses(space_id)?
            .into_iter()
            .filter(|a| a.name != name)
            .collect();
        let consumed = accountant::consumed(&snapshot, &others);
        let cost = accountant::cost(&snapshot, &plan.name)?;
        accountant::check_quota(&space_plan.quota, &consumed, &cost).into_result()?;

        address.plan = plan.name.clone();
        address.updated_at = Utc::now();
        self.store.put_address(&address)?;
        Ok(address)
    }

    fn admit_space_plan(
        &self,
        space_id: &AddressSpaceId,
        request: ReplaceSpacePlanRequest,
    ) -> Result<AddressSpace> {
        let snapshot = self.catalog.snapshot();

        let _admission = self.admission.lock();
        let mut space = self.get_open_space(space_id)?;
        if space.version != request.expected_version {
            return Err(ControlError::Conflict {
                expected: request.expected_version,
                actual: space.version,
            });
        }
        let plan = snapshot
            .space_plan(&request.plan)
            .ok_or_else(|| ControlError::UnknownPlan(request.plan.clone()))?;
        if plan.space_type != space.space_type {
            return Err(ControlError::InvalidRequest(format!(
                "plan {} is for {:?} spaces, not {:?}",
                plan.name, plan.space_type, space.space_type
            )));
        }

        let addresses = self.store.list_addresses(space_id)?;
        if let Some(stranded) = addresses
            .iter()
            .filter(|a| a.is_live())
            .find(|a| snapshot.permitted_plan(plan, &a.plan).is_err())
        {
            return Err(ControlError::UnknownPlan(stranded.plan.clone()));
        }
        let consumed = accountant::consumed(&snapshot, &addresses);
        accountant::check_quota(&plan.quota, &consumed, &ResourceCost::ZERO).into_result()?;

        space.plan = plan.name.clone();
        space.version += 1;
        space.updated_at = Utc::now();
        self.store.put_space(&space)?;
        Ok(space)
    }
}

#[async_trait]
impl<S: Store + 'static> ControlPlane for ControlPlaneService<S> {
    // =========================================================================
    // Address Space Operations
    // =========================================================================

    async fn create_address_space(
        &self,
        request: CreateAddressSpaceRequest,
    ) -> Result<AddressSpace> {
        if request.namespace.is_empty() || request.name.is_empty() {
            return Err(ControlError::InvalidRequest(
                "namespace and name are required".to_string(),
            ));
        }
        let snapshot = self.catalog.snapshot();
        let plan = snapshot
            .space_plan(&request.plan)
            .ok_or_else(|| ControlError::UnknownPlan(request.plan.clone()))?;
        if plan.space_type != request.space_type {
            return Err(ControlError::InvalidRequest(format!(
                "plan {} is for {:?} spaces, not {:?}",
                plan.name, plan.space_type, request.space_type
            )));
        }

        let space = {
            let _admission = self.admission.lock();
            if self
                .store
                .list_spaces()?
                .iter()
                .any(|s| s.namespace == request.namespace && s.name == request.name)
            {
                return Err(ControlError::SpaceExists {
                    namespace: request.namespace,
                    name: request.name,
                });
            }

            let now = Utc::now();
            let infra_id = InfraId::derive(&request.namespace, &request.name);
            let space = AddressSpace {
                space_id: AddressSpaceId::generate(),
                namespace: request.namespace,
                name: request.name,
                space_type: request.space_type,
                plan: plan.name.clone(),
                infra_id,
                endpoints: space_endpoints(request.space_type, &infra_id),
                version: 1,
                deleting: false,
                created_at: now,
                updated_at: now,
            };
            self.store.put_space(&space)?;
            space
        };

        tracing::info!(
            space_id = %space.space_id,
            namespace = %space.namespace,
            name = %space.name,
            infra_id = %space.infra_id,
            plan = %space.plan,
            "Created address space"
        );
        self.trigger.notify(&space.space_id, Trigger::Admission);
        Ok(space)
    }

    async fn get_address_space(&self, space_id: &AddressSpaceId) -> Result<AddressSpace> {
        self.get_space(space_id)
    }

    async fn list_address_spaces(&self) -> Result<Vec<AddressSpace>> {
        Ok(self.store.list_spaces()?)
    }

    async fn replace_address_space_plan(
        &self,
        space_id: &AddressSpaceId,
        request: ReplaceSpacePlanRequest,
    ) -> Result<AddressSpace> {
        let space = self.admit_space_plan(space_id, request)?;
        tracing::info!(
            space_id = %space_id,
            plan = %space.plan,
            version = space.version,
            "Replaced address space plan"
        );
        self.trigger.notify(space_id, Trigger::Admission);
        Ok(space)
    }

    async fn delete_address_space(&self, space_id: &AddressSpaceId) -> Result<()> {
        {
            let _admission = self.admission.lock();
            let mut space = self.get_space(space_id)?;
            if !space.deleting {
                space.deleting = true;
                space.version += 1;
                space.updated_at = Utc::now();
                self.store.put_space(&space)?;
                tracing::info!(space_id = %space_id, "Deleting address space");
            }
        }
        self.trigger.notify(space_id, Trigger::Admission);
        Ok(())
    }

    // =========================================================================
    // Address Operations
    // =========================================================================

    async fn create_address(
        &self,
        space_id: &AddressSpaceId,
        request: CreateAddressRequest,
    ) -> Result<Address> {
        let address = self.admit_address(space_id, request)?;
        tracing::info!(
            space_id = %space_id,
            address = %address.name,
            plan = %address.plan,
            "Created address"
        );
        self.trigger.notify(space_id, Trigger::Admission);
        Ok(address)
    }

    async fn get_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<Address> {
        self.get_address_record(space_id, name)
    }

    async fn list_addresses(&self, space_id: &AddressSpaceId) -> Result<Vec<Address>> {
        self.get_space(space_id)?;
        Ok(self.store.list_addresses(space_id)?)
    }

    async fn replace_address_plan(
        &self,
        space_id: &AddressSpaceId,
        name: &str,
        request: ReplaceAddressPlanRequest,
    ) -> Result<Address> {
        let address = self.admit_address_plan(space_id, name, request)?;
        tracing::info!(
            space_id = %space_id,
            address = %name,
            plan = %address.plan,
            "Replaced address plan"
        );
        self.trigger.notify(space_id, Trigger::Admission);
        Ok(address)
    }

    async fn delete_address(&self, space_id: &AddressSpaceId, name: &str) -> Result<()> {
        {
            let _admission = self.admission.lock();
            let mut address = self.get_address_record(space_id, name)?;
            if !address.terminating {
                address.terminating = true;
                address.updated_at = Utc::now();
                self.store.put_address(&address)?;
                tracing::info!(space_id = %space_id, address = %name, "Deleting address");
            }
        }
        self.trigger.notify(space_id, Trigger::Admission);
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    async fn get_address_status(
        &self,
        space_id: &AddressSpaceId,
        name: &str,
    ) -> Result<AddressStatus> {
        if let Some(status) = self.board.address(space_id, name) {
            return Ok(status);
        }
        // Not reconciled yet.
        let record = self.get_address_record(space_id, name)?;
        Ok(AddressStatus::from(&record))
    }

    async fn get_space_status(&self, space_id: &AddressSpaceId) -> Result<SpaceStatus> {
        if let Some(status) = self.board.get(space_id) {
            return Ok(status.as_ref().clone());
        }
        let space = self.get_space(space_id)?;
        let addresses = self.store.list_addresses(space_id)?;
        let pool = self.store.get_pool(space_id)?.unwrap_or_default();
        let snapshot = self.catalog.snapshot();
        let usage = snapshot
            .space_plan(&space.plan)
            .map(|plan| accountant::usage(&snapshot, plan, &addresses))
            .unwrap_or_default();
        Ok(SpaceStatus::from_records(&space, &addresses, &pool, usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogDocument;
    use crate::slot::fixtures::broker_spec;
    use msgplane_core::Dimension;
    use msgplane_store::{
        AddressSpaceType, AddressType, ComponentSpec, InfraConfig, LinkEstimate, Phase,
        PlanResources, RocksStore, RouterSpec,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingTrigger(AtomicUsize);

    impl ReconcileTrigger for CountingTrigger {
        fn notify(&self, _space_id: &AddressSpaceId, trigger: Trigger) {
            assert_eq!(trigger, Trigger::Admission);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn address_plan(name: &str, address_type: AddressType, broker: f64, router: f64) -> AddressPlan {
        AddressPlan {
            name: name.to_string(),
            address_type,
            resources: PlanResources { broker, router },
            shard_factor: None,
            links: LinkEstimate::default(),
        }
    }

    fn space_plan(name: &str, space_type: AddressSpaceType, infra: &str, broker: f64, plans: &[&str]) -> AddressSpacePlan {
        AddressSpacePlan {
            name: name.to_string(),
            space_type,
            infra_config: infra.to_string(),
            quota: ResourceCost::new(broker, 1.0, broker + 1.0),
            address_plans: plans.iter().map(ToString::to_string).collect(),
        }
    }

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(CatalogDocument {
            address_plans: vec![
                address_plan("medium", AddressType::Queue, 0.6, 0.0),
                address_plan("small", AddressType::Queue, 0.2, 0.0),
                address_plan("direct", AddressType::Anycast, 0.0, 0.1),
            ],
            address_space_plans: vec![
                space_plan("standard", AddressSpaceType::Standard, "infra", 1.0, &["medium", "small", "direct"]),
                space_plan("standard-large", AddressSpaceType::Standard, "infra", 4.0, &["medium", "small", "direct"]),
                space_plan("standard-tiny", AddressSpaceType::Standard, "infra", 0.5, &["medium", "small", "direct"]),
                space_plan("standard-small-only", AddressSpaceType::Standard, "infra", 4.0, &["small"]),
                space_plan("brokered", AddressSpaceType::Brokered, "brokered-infra", 1.0, &["medium", "small"]),
            ],
            infra_configs: vec![
                InfraConfig {
                    name: "infra".to_string(),
                    components: vec![
                        ComponentSpec::Broker(broker_spec(1, 3)),
                        ComponentSpec::Router(RouterSpec {
                            resources: vec![],
                            link_capacity: 250,
                            min_replicas: 1,
                            max_replicas: 3,
                        }),
                    ],
                },
                InfraConfig {
                    name: "brokered-infra".to_string(),
                    components: vec![ComponentSpec::Broker(broker_spec(1, 1))],
                },
            ],
        })
        .unwrap()
    }

    fn setup() -> (ControlPlaneService<RocksStore>, Arc<CountingTrigger>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let trigger = Arc::new(CountingTrigger::default());
        let service = ControlPlaneService::new(
            store,
            Arc::new(catalog()),
            Arc::new(StatusBoard::new()),
            Arc::clone(&trigger) as Arc<dyn ReconcileTrigger>,
        );
        (service, trigger, dir)
    }

    async fn standard_space(service: &ControlPlaneService<RocksStore>) -> AddressSpace {
        service
            .create_address_space(CreateAddressSpaceRequest::standard("tenant", "orders", "standard"))
            .await
            .unwrap()
    }

    fn queue(name: &str, plan: &str) -> CreateAddressRequest {
        CreateAddressRequest::new(name, AddressType::Queue, plan)
    }

    #[tokio::test]
    async fn create_space_success() {
        let (service, trigger, _dir) = setup();

        let space = standard_space(&service).await;

        assert_eq!(space.version, 1);
        assert_eq!(space.infra_id, InfraId::derive("tenant", "orders"));
        assert!(!space.endpoints.is_empty());
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn create_space_rejects_duplicates_and_bad_plans() {
        let (service, _trigger, _dir) = setup();
        standard_space(&service).await;

        let duplicate = service
            .create_address_space(CreateAddressSpaceRequest::standard("tenant", "orders", "standard"))
            .await;
        assert!(matches!(duplicate, Err(ControlError::SpaceExists { .. })));

        let unknown = service
            .create_address_space(CreateAddressSpaceRequest::standard("tenant", "other", "ghost"))
            .await;
        assert!(matches!(unknown, Err(ControlError::UnknownPlan(p)) if p == "ghost"));

        let wrong_type = service
            .create_address_space(CreateAddressSpaceRequest::standard("tenant", "other", "brokered"))
            .await;
        assert!(matches!(wrong_type, Err(ControlError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn quota_rejects_third_medium_address() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        let space = service
            .replace_address_space_plan(
                &space.space_id,
                ReplaceSpacePlanRequest {
                    plan: "standard-large".to_string(),
                    expected_version: 1,
                },
            )
            .await
            .unwrap();
        assert_eq!(space.version, 2);

        // Back to a broker quota of 1.0 with one medium in place.
        service
            .create_address(&space.space_id, queue("a", "medium"))
            .await
            .unwrap();
        service
            .replace_address_space_plan(
                &space.space_id,
                ReplaceSpacePlanRequest {
                    plan: "standard".to_string(),
                    expected_version: 2,
                },
            )
            .await
            .unwrap();

        let result = service
            .create_address(&space.space_id, queue("b", "medium"))
            .await;
        match result {
            Err(ControlError::QuotaExceeded {
                dimension,
                available,
                requested,
            }) => {
                assert_eq!(dimension, Dimension::Broker);
                assert!((available - 0.4).abs() < 1e-9);
                assert!((requested - 0.6).abs() < 1e-9);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
        assert!(service
            .store()
            .get_address(&space.space_id, "b")
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_plan_creates_nothing() {
        let (service, trigger, _dir) = setup();
        let space = standard_space(&service).await;

        let result = service
            .create_address(&space.space_id, queue("a", "ghost"))
            .await;

        assert!(matches!(result, Err(ControlError::UnknownPlan(p)) if p == "ghost"));
        assert!(service.list_addresses(&space.space_id).await.unwrap().is_empty());
        let status = service.get_space_status(&space.space_id).await.unwrap();
        assert!(status.consumed.is_zero());
        // Only the space creation asked for a pass.
        assert_eq!(trigger.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plan_must_match_address_type() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;

        let result = service
            .create_address(&space.space_id, queue("a", "direct"))
            .await;
        assert!(matches!(result, Err(ControlError::InvalidRequest(_))));

        let anycast = service
            .create_address(
                &space.space_id,
                CreateAddressRequest::new("a", AddressType::Anycast, "direct"),
            )
            .await
            .unwrap();
        assert_eq!(anycast.address, "a");
    }

    #[tokio::test]
    async fn duplicate_address_rejected() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        service
            .create_address(&space.space_id, queue("a", "small"))
            .await
            .unwrap();

        let result = service
            .create_address(&space.space_id, queue("a", "small"))
            .await;
        assert!(matches!(result, Err(ControlError::AddressExists { .. })));
    }

    #[tokio::test]
    async fn deleting_address_frees_quota() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        service
            .create_address(&space.space_id, queue("a", "medium"))
            .await
            .unwrap();

        service.delete_address(&space.space_id, "a").await.unwrap();
        // Idempotent
        service.delete_address(&space.space_id, "a").await.unwrap();

        let record = service.get_address(&space.space_id, "a").await.unwrap();
        assert!(record.terminating);
        service
            .create_address(&space.space_id, queue("b", "medium"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;

        let result = service
            .replace_address_space_plan(
                &space.space_id,
                ReplaceSpacePlanRequest {
                    plan: "standard-large".to_string(),
                    expected_version: 7,
                },
            )
            .await;

        assert!(matches!(
            result,
            Err(ControlError::Conflict {
                expected: 7,
                actual: 1
            })
        ));
        let unchanged = service.get_address_space(&space.space_id).await.unwrap();
        assert_eq!(unchanged.plan, "standard");
        assert_eq!(unchanged.version, 1);
    }

    #[tokio::test]
    async fn space_plan_change_respects_usage() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        service
            .create_address(&space.space_id, queue("a", "medium"))
            .await
            .unwrap();

        let too_small = service
            .replace_address_space_plan(
                &space.space_id,
                ReplaceSpacePlanRequest {
                    plan: "standard-tiny".to_string(),
                    expected_version: 1,
                },
            )
            .await;
        assert!(matches!(
            too_small,
            Err(ControlError::QuotaExceeded {
                dimension: Dimension::Broker,
                ..
            })
        ));

        let stranded = service
            .replace_address_space_plan(
                &space.space_id,
                ReplaceSpacePlanRequest {
                    plan: "standard-small-only".to_string(),
                    expected_version: 1,
                },
            )
            .await;
        assert!(matches!(stranded, Err(ControlError::UnknownPlan(p)) if p == "medium"));
    }

    #[tokio::test]
    async fn address_plan_change_is_quota_checked() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        service
            .create_address(&space.space_id, queue("a", "small"))
            .await
            .unwrap();
        service
            .create_address(&space.space_id, queue("b", "small"))
            .await
            .unwrap();

        // 0.2 + 0.6 fits in 1.0
        let a = service
            .replace_address_plan(
                &space.space_id,
                "a",
                ReplaceAddressPlanRequest {
                    plan: "medium".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(a.plan, "medium");

        // 0.6 + 0.6 does not
        let b = service
            .replace_address_plan(
                &space.space_id,
                "b",
                ReplaceAddressPlanRequest {
                    plan: "medium".to_string(),
                },
            )
            .await;
        assert!(matches!(b, Err(ControlError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn admission_charges_what_the_accountant_prices() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        let snapshot = catalog().snapshot();
        let small = accountant::cost(&snapshot, "small").unwrap();
        let medium = accountant::cost(&snapshot, "medium").unwrap();

        service
            .create_address(&space.space_id, queue("a", "small"))
            .await
            .unwrap();
        service
            .create_address(&space.space_id, queue("b", "medium"))
            .await
            .unwrap();
        let status = service.get_space_status(&space.space_id).await.unwrap();
        assert_eq!(status.consumed, small + medium);

        let rejected = service
            .replace_address_plan(
                &space.space_id,
                "a",
                ReplaceAddressPlanRequest {
                    plan: "medium".to_string(),
                },
            )
            .await;
        match rejected {
            Err(ControlError::QuotaExceeded { requested, .. }) => {
                assert!((requested - medium.get(Dimension::Broker)).abs() < 1e-9);
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deleting_space_rejects_new_addresses() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;

        service.delete_address_space(&space.space_id).await.unwrap();
        let deleting = service.get_address_space(&space.space_id).await.unwrap();
        assert!(deleting.deleting);
        assert_eq!(deleting.version, 2);

        let result = service
            .create_address(&space.space_id, queue("a", "small"))
            .await;
        assert!(matches!(result, Err(ControlError::SpaceDeleting(_))));
    }

    #[tokio::test]
    async fn status_falls_back_to_store() {
        let (service, _trigger, _dir) = setup();
        let space = standard_space(&service).await;
        service
            .create_address(&space.space_id, queue("a", "small"))
            .await
            .unwrap();

        let status = service
            .get_address_status(&space.space_id, "a")
            .await
            .unwrap();
        assert_eq!(status.status.phase, Phase::Pending);
        assert!(!status.status.ready);

        let missing = service.get_address_status(&space.space_id, "zzz").await;
        assert!(matches!(missing, Err(ControlError::AddressNotFound { .. })));

        let space_status = service.get_space_status(&space.space_id).await.unwrap();
        assert!((space_status.consumed.broker - 0.2).abs() < 1e-9);
        assert!((space_status.available.broker - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_space() {
        let (service, _trigger, _dir) = setup();
        let result = service
            .create_address(&AddressSpaceId::generate(), queue("a", "small"))
            .await;
        assert!(matches!(result, Err(ControlError::SpaceNotFound(_))));
    }
}
