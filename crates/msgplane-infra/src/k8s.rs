//! Kubernetes infrastructure implementation.
//!
//! This module provides the `K8sInfra` which manages broker `StatefulSet`s,
//! router and admin `Deployment`s, and their services for each address space.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::watcher::{self, watcher, Config as WatcherConfig};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use msgplane_core::AddressSpaceId;
use msgplane_store::{AdminSpec, BrokerSpec, RouterSpec};

use crate::cache::ReadinessCache;
use crate::objects::{
    admin_name, broker_claim_name, broker_service_name, build_admin_deployment,
    build_broker_statefulset, build_router_deployment, build_service, console_service_name,
    infra_selector, messaging_service_name, router_name, storage_request, CONSOLE_PORT,
    MESSAGING_PORT, MESSAGING_TLS_PORT, SPACE_ID_LABEL,
};
use crate::types::{DrainStats, InfraEvent, InfraOwner, InfraSettings, Readiness};
use crate::{InfraError, Result};

/// The `Infra` trait is the engine's view of the infrastructure layer.
///
/// Implementations apply desired broker/router/admin shapes and report
/// readiness and drain statistics. Nothing here decides placement.
#[async_trait]
pub trait Infra: Send + Sync {
    // =========================================================================
    // Desired State
    // =========================================================================

    /// Create or update one broker with the given sizing.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be applied.
    async fn ensure_broker(
        &self,
        owner: &InfraOwner,
        cluster_id: &str,
        spec: &BrokerSpec,
    ) -> Result<()>;

    /// Remove a drained broker and its storage.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails (except not found).
    async fn decommission_broker(&self, owner: &InfraOwner, cluster_id: &str) -> Result<()>;

    /// Apply the router replica count and sizing.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be applied.
    async fn scale_routers(&self, owner: &InfraOwner, replicas: u32, spec: &RouterSpec)
        -> Result<()>;

    /// Create or update the admin pod.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be applied.
    async fn ensure_admin(&self, owner: &InfraOwner, spec: &AdminSpec) -> Result<()>;

    /// Remove every object of a space.
    ///
    /// # Errors
    ///
    /// Returns an error if deletion fails.
    async fn teardown(&self, owner: &InfraOwner) -> Result<()>;

    // =========================================================================
    // Observed State
    // =========================================================================

    /// Check whether a broker's pod is ready.
    ///
    /// # Errors
    ///
    /// Returns an error if readiness cannot be determined.
    async fn broker_ready(&self, owner: &InfraOwner, cluster_id: &str) -> Result<bool>;

    /// Check whether all desired router replicas are ready.
    ///
    /// # Errors
    ///
    /// Returns an error if readiness cannot be determined.
    async fn routers_ready(&self, owner: &InfraOwner) -> Result<bool>;

    /// Read drain statistics of one address on one broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be reached.
    async fn drain_stats(
        &self,
        owner: &InfraOwner,
        cluster_id: &str,
        address: &str,
    ) -> Result<DrainStats>;
}

/// Kubernetes-based infrastructure layer.
pub struct K8sInfra {
    client: Client,
    settings: InfraSettings,
    readiness: ReadinessCache,
    http_client: reqwest::Client,
}

impl K8sInfra {
    /// Create a new Kubernetes infrastructure layer.
    ///
    /// This will attempt to connect to the cluster using in-cluster config
    /// or kubeconfig file.
    ///
    /// # Errors
    ///
    /// Returns an error if the Kubernetes or HTTP client cannot be created.
    pub async fn new(settings: InfraSettings) -> Result<Self> {
        let client = Client::try_default().await?;
        Self::with_client(client, settings)
    }

    /// Create a new infrastructure layer with a pre-configured client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_client(client: Client, settings: InfraSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_seconds))
            .build()
            .map_err(|e| InfraError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings,
            readiness: ReadinessCache::new(),
            http_client,
        })
    }

    /// Get a reference to the settings.
    #[must_use]
    pub fn settings(&self) -> &InfraSettings {
        &self.settings
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.settings.namespace)
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.settings.field_manager).force()
    }

    async fn apply<K>(&self, name: &str, object: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>()
            .patch(name, &self.apply_params(), &Patch::Apply(object))
            .await?;
        Ok(())
    }

    async fn delete_named<K>(&self, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(name, "Object not found, already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_labelled<K>(&self, selector: &str) -> Result<usize>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let list = self
            .api::<K>()
            .list(&ListParams::default().labels(selector))
            .await?;
        let mut deleted = 0;
        for object in list.items {
            if let Some(name) = object.meta().name.as_deref() {
                self.delete_named::<K>(name).await?;
                self.readiness.remove(name);
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Resize the data claim of a broker in place.
    async fn resize_claim(&self, cluster_id: &str, storage: &str) -> Result<()> {
        let claim = broker_claim_name(cluster_id);
        let patch = json!({ "spec": { "resources": { "requests": { "storage": storage } } } });
        self.api::<PersistentVolumeClaim>()
            .patch(&claim, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(cluster_id, claim, storage, "Resized broker volume claim");
        Ok(())
    }

    /// Fetch readiness from the API when the watcher has not seen the object yet.
    async fn fetch_readiness<K>(&self, name: &str, extract: fn(&K) -> Readiness) -> Result<Option<Readiness>>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        if let Some(cached) = self.readiness.get(name) {
            return Ok(Some(cached));
        }
        let Some(object) = self.api::<K>().get_opt(name).await? else {
            return Ok(None);
        };
        let readiness = extract(&object);
        self.readiness.insert(name.to_string(), readiness);
        Ok(Some(readiness))
    }

    fn statefulset_readiness(sts: &StatefulSet) -> Readiness {
        Readiness {
            desired: sts
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .map_or(1, i32::unsigned_abs),
            ready: sts
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .map_or(0, i32::unsigned_abs),
        }
    }

    fn deployment_readiness(deployment: &Deployment) -> Readiness {
        Readiness {
            desired: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .map_or(1, i32::unsigned_abs),
            ready: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .map_or(0, i32::unsigned_abs),
        }
    }

    fn extract_space_id<K: Resource>(object: &K) -> Option<AddressSpaceId> {
        let raw = object.meta().labels.as_ref()?.get(SPACE_ID_LABEL)?;
        match raw.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(label = %raw, error = %e, "Invalid space ID in object label");
                None
            }
        }
    }

    /// Run the watchers, updating the readiness cache and emitting an event
    /// for the owning space whenever a workload's readiness changes.
    ///
    /// This method runs until the event receiver is dropped. It should be
    /// spawned as a background task.
    pub async fn run_watcher(&self, events: mpsc::Sender<InfraEvent>) {
        tokio::join!(
            self.watch_workloads::<StatefulSet>(&events, Self::statefulset_readiness),
            self.watch_workloads::<Deployment>(&events, Self::deployment_readiness),
        );
    }

    async fn watch_workloads<K>(&self, events: &mpsc::Sender<InfraEvent>, extract: fn(&K) -> Readiness)
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + 'static,
        <K as Resource>::DynamicType: Default,
    {
        let config = WatcherConfig::default().labels("app=msgplane");
        let watch = watcher(self.api::<K>(), config);

        futures::pin_mut!(watch);

        info!(
            namespace = %self.settings.namespace,
            kind = %K::kind(&Default::default()),
            "Starting infrastructure watcher"
        );

        while let Some(event) = watch.next().await {
            let (object, readiness) = match event {
                Ok(watcher::Event::Apply(object) | watcher::Event::InitApply(object)) => {
                    let readiness = extract(&object);
                    (object, Some(readiness))
                }
                Ok(watcher::Event::Delete(object)) => (object, None),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => continue,
                Err(e) => {
                    error!(error = %e, "Watcher error, will retry");
                    continue;
                }
            };

            let Some(name) = object.meta().name.clone() else {
                continue;
            };
            let changed = match readiness {
                Some(readiness) => self.readiness.insert(name.clone(), readiness),
                None => self.readiness.remove(&name).is_some(),
            };
            if !changed {
                continue;
            }

            let Some(space_id) = Self::extract_space_id(&object) else {
                continue;
            };
            debug!(space_id = %space_id, object = %name, ready = ?readiness, "Workload readiness changed");

            if events
                .send(InfraEvent {
                    space_id,
                    object: name,
                })
                .await
                .is_err()
            {
                info!("Event receiver closed, stopping watcher");
                return;
            }
        }

        warn!("Infrastructure watcher exited unexpectedly");
    }

    fn drain_stats_url(&self, owner: &InfraOwner, cluster_id: &str, address: &str) -> Result<reqwest::Url> {
        let base = format!(
            "http://{cluster_id}-0.{}.{}.svc:{}/",
            broker_service_name(&owner.infra_id),
            self.settings.namespace,
            self.settings.broker_management_port
        );
        let mut url = reqwest::Url::parse(&base)
            .map_err(|e| InfraError::Config(format!("invalid broker URL {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| InfraError::Config(format!("broker URL cannot have a path: {base}")))?
            .clear()
            .extend(["v1", "addresses", address, "drain-stats"]);
        Ok(url)
    }
}

#[async_trait]
impl Infra for K8sInfra {
    async fn ensure_broker(
        &self,
        owner: &InfraOwner,
        cluster_id: &str,
        spec: &BrokerSpec,
    ) -> Result<()> {
        let service_name = broker_service_name(&owner.infra_id);
        let service = build_service(
            owner,
            &service_name,
            "broker",
            &[("amqp", MESSAGING_PORT)],
            true,
            &self.settings,
        );
        self.apply(&service_name, &service).await?;

        let mut desired = build_broker_statefulset(owner, cluster_id, spec, &self.settings)?;

        if let Some(existing) = self.api::<StatefulSet>().get_opt(cluster_id).await? {
            let existing_spec = existing.spec.as_ref();
            let existing_storage = existing_spec
                .and_then(|s| s.volume_claim_templates.as_ref())
                .and_then(|claims| claims.first())
                .and_then(|claim| claim.spec.as_ref())
                .and_then(|s| s.resources.as_ref())
                .and_then(|r| r.requests.as_ref())
                .and_then(|r| r.get("storage"))
                .map(|q| q.0.clone());

            // Claim templates are immutable once the StatefulSet exists.
            if let Some(desired_spec) = desired.spec.as_mut() {
                desired_spec.volume_claim_templates =
                    existing_spec.and_then(|s| s.volume_claim_templates.clone());
            }

            if let Some(wanted) = storage_request(&spec.resources) {
                if existing_storage.as_deref() != Some(wanted) {
                    if spec.update_persistent_volume_claim {
                        self.resize_claim(cluster_id, wanted).await?;
                    } else {
                        debug!(
                            cluster_id,
                            wanted, "Storage change not applied, volume claim updates disabled"
                        );
                    }
                }
            }
        }

        self.apply(cluster_id, &desired).await?;
        debug!(space_id = %owner.space_id, cluster_id, "Applied broker");
        Ok(())
    }

    async fn decommission_broker(&self, owner: &InfraOwner, cluster_id: &str) -> Result<()> {
        self.delete_named::<StatefulSet>(cluster_id).await?;
        self.delete_named::<PersistentVolumeClaim>(&broker_claim_name(cluster_id))
            .await?;
        self.readiness.remove(cluster_id);

        info!(space_id = %owner.space_id, cluster_id, "Decommissioned broker");
        Ok(())
    }

    async fn scale_routers(
        &self,
        owner: &InfraOwner,
        replicas: u32,
        spec: &RouterSpec,
    ) -> Result<()> {
        let service_name = messaging_service_name(&owner.infra_id);
        let service = build_service(
            owner,
            &service_name,
            "router",
            &[("amqp", MESSAGING_PORT), ("amqps", MESSAGING_TLS_PORT)],
            false,
            &self.settings,
        );
        self.apply(&service_name, &service).await?;

        let name = router_name(&owner.infra_id);
        let deployment = build_router_deployment(owner, replicas, spec, &self.settings);
        self.apply(&name, &deployment).await?;

        debug!(space_id = %owner.space_id, replicas, "Applied router mesh");
        Ok(())
    }

    async fn ensure_admin(&self, owner: &InfraOwner, spec: &AdminSpec) -> Result<()> {
        let service_name = console_service_name(&owner.infra_id);
        let service = build_service(
            owner,
            &service_name,
            "admin",
            &[("console", CONSOLE_PORT)],
            false,
            &self.settings,
        );
        self.apply(&service_name, &service).await?;

        let name = admin_name(&owner.infra_id);
        self.apply(&name, &build_admin_deployment(owner, spec, &self.settings))
            .await
    }

    async fn teardown(&self, owner: &InfraOwner) -> Result<()> {
        let selector = infra_selector(&owner.infra_id);

        let brokers = self.delete_labelled::<StatefulSet>(&selector).await?;
        let deployments = self.delete_labelled::<Deployment>(&selector).await?;
        let services = self.delete_labelled::<Service>(&selector).await?;
        let claims = self.delete_labelled::<PersistentVolumeClaim>(&selector).await?;

        info!(
            space_id = %owner.space_id,
            brokers,
            deployments,
            services,
            claims,
            "Tore down address space infrastructure"
        );
        Ok(())
    }

    async fn broker_ready(&self, _owner: &InfraOwner, cluster_id: &str) -> Result<bool> {
        Ok(self
            .fetch_readiness::<StatefulSet>(cluster_id, Self::statefulset_readiness)
            .await?
            .is_some_and(|r| r.ready >= 1))
    }

    async fn routers_ready(&self, owner: &InfraOwner) -> Result<bool> {
        Ok(self
            .fetch_readiness::<Deployment>(&router_name(&owner.infra_id), Self::deployment_readiness)
            .await?
            .is_some_and(|r| r.is_ready()))
    }

    async fn drain_stats(
        &self,
        owner: &InfraOwner,
        cluster_id: &str,
        address: &str,
    ) -> Result<DrainStats> {
        let url = self.drain_stats_url(owner, cluster_id, address)?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| InfraError::BrokerUnreachable(format!("{cluster_id}: {e}")))?;

        if !response.status().is_success() {
            return Err(InfraError::InvalidDrainStats {
                broker: cluster_id.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        response
            .json::<DrainStats>()
            .await
            .map_err(|e| InfraError::InvalidDrainStats {
                broker: cluster_id.to_string(),
                reason: e.to_string(),
            })
    }
}

/// A mock infrastructure layer for testing without a real Kubernetes cluster.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

    /// A mock infrastructure layer that keeps workloads in memory.
    ///
    /// Brokers are ready as soon as they are ensured unless marked otherwise.
    /// Drain statistics default to drained and can be scripted per
    /// (broker, address): each poll consumes one scripted value and the last
    /// one sticks.
    #[derive(Default)]
    pub struct MockInfra {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        brokers: BTreeMap<String, MockBroker>,
        routers: HashMap<AddressSpaceId, u32>,
        admins: HashSet<AddressSpaceId>,
        unready_brokers: HashSet<String>,
        routers_unready: bool,
        drain_scripts: HashMap<(String, String), VecDeque<DrainStats>>,
        drain_log: Vec<(String, String, DrainStats)>,
        decommissioned: Vec<String>,
        torn_down: Vec<AddressSpaceId>,
    }

    struct MockBroker {
        space_id: AddressSpaceId,
        spec: BrokerSpec,
    }

    impl MockInfra {
        /// Create a new mock infrastructure layer.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Force a broker's readiness.
        pub fn set_broker_ready(&self, cluster_id: &str, ready: bool) {
            let mut state = self.state.lock();
            if ready {
                state.unready_brokers.remove(cluster_id);
            } else {
                state.unready_brokers.insert(cluster_id.to_string());
            }
        }

        /// Force readiness of every router mesh.
        pub fn set_routers_ready(&self, ready: bool) {
            self.state.lock().routers_unready = !ready;
        }

        /// Script the drain statistics returned for an address on a broker.
        pub fn script_drain(
            &self,
            cluster_id: &str,
            address: &str,
            stats: impl IntoIterator<Item = DrainStats>,
        ) {
            self.state.lock().drain_scripts.insert(
                (cluster_id.to_string(), address.to_string()),
                stats.into_iter().collect(),
            );
        }

        /// Names of live brokers, in name order.
        #[must_use]
        pub fn broker_names(&self) -> Vec<String> {
            self.state.lock().brokers.keys().cloned().collect()
        }

        /// Names of live brokers of one space.
        #[must_use]
        pub fn brokers_of(&self, space_id: &AddressSpaceId) -> Vec<String> {
            self.state
                .lock()
                .brokers
                .iter()
                .filter(|(_, b)| b.space_id == *space_id)
                .map(|(name, _)| name.clone())
                .collect()
        }

        /// The sizing a broker was last ensured with.
        #[must_use]
        pub fn broker_spec(&self, cluster_id: &str) -> Option<BrokerSpec> {
            self.state
                .lock()
                .brokers
                .get(cluster_id)
                .map(|b| b.spec.clone())
        }

        /// Router replicas last applied for a space.
        #[must_use]
        pub fn router_replicas(&self, space_id: &AddressSpaceId) -> Option<u32> {
            self.state.lock().routers.get(space_id).copied()
        }

        /// Whether an admin pod exists for a space.
        #[must_use]
        pub fn has_admin(&self, space_id: &AddressSpaceId) -> bool {
            self.state.lock().admins.contains(space_id)
        }

        /// Brokers decommissioned so far, in order.
        #[must_use]
        pub fn decommissioned(&self) -> Vec<String> {
            self.state.lock().decommissioned.clone()
        }

        /// Every drain statistics poll so far, in order.
        #[must_use]
        pub fn drain_log(&self) -> Vec<(String, String, DrainStats)> {
            self.state.lock().drain_log.clone()
        }

        /// Whether a space was torn down.
        #[must_use]
        pub fn was_torn_down(&self, space_id: &AddressSpaceId) -> bool {
            self.state.lock().torn_down.contains(space_id)
        }
    }

    #[async_trait]
    impl Infra for MockInfra {
        async fn ensure_broker(
            &self,
            owner: &InfraOwner,
            cluster_id: &str,
            spec: &BrokerSpec,
        ) -> Result<()> {
            self.state.lock().brokers.insert(
                cluster_id.to_string(),
                MockBroker {
                    space_id: owner.space_id,
                    spec: spec.clone(),
                },
            );
            Ok(())
        }

        async fn decommission_broker(&self, _owner: &InfraOwner, cluster_id: &str) -> Result<()> {
            let mut state = self.state.lock();
            state.brokers.remove(cluster_id);
            state.decommissioned.push(cluster_id.to_string());
            Ok(())
        }

        async fn scale_routers(
            &self,
            owner: &InfraOwner,
            replicas: u32,
            _spec: &RouterSpec,
        ) -> Result<()> {
            self.state.lock().routers.insert(owner.space_id, replicas);
            Ok(())
        }

        async fn ensure_admin(&self, owner: &InfraOwner, _spec: &AdminSpec) -> Result<()> {
            self.state.lock().admins.insert(owner.space_id);
            Ok(())
        }

        async fn teardown(&self, owner: &InfraOwner) -> Result<()> {
            let mut state = self.state.lock();
            state.brokers.retain(|_, b| b.space_id != owner.space_id);
            state.routers.remove(&owner.space_id);
            state.admins.remove(&owner.space_id);
            state.torn_down.push(owner.space_id);
            Ok(())
        }

        async fn broker_ready(&self, _owner: &InfraOwner, cluster_id: &str) -> Result<bool> {
            let state = self.state.lock();
            Ok(state.brokers.contains_key(cluster_id) && !state.unready_brokers.contains(cluster_id))
        }

        async fn routers_ready(&self, owner: &InfraOwner) -> Result<bool> {
            let state = self.state.lock();
            Ok(state.routers.contains_key(&owner.space_id) && !state.routers_unready)
        }

        async fn drain_stats(
            &self,
            _owner: &InfraOwner,
            cluster_id: &str,
            address: &str,
        ) -> Result<DrainStats> {
            let mut state = self.state.lock();
            let key = (cluster_id.to_string(), address.to_string());
            let stats = match state.drain_scripts.get_mut(&key) {
                Some(script) if script.len() > 1 => script.pop_front().unwrap_or_default(),
                Some(script) => script.front().copied().unwrap_or_default(),
                None => DrainStats::default(),
            };
            state.drain_log.push((key.0, key.1, stats));
            Ok(stats)
        }
    }
}
