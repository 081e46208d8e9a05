//! Kubernetes object builders for messaging infrastructure.
//!
//! Every address space gets:
//!
//! - one single-replica `StatefulSet` per broker, `broker-<infraId>-<ordinal>`
//! - a headless `Service` `broker-<infraId>` governing the broker pods
//! - a router `Deployment` `router-<infraId>` and its `Service` `messaging-<infraId>`
//! - an admin `Deployment` `admin-<infraId>` and its `Service` `console-<infraId>`
//!
//! All objects carry the labels returned by [`labels`].

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    Service, ServicePort, ServiceSpec, TCPSocketAction,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use msgplane_core::InfraId;
use msgplane_store::{
    AddressSpaceType, AdminSpec, BrokerSpec, Endpoint, ResourceRequirement, RouterSpec,
};
use serde_json::json;
use std::collections::BTreeMap;

use crate::types::{InfraOwner, InfraSettings};
use crate::{InfraError, Result};

/// AMQP port.
pub const MESSAGING_PORT: u16 = 5672;
/// AMQPS port.
pub const MESSAGING_TLS_PORT: u16 = 5671;
/// Admin console port.
pub const CONSOLE_PORT: u16 = 8080;

/// Label present on every managed object.
pub const APP_LABEL: (&str, &str) = ("app", "msgplane");
/// Label carrying the infra id.
pub const INFRA_ID_LABEL: &str = "msgplane.io/infra-id";
/// Label carrying the owning space id.
pub const SPACE_ID_LABEL: &str = "msgplane.io/space-id";
/// Label carrying the component kind.
pub const COMPONENT_LABEL: &str = "msgplane.io/component";

/// Name of the router deployment of a space.
#[must_use]
pub fn router_name(infra_id: &InfraId) -> String {
    format!("router-{infra_id}")
}

/// Name of the admin deployment of a space.
#[must_use]
pub fn admin_name(infra_id: &InfraId) -> String {
    format!("admin-{infra_id}")
}

/// Name of the headless service governing broker pods.
#[must_use]
pub fn broker_service_name(infra_id: &InfraId) -> String {
    format!("broker-{infra_id}")
}

/// Name of the messaging service in front of the routers.
#[must_use]
pub fn messaging_service_name(infra_id: &InfraId) -> String {
    format!("messaging-{infra_id}")
}

/// Name of the console service in front of the admin pod.
#[must_use]
pub fn console_service_name(infra_id: &InfraId) -> String {
    format!("console-{infra_id}")
}

/// Name of the data volume claim of a broker cluster's single pod.
#[must_use]
pub fn broker_claim_name(cluster_id: &str) -> String {
    format!("data-{cluster_id}-0")
}

/// Label selector matching every object of a space.
#[must_use]
pub fn infra_selector(infra_id: &InfraId) -> String {
    format!("{INFRA_ID_LABEL}={infra_id}")
}

/// Endpoints advertised by an address space.
///
/// Standard spaces expose messaging through the routers; brokered spaces
/// expose the broker service directly.
#[must_use]
pub fn space_endpoints(space_type: AddressSpaceType, infra_id: &InfraId) -> Vec<Endpoint> {
    let messaging_service = match space_type {
        AddressSpaceType::Standard => messaging_service_name(infra_id),
        AddressSpaceType::Brokered => broker_service_name(infra_id),
    };
    vec![
        Endpoint {
            name: "messaging".to_string(),
            service: messaging_service.clone(),
            port: MESSAGING_PORT,
        },
        Endpoint {
            name: "messaging-tls".to_string(),
            service: messaging_service,
            port: MESSAGING_TLS_PORT,
        },
        Endpoint {
            name: "console".to_string(),
            service: console_service_name(infra_id),
            port: CONSOLE_PORT,
        },
    ]
}

/// Labels for an object of the given component.
#[must_use]
pub fn labels(owner: &InfraOwner, component: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(&owner.infra_id, component);
    labels.insert(SPACE_ID_LABEL.to_string(), owner.space_id.to_string());
    labels
}

fn selector_labels(infra_id: &InfraId, component: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.0.to_string(), APP_LABEL.1.to_string());
    labels.insert(INFRA_ID_LABEL.to_string(), infra_id.to_hex());
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels
}

fn metadata(name: &str, owner: &InfraOwner, component: &str, settings: &InfraSettings) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(settings.namespace.clone()),
        labels: Some(labels(owner, component)),
        ..Default::default()
    }
}

/// The storage request of a component, if any.
#[must_use]
pub fn storage_request(resources: &[ResourceRequirement]) -> Option<&str> {
    resources
        .iter()
        .find(|r| r.name == "storage")
        .map(|r| r.value.as_str())
}

/// Container requests and limits. Storage is handled by volume claims.
fn build_resources(resources: &[ResourceRequirement]) -> ResourceRequirements {
    let quantities: BTreeMap<String, Quantity> = resources
        .iter()
        .filter(|r| r.name != "storage")
        .map(|r| (r.name.clone(), Quantity(r.value.clone())))
        .collect();

    ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    }
}

fn tcp_probe(port: u16) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(i32::from(port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        period_seconds: Some(10),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn port(name: &str, port: u16) -> ContainerPort {
    ContainerPort {
        container_port: i32::from(port),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn build_broker_container(spec: &BrokerSpec, settings: &InfraSettings) -> Container {
    let mut env_vars = vec![env(
        "MANAGEMENT_PORT",
        settings.broker_management_port.to_string(),
    )];
    if let Some(policy) = &spec.address_full_policy {
        env_vars.push(env("ADDRESS_FULL_POLICY", policy.clone()));
    }

    Container {
        name: "broker".to_string(),
        image: Some(settings.broker_image.clone()),
        ports: Some(vec![
            port("amqp", MESSAGING_PORT),
            port("management", settings.broker_management_port),
        ]),
        env: Some(env_vars),
        resources: Some(build_resources(&spec.resources)),
        readiness_probe: Some(tcp_probe(MESSAGING_PORT)),
        volume_mounts: storage_request(&spec.resources).map(|_| {
            vec![k8s_openapi::api::core::v1::VolumeMount {
                name: "data".to_string(),
                mount_path: "/var/run/broker".to_string(),
                ..Default::default()
            }]
        }),
        ..Default::default()
    }
}

/// Build the single-replica `StatefulSet` of one broker.
///
/// # Errors
///
/// Returns an error if the object cannot be assembled.
pub fn build_broker_statefulset(
    owner: &InfraOwner,
    cluster_id: &str,
    spec: &BrokerSpec,
    settings: &InfraSettings,
) -> Result<StatefulSet> {
    let mut pod_labels = selector_labels(&owner.infra_id, "broker");
    pod_labels.insert("msgplane.io/broker".to_string(), cluster_id.to_string());

    let template = PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(pod_labels.clone()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![build_broker_container(spec, settings)],
            termination_grace_period_seconds: Some(60),
            ..Default::default()
        }),
    };

    let claim_templates = storage_request(&spec.resources).map(|storage| {
        let mut claim = json!({
            "metadata": { "name": "data" },
            "spec": {
                "accessModes": ["ReadWriteOnce"],
                "resources": { "requests": { "storage": storage } }
            }
        });
        if let Some(class) = &spec.storage_class_name {
            claim["spec"]["storageClassName"] = json!(class);
        }
        vec![claim]
    });

    let object = json!({
        "apiVersion": "apps/v1",
        "kind": "StatefulSet",
        "metadata": metadata(cluster_id, owner, "broker", settings),
        "spec": {
            "replicas": 1,
            "serviceName": broker_service_name(&owner.infra_id),
            "selector": { "matchLabels": pod_labels },
            "template": template,
            "volumeClaimTemplates": claim_templates.unwrap_or_default(),
        }
    });

    serde_json::from_value(object)
        .map_err(|e| InfraError::Config(format!("invalid broker object {cluster_id}: {e}")))
}

/// Build the router `Deployment` of a space.
#[must_use]
pub fn build_router_deployment(
    owner: &InfraOwner,
    replicas: u32,
    spec: &RouterSpec,
    settings: &InfraSettings,
) -> Deployment {
    let pod_labels = selector_labels(&owner.infra_id, "router");

    Deployment {
        metadata: metadata(&router_name(&owner.infra_id), owner, "router", settings),
        spec: Some(DeploymentSpec {
            replicas: Some(i32::try_from(replicas).unwrap_or(i32::MAX)),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "router".to_string(),
                        image: Some(settings.router_image.clone()),
                        ports: Some(vec![
                            port("amqp", MESSAGING_PORT),
                            port("amqps", MESSAGING_TLS_PORT),
                        ]),
                        env: Some(vec![env("LINK_CAPACITY", spec.link_capacity.to_string())]),
                        resources: Some(build_resources(&spec.resources)),
                        readiness_probe: Some(tcp_probe(MESSAGING_PORT)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the admin `Deployment` of a space.
#[must_use]
pub fn build_admin_deployment(
    owner: &InfraOwner,
    spec: &AdminSpec,
    settings: &InfraSettings,
) -> Deployment {
    let pod_labels = selector_labels(&owner.infra_id, "admin");

    Deployment {
        metadata: metadata(&admin_name(&owner.infra_id), owner, "admin", settings),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(pod_labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "admin".to_string(),
                        image: Some(settings.admin_image.clone()),
                        ports: Some(vec![port("console", CONSOLE_PORT)]),
                        env: Some(vec![env("INFRA_ID", owner.infra_id.to_hex())]),
                        resources: Some(build_resources(&spec.resources)),
                        readiness_probe: Some(tcp_probe(CONSOLE_PORT)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build a `Service` selecting the pods of one component.
#[must_use]
pub fn build_service(
    owner: &InfraOwner,
    name: &str,
    component: &str,
    ports: &[(&str, u16)],
    headless: bool,
    settings: &InfraSettings,
) -> Service {
    Service {
        metadata: metadata(name, owner, component, settings),
        spec: Some(ServiceSpec {
            cluster_ip: headless.then(|| "None".to_string()),
            selector: Some(selector_labels(&owner.infra_id, component)),
            ports: Some(
                ports
                    .iter()
                    .map(|(port_name, port)| ServicePort {
                        name: Some((*port_name).to_string()),
                        port: i32::from(*port),
                        target_port: Some(IntOrString::Int(i32::from(*port))),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use msgplane_core::AddressSpaceId;

    fn owner() -> InfraOwner {
        InfraOwner::new(
            AddressSpaceId::from_bytes([1u8; 16]),
            InfraId::from_bytes([0xab; 8]),
        )
    }

    fn broker_spec() -> BrokerSpec {
        BrokerSpec {
            resources: vec![
                ResourceRequirement::new("memory", "512Mi"),
                ResourceRequirement::new("storage", "1Gi"),
            ],
            min_replicas: 1,
            max_replicas: 3,
            capacity: None,
            update_persistent_volume_claim: false,
            address_full_policy: Some("FAIL".to_string()),
            storage_class_name: Some("fast".to_string()),
        }
    }

    #[test]
    fn broker_statefulset_has_claim_and_labels() {
        let settings = InfraSettings::default();
        let sts =
            build_broker_statefulset(&owner(), "broker-abababababababab-0", &broker_spec(), &settings)
                .unwrap();

        let meta = &sts.metadata;
        assert_eq!(meta.name.as_deref(), Some("broker-abababababababab-0"));
        assert_eq!(meta.namespace.as_deref(), Some("msgplane-infra"));
        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some("msgplane"));
        assert_eq!(
            labels.get(INFRA_ID_LABEL).map(String::as_str),
            Some("abababababababab")
        );
        assert!(labels.contains_key(SPACE_ID_LABEL));
        assert_eq!(labels.get(COMPONENT_LABEL).map(String::as_str), Some("broker"));

        let spec = sts.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        let claims = spec.volume_claim_templates.as_ref().unwrap();
        assert_eq!(claims.len(), 1);
        let claim_spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(claim_spec.storage_class_name.as_deref(), Some("fast"));

        // Storage is a claim, not a container resource.
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        let requests = container
            .resources
            .as_ref()
            .unwrap()
            .requests
            .as_ref()
            .unwrap();
        assert_eq!(requests.get("memory"), Some(&Quantity("512Mi".to_string())));
        assert!(!requests.contains_key("storage"));
    }

    #[test]
    fn router_deployment_uses_replica_count() {
        let spec = RouterSpec {
            resources: vec![ResourceRequirement::new("memory", "256Mi")],
            link_capacity: 200,
            min_replicas: 2,
            max_replicas: 4,
        };
        let deployment = build_router_deployment(&owner(), 3, &spec, &InfraSettings::default());

        assert_eq!(
            deployment.metadata.name.as_deref(),
            Some("router-abababababababab")
        );
        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(3));
    }

    #[test]
    fn endpoints_follow_space_type() {
        let infra_id = InfraId::from_bytes([0xab; 8]);

        let standard = space_endpoints(AddressSpaceType::Standard, &infra_id);
        assert_eq!(standard[0].service, "messaging-abababababababab");
        assert_eq!(standard[0].port, 5672);
        assert_eq!(standard[1].port, 5671);
        assert_eq!(standard[2].service, "console-abababababababab");

        let brokered = space_endpoints(AddressSpaceType::Brokered, &infra_id);
        assert_eq!(brokered[0].service, "broker-abababababababab");
    }

    #[test]
    fn headless_service() {
        let service = build_service(
            &owner(),
            "broker-abababababababab",
            "broker",
            &[("amqp", MESSAGING_PORT)],
            true,
            &InfraSettings::default(),
        );
        let spec = service.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap()[0].port, 5672);
    }
}
