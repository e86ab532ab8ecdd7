//! Chart values ConfigMaps in the tenant cluster
//!
//! One `<app>-values` ConfigMap per managed chart, all in kube-system.
//! Current state is read from kube-system and every extra namespace of the
//! specification, so values moved out of a namespace are cleaned up.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tenant_common::labels::APP_LABEL;
use tenant_common::{OwnerConfig, Result, KUBE_SYSTEM_NAMESPACE};
use tenant_reconcile::{
    list_owned, CancellationSignal, DeletionPolicy, ManagedObject, ObjectKey, ObjectStore,
    ResourceKind, ResourceState, StateTag,
};
use tracing::debug;

use super::cluster_labels;
use super::values::{
    to_values_json, BasicValues, CoreDnsCluster, CoreDnsKubernetes, CoreDnsValues, Enabled,
    ExporterValues, Image, IngressController, IngressControllerValues, IngressGlobal,
    IngressGlobalController,
};
use crate::kube_store::ConfigMapData;
use crate::policy::{cluster_dns_ip, temp_replicas, Capabilities, ProviderPolicy};
use crate::spec::ClusterSpecification;

/// Data key holding the values document
pub const VALUES_KEY: &str = "values.json";

/// Chart values resource kind
pub struct ConfigMapKind {
    store: Arc<dyn ObjectStore<ConfigMapData>>,
    owner: OwnerConfig,
    registry_domain: String,
}

impl ConfigMapKind {
    /// Kind writing through `store` with the managed-service owner of `policy`
    pub fn new(store: Arc<dyn ObjectStore<ConfigMapData>>, policy: &ProviderPolicy) -> Self {
        Self {
            store,
            owner: policy.managed_service_owner(),
            registry_domain: policy.registry_domain.clone(),
        }
    }

    fn image(&self) -> Image {
        Image {
            registry: self.registry_domain.clone(),
        }
    }

    fn values_map(
        &self,
        spec: &ClusterSpecification,
        app: &str,
        json: String,
    ) -> ManagedObject<ConfigMapData> {
        ManagedObject::new(
            ObjectKey::new(KUBE_SYSTEM_NAMESPACE, format!("{}-values", app)),
            ConfigMapData(BTreeMap::from([(VALUES_KEY.to_string(), json)])),
        )
        .with_labels(cluster_labels(&self.owner, spec))
        .with_label(APP_LABEL, app)
    }

    fn basic(&self, spec: &ClusterSpecification, app: &str) -> Result<ManagedObject<ConfigMapData>> {
        let json = to_values_json(app, &BasicValues { image: self.image() })?;
        Ok(self.values_map(spec, app, json))
    }

    fn exporter(&self, spec: &ClusterSpecification, app: &str) -> Result<ManagedObject<ConfigMapData>> {
        let values = ExporterValues {
            namespace: KUBE_SYSTEM_NAMESPACE.to_string(),
        };
        Ok(self.values_map(spec, app, to_values_json(app, &values)?))
    }

    fn coredns(&self, spec: &ClusterSpecification) -> Result<ManagedObject<ConfigMapData>> {
        let dns_ip = cluster_dns_ip(&spec.network.cluster_ip_range)?;
        let values = CoreDnsValues {
            cluster: CoreDnsCluster {
                kubernetes: CoreDnsKubernetes {
                    cluster_ip_range: spec.network.cluster_ip_range.clone(),
                    dns_ip: dns_ip.to_string(),
                    pod_cidr: spec.network.pod_cidr.clone(),
                },
            },
            image: self.image(),
        };
        Ok(self.values_map(spec, "coredns", to_values_json("coredns", &values)?))
    }

    fn ingress_controller(&self, spec: &ClusterSpecification) -> Result<ManagedObject<ConfigMapData>> {
        let caps = Capabilities::for_provider(spec.provider);
        let values = IngressControllerValues {
            controller: IngressController {
                replicas: spec.workers,
                service: Enabled {
                    enabled: !caps.ingress_migration,
                },
            },
            global: IngressGlobal {
                controller: IngressGlobalController {
                    temp_replicas: temp_replicas(spec.workers)?,
                    use_proxy_protocol: caps.proxy_protocol,
                },
                migration: Enabled {
                    enabled: caps.ingress_migration,
                },
            },
            image: self.image(),
        };
        let app = "nginx-ingress-controller";
        Ok(self.values_map(spec, app, to_values_json(app, &values)?))
    }
}

/// kube-system first, then the specification's namespaces without duplicates
fn scanned_namespaces(spec: &ClusterSpecification) -> Vec<String> {
    let mut namespaces = vec![KUBE_SYSTEM_NAMESPACE.to_string()];
    for ns in &spec.namespaces {
        if !namespaces.contains(ns) {
            namespaces.push(ns.clone());
        }
    }
    namespaces
}

#[async_trait]
impl ResourceKind<ClusterSpecification> for ConfigMapKind {
    type Payload = ConfigMapData;

    fn name(&self) -> &'static str {
        "configmap"
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Teardown
    }

    fn store(&self) -> &dyn ObjectStore<ConfigMapData> {
        self.store.as_ref()
    }

    async fn resolve_current(
        &self,
        spec: &ClusterSpecification,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<ConfigMapData>> {
        list_owned(self.store.as_ref(), &self.owner, &scanned_namespaces(spec), signal).await
    }

    fn resolve_desired(&self, spec: &ClusterSpecification) -> Result<ResourceState<ConfigMapData>> {
        let mut objects = vec![self.coredns(spec)];

        if spec.features.monitoring {
            objects.push(self.exporter(spec, "cert-exporter"));
            objects.push(self.basic(spec, "kube-state-metrics"));
            objects.push(self.exporter(spec, "net-exporter"));
            objects.push(self.basic(spec, "node-exporter"));
        }
        if spec.features.ingress_controller {
            objects.push(self.ingress_controller(spec));
        } else {
            debug!(cluster = %spec.cluster_id, "Ingress controller disabled, no values desired");
        }

        let objects = objects
            .into_iter()
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.in_cluster(&spec.cluster_id))?;
        ResourceState::from_objects(StateTag::Desired, objects)
    }
}
