//! Object stores over the Kubernetes API
//!
//! [`KubeStore`] adapts a typed kube `Api` to the engine's [`ObjectStore`]
//! trait. Each payload type says which resource it maps to and how the
//! controller-set fields move between the two; everything else in the
//! resource (status, server defaults) is dropped on read so the differ
//! never sees it.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tenant_common::crd::{App, AppSpec};
use tenant_common::{Error, Result};
use tenant_reconcile::{ManagedObject, ObjectKey, ObjectStore, Payload, ProviderMetadata};
use tracing::debug;

/// A payload that round-trips through one Kubernetes resource type
pub trait KubePayload: Payload {
    /// The Kubernetes resource
    type Resource: Resource<DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static;

    /// Kind name used in error context
    const KIND: &'static str;

    /// Api handle for a namespace; cluster-scoped kinds ignore it
    fn api(client: Client, namespace: &str) -> Api<Self::Resource>;

    /// Controller-set fields of a resource
    fn from_resource(resource: &Self::Resource) -> Self;

    /// Resource carrying this payload
    fn into_resource(self, metadata: ObjectMeta) -> Self::Resource;

    /// Read-back fields other than the resource version
    fn read_back(_resource: &Self::Resource) -> ProviderMetadata {
        ProviderMetadata::default()
    }
}

/// Convert a read resource into a managed object
///
/// All server-side labels are kept; the differ only compares the ones the
/// desired copy sets.
pub fn to_managed<P: KubePayload>(resource: &P::Resource) -> ManagedObject<P> {
    let key = ObjectKey::new(resource.namespace().unwrap_or_default(), resource.name_any());
    let mut metadata = P::read_back(resource);
    metadata.resource_version = resource.resource_version();

    ManagedObject::new(key, P::from_resource(resource))
        .with_labels(resource.labels().clone())
        .with_provider_metadata(metadata)
}

/// Convert a managed object into a resource for writing
///
/// `resource_version` comes from the current copy on update.
pub fn to_resource<P: KubePayload>(
    object: &ManagedObject<P>,
    resource_version: Option<String>,
) -> P::Resource {
    let metadata = ObjectMeta {
        name: Some(object.name().to_string()),
        namespace: (!object.namespace().is_empty()).then(|| object.namespace().to_string()),
        labels: (!object.labels.is_empty()).then(|| object.labels.clone()),
        resource_version,
        ..Default::default()
    };
    object.payload.clone().into_resource(metadata)
}

/// [`ObjectStore`] backed by a kube client
pub struct KubeStore<P> {
    client: Client,
    _payload: PhantomData<fn() -> P>,
}

impl<P> KubeStore<P> {
    /// Store writing through `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _payload: PhantomData,
        }
    }
}

impl<P> Clone for KubeStore<P> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

#[async_trait]
impl<P: KubePayload> ObjectStore<P> for KubeStore<P> {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ManagedObject<P>>> {
        let api = P::api(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::from(e).with_context(format!("list {} in {:?}", P::KIND, namespace)))?;
        debug!(kind = P::KIND, namespace = %namespace, count = list.items.len(), "Listed objects");
        Ok(list.items.iter().map(to_managed::<P>).collect())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<P>>> {
        let api = P::api(self.client.clone(), &key.namespace);
        let resource = api
            .get_opt(&key.name)
            .await
            .map_err(|e| Error::from(e).with_context(format!("get {} {}", P::KIND, key)))?;
        Ok(resource.as_ref().map(to_managed::<P>))
    }

    async fn create(&self, object: &ManagedObject<P>) -> Result<()> {
        let api = P::api(self.client.clone(), object.namespace());
        api.create(&PostParams::default(), &to_resource(object, None))
            .await
            .map_err(|e| Error::from(e).with_context(format!("create {} {}", P::KIND, object.key)))?;
        Ok(())
    }

    async fn update(&self, current: &ManagedObject<P>, desired: &ManagedObject<P>) -> Result<()> {
        let api = P::api(self.client.clone(), current.namespace());
        let mut resource = to_resource(desired, current.resource_version().map(String::from));
        // Identity always comes from the object being replaced
        resource.meta_mut().name = Some(current.name().to_string());
        api.replace(current.name(), &PostParams::default(), &resource)
            .await
            .map_err(|e| Error::from(e).with_context(format!("update {} {}", P::KIND, current.key)))?;
        Ok(())
    }

    async fn delete(&self, object: &ManagedObject<P>) -> Result<()> {
        let api = P::api(self.client.clone(), object.namespace());
        api.delete(object.name(), &DeleteParams::default())
            .await
            .map_err(|e| Error::from(e).with_context(format!("delete {} {}", P::KIND, object.key)))?;
        Ok(())
    }
}

/// String data of a ConfigMap
///
/// A ConfigMap without data reads back as an empty map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigMapData(pub BTreeMap<String, String>);

impl KubePayload for ConfigMapData {
    type Resource = ConfigMap;
    const KIND: &'static str = "configmap";

    fn api(client: Client, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(client, namespace)
    }

    fn from_resource(resource: &ConfigMap) -> Self {
        Self(resource.data.clone().unwrap_or_default())
    }

    fn into_resource(self, metadata: ObjectMeta) -> ConfigMap {
        ConfigMap {
            metadata,
            data: Some(self.0),
            ..Default::default()
        }
    }
}

/// Binary data of a Secret
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretData(pub BTreeMap<String, Vec<u8>>);

impl Debug for SecretData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

impl KubePayload for SecretData {
    type Resource = Secret;
    const KIND: &'static str = "secret";

    fn api(client: Client, namespace: &str) -> Api<Secret> {
        Api::namespaced(client, namespace)
    }

    fn from_resource(resource: &Secret) -> Self {
        Self(
            resource
                .data
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.0.clone()))
                .collect(),
        )
    }

    fn into_resource(self, metadata: ObjectMeta) -> Secret {
        Secret {
            metadata,
            data: Some(self.0.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
            ..Default::default()
        }
    }
}

/// A namespace carries no controller-set fields beyond its labels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NamespacePayload;

impl KubePayload for NamespacePayload {
    type Resource = Namespace;
    const KIND: &'static str = "namespace";

    fn api(client: Client, _namespace: &str) -> Api<Namespace> {
        Api::all(client)
    }

    fn from_resource(_resource: &Namespace) -> Self {
        NamespacePayload
    }

    fn into_resource(self, metadata: ObjectMeta) -> Namespace {
        Namespace {
            metadata,
            ..Default::default()
        }
    }
}

impl KubePayload for AppSpec {
    type Resource = App;
    const KIND: &'static str = "app";

    fn api(client: Client, namespace: &str) -> Api<App> {
        Api::namespaced(client, namespace)
    }

    fn from_resource(resource: &App) -> Self {
        resource.spec.clone()
    }

    fn into_resource(self, metadata: ObjectMeta) -> App {
        App {
            metadata,
            spec: self,
            status: None,
        }
    }

    fn read_back(resource: &App) -> ProviderMetadata {
        let status = resource.status.as_ref();
        ProviderMetadata {
            resource_version: None,
            version: status.and_then(|s| s.version.clone()),
            status: status
                .and_then(|s| s.release.as_ref())
                .and_then(|r| r.status.clone()),
        }
    }
}
