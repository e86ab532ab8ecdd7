//! Managed object model
//!
//! A [`ManagedObject`] is one owned sub-resource of a tenant cluster: its
//! identity, its labels and a typed payload. Objects are values; a pass
//! builds fresh collections every time and never mutates what it read.

use std::collections::BTreeMap;
use std::fmt;

use tenant_common::{Error, Result};

/// Bound for payload types carried by managed objects
///
/// Equality over the payload is what the differ compares, so `PartialEq`
/// must cover exactly the fields the controller sets.
pub trait Payload: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {}

impl<T> Payload for T where T: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {}

/// Identity of a managed object within one resource kind
///
/// Cluster-scoped objects use an empty namespace.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    /// Namespace, empty for cluster-scoped objects
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key for a namespaced object
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object
    pub fn cluster_scoped(name: impl Into<String>) -> Self {
        Self::new("", name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Fields the object store fills in on read
///
/// Never part of desired state and never compared by the differ.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderMetadata {
    /// Optimistic concurrency token used when replacing the object
    pub resource_version: Option<String>,
    /// Version reported by the provider (e.g. an installed release version)
    pub version: Option<String>,
    /// Status reported by the provider (e.g. "deployed")
    pub status: Option<String>,
}

/// One owned sub-resource: identity, labels and payload
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedObject<P> {
    /// Identity
    pub key: ObjectKey,
    /// Ownership and selection labels
    pub labels: BTreeMap<String, String>,
    /// The resource content
    pub payload: P,
    /// Read-back data from the store, `None` for desired objects
    pub provider_metadata: Option<ProviderMetadata>,
}

impl<P: Payload> ManagedObject<P> {
    /// New object without labels
    pub fn new(key: ObjectKey, payload: P) -> Self {
        Self {
            key,
            labels: BTreeMap::new(),
            payload,
            provider_metadata: None,
        }
    }

    /// Replace all labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Add a single label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Attach read-back metadata
    pub fn with_provider_metadata(mut self, metadata: ProviderMetadata) -> Self {
        self.provider_metadata = Some(metadata);
        self
    }

    /// Namespace of the object
    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    /// Name of the object
    pub fn name(&self) -> &str {
        &self.key.name
    }

    /// Resource version from read-back metadata, if any
    pub fn resource_version(&self) -> Option<&str> {
        self.provider_metadata
            .as_ref()
            .and_then(|m| m.resource_version.as_deref())
    }

    /// Whether this copy carries every controller-set field of `desired`
    ///
    /// Payloads must be equal and every label of `desired` must be present
    /// with the same value. Labels only this copy carries were added by
    /// someone else (admission webhooks, other controllers) and are ignored,
    /// as is provider metadata.
    pub fn matches_desired(&self, desired: &Self) -> bool {
        self.payload == desired.payload
            && desired
                .labels
                .iter()
                .all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Which side of a diff a [`ResourceState`] describes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateTag {
    /// Observed in the tenant cluster
    Current,
    /// Computed from the specification
    Desired,
}

impl fmt::Display for StateTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateTag::Current => f.write_str("current"),
            StateTag::Desired => f.write_str("desired"),
        }
    }
}

/// Collection of managed objects for one kind, one cluster and one pass
///
/// Identities are unique; iteration is ordered by identity.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceState<P> {
    tag: StateTag,
    objects: BTreeMap<ObjectKey, ManagedObject<P>>,
}

impl<P: Payload> ResourceState<P> {
    /// Empty state with the given tag
    pub fn new(tag: StateTag) -> Self {
        Self {
            tag,
            objects: BTreeMap::new(),
        }
    }

    /// Empty current state
    pub fn current() -> Self {
        Self::new(StateTag::Current)
    }

    /// Empty desired state
    pub fn desired() -> Self {
        Self::new(StateTag::Desired)
    }

    /// Build a state from objects, rejecting duplicate identities
    pub fn from_objects(
        tag: StateTag,
        objects: impl IntoIterator<Item = ManagedObject<P>>,
    ) -> Result<Self> {
        let mut state = Self::new(tag);
        for object in objects {
            state.insert(object)?;
        }
        Ok(state)
    }

    /// Add an object; a second object with the same identity is an error
    pub fn insert(&mut self, object: ManagedObject<P>) -> Result<()> {
        if self.objects.contains_key(&object.key) {
            return Err(Error::internal_with_context(
                format!("{} state", self.tag),
                format!("duplicate identity {}", object.key),
            ));
        }
        self.objects.insert(object.key.clone(), object);
        Ok(())
    }

    /// Which side this state describes
    pub fn tag(&self) -> StateTag {
        self.tag
    }

    /// Look up an object by identity
    pub fn get(&self, key: &ObjectKey) -> Option<&ManagedObject<P>> {
        self.objects.get(key)
    }

    /// Whether an identity is present
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the state holds no objects
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Objects in identity order
    pub fn iter(&self) -> impl Iterator<Item = &ManagedObject<P>> {
        self.objects.values()
    }

    /// Consume into objects in identity order
    pub fn into_objects(self) -> Vec<ManagedObject<P>> {
        self.objects.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(ns: &str, name: &str, payload: &str) -> ManagedObject<String> {
        ManagedObject::new(ObjectKey::new(ns, name), payload.to_string())
    }

    #[test]
    fn test_key_display() {
        assert_eq!(ObjectKey::new("kube-system", "coredns").to_string(), "kube-system/coredns");
        assert_eq!(ObjectKey::cluster_scoped("tenant-system").to_string(), "tenant-system");
    }

    #[test]
    fn test_keys_order_by_namespace_then_name() {
        let mut keys = vec![
            ObjectKey::new("b", "a"),
            ObjectKey::new("a", "z"),
            ObjectKey::new("a", "b"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ObjectKey::new("a", "b"),
                ObjectKey::new("a", "z"),
                ObjectKey::new("b", "a"),
            ]
        );
    }

    #[test]
    fn test_matches_desired_ignores_provider_metadata() {
        let desired = obj("ns", "a", "v1").with_label("app", "x");
        let current = desired.clone().with_provider_metadata(ProviderMetadata {
            resource_version: Some("42".to_string()),
            version: Some("1.0.0".to_string()),
            status: Some("deployed".to_string()),
        });
        assert!(current.matches_desired(&desired));
        assert_ne!(desired, current);
        assert_eq!(current.resource_version(), Some("42"));
    }

    #[test]
    fn test_matches_desired_compares_labels_and_payload() {
        let a = obj("ns", "a", "v1").with_label("app", "x");
        assert!(!a.matches_desired(&obj("ns", "a", "v2").with_label("app", "x")));
        assert!(!a.matches_desired(&obj("ns", "a", "v1").with_label("app", "y")));
        assert!(!obj("ns", "a", "v1").matches_desired(&a));
    }

    #[test]
    fn test_matches_desired_ignores_labels_set_by_others() {
        let desired = obj("ns", "a", "v1").with_label("app", "x");
        let current = desired.clone().with_label("webhook.example.com/injected", "true");
        assert!(current.matches_desired(&desired));
        assert!(!desired.matches_desired(&current));
    }

    #[test]
    fn test_state_rejects_duplicate_identity() {
        let mut state = ResourceState::desired();
        state.insert(obj("ns", "a", "v1")).unwrap();
        let err = state.insert(obj("ns", "a", "v2")).unwrap_err();
        assert_eq!(err.context(), Some("desired state"));
        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&ObjectKey::new("ns", "a")).map(|o| o.payload.as_str()), Some("v1"));
    }

    #[test]
    fn test_same_name_in_different_namespaces_is_distinct() {
        let state = ResourceState::from_objects(
            StateTag::Current,
            vec![obj("a", "values", "1"), obj("b", "values", "1")],
        )
        .unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state.tag(), StateTag::Current);
    }

    #[test]
    fn test_iteration_is_ordered_by_identity() {
        let state = ResourceState::from_objects(
            StateTag::Desired,
            vec![obj("ns", "c", ""), obj("ns", "a", ""), obj("ns", "b", "")],
        )
        .unwrap();
        let names: Vec<_> = state.iter().map(|o| o.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
