//! Test harness: an in-memory object store and a fixture resource kind
//!
//! [`MemoryStore`] behaves like a tenant cluster API for one object kind:
//! it assigns resource versions, reports AlreadyExists and NotFound with
//! the right classification, and can be told to fail specific calls. Every
//! call is recorded so tests can assert exactly what was issued.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tenant_common::{ApiErrorKind, Error, OwnerConfig, Result};

use crate::cancel::CancellationSignal;
use crate::diff::ChangeKinds;
use crate::model::{ManagedObject, ObjectKey, Payload, ResourceState, StateTag};
use crate::pass::{DeletionPolicy, ResourceKind, Specification};
use crate::resolve::list_owned;
use crate::store::ObjectStore;

/// Store operation, for fault injection and call recording
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    /// `list`
    List,
    /// `get`
    Get,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

impl Op {
    /// Whether the operation changes the store
    pub fn is_mutation(self) -> bool {
        matches!(self, Op::Create | Op::Update | Op::Delete)
    }
}

/// A call made against a [`MemoryStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    /// Operation
    pub op: Op,
    /// Target identity; for `list` the name is empty
    pub key: ObjectKey,
}

#[derive(Default)]
struct Faults {
    once: BTreeMap<Op, VecDeque<ApiErrorKind>>,
    always: BTreeMap<Op, ApiErrorKind>,
}

impl Faults {
    fn take(&mut self, op: Op) -> Option<ApiErrorKind> {
        if let Some(kind) = self.once.get_mut(&op).and_then(VecDeque::pop_front) {
            return Some(kind);
        }
        self.always.get(&op).copied()
    }
}

struct Inner<P> {
    objects: BTreeMap<ObjectKey, ManagedObject<P>>,
    calls: Vec<Call>,
    faults: Faults,
    next_version: u64,
}

/// In-memory object store
pub struct MemoryStore<P> {
    inner: Mutex<Inner<P>>,
}

impl<P: Payload> Default for MemoryStore<P> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                calls: Vec::new(),
                faults: Faults::default(),
                next_version: 1,
            }),
        }
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

impl<P: Payload> MemoryStore<P> {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put an object in place without recording a call
    pub fn seed(&self, object: ManagedObject<P>) {
        let mut inner = self.lock();
        let version = inner.next_version;
        inner.next_version += 1;
        let stored = stamp(object, version);
        inner.objects.insert(stored.key.clone(), stored);
    }

    /// Remove an object without recording a call, as another actor would
    pub fn remove(&self, key: &ObjectKey) -> Option<ManagedObject<P>> {
        self.lock().objects.remove(key)
    }

    /// Make the next call of `op` fail with `kind`; queued per operation
    pub fn fail_next(&self, op: Op, kind: ApiErrorKind) {
        self.lock().faults.once.entry(op).or_default().push_back(kind);
    }

    /// Make every call of `op` fail with `kind`
    pub fn fail_always(&self, op: Op, kind: ApiErrorKind) {
        self.lock().faults.always.insert(op, kind);
    }

    /// Stop failing calls
    pub fn heal(&self) {
        self.lock().faults = Faults::default();
    }

    /// Snapshot of stored objects in identity order
    pub fn objects(&self) -> Vec<ManagedObject<P>> {
        self.lock().objects.values().cloned().collect()
    }

    /// Stored object by identity
    pub fn object(&self, key: &ObjectKey) -> Option<ManagedObject<P>> {
        self.lock().objects.get(key).cloned()
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Calls that change the store (create, update, delete)
    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.op.is_mutation()).collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn begin(&self, op: Op, key: ObjectKey) -> Result<MutexGuard<'_, Inner<P>>> {
        let mut inner = self.lock();
        inner.calls.push(Call {
            op,
            key: key.clone(),
        });
        match inner.faults.take(op) {
            Some(kind) => Err(Error::store(
                format!("memory store {:?} {}", op, key),
                kind,
                "injected failure",
            )),
            None => Ok(inner),
        }
    }
}

fn stamp<P: Payload>(mut object: ManagedObject<P>, version: u64) -> ManagedObject<P> {
    let mut metadata = object.provider_metadata.take().unwrap_or_default();
    metadata.resource_version = Some(version.to_string());
    object.with_provider_metadata(metadata)
}

#[async_trait]
impl<P: Payload> ObjectStore<P> for MemoryStore<P> {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ManagedObject<P>>> {
        let inner = self.begin(Op::List, ObjectKey::new(namespace, ""))?;
        Ok(inner
            .objects
            .values()
            .filter(|o| o.namespace() == namespace && matches_selector(&o.labels, selector))
            .cloned()
            .collect())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<P>>> {
        let inner = self.begin(Op::Get, key.clone())?;
        Ok(inner.objects.get(key).cloned())
    }

    async fn create(&self, object: &ManagedObject<P>) -> Result<()> {
        let mut inner = self.begin(Op::Create, object.key.clone())?;
        if inner.objects.contains_key(&object.key) {
            return Err(Error::store(
                format!("memory store create {}", object.key),
                ApiErrorKind::AlreadyExists,
                "object already exists",
            ));
        }
        let version = inner.next_version;
        inner.next_version += 1;
        let mut stored = object.clone();
        stored.provider_metadata = None;
        inner.objects.insert(object.key.clone(), stamp(stored, version));
        Ok(())
    }

    async fn update(&self, current: &ManagedObject<P>, desired: &ManagedObject<P>) -> Result<()> {
        let mut inner = self.begin(Op::Update, current.key.clone())?;
        let version = inner.next_version;
        match inner.objects.get_mut(&current.key) {
            Some(stored) => {
                stored.labels = desired.labels.clone();
                stored.payload = desired.payload.clone();
                let mut metadata = stored.provider_metadata.take().unwrap_or_default();
                metadata.resource_version = Some(version.to_string());
                stored.provider_metadata = Some(metadata);
            }
            None => {
                return Err(Error::store(
                    format!("memory store update {}", current.key),
                    ApiErrorKind::NotFound,
                    "object not found",
                ))
            }
        }
        inner.next_version += 1;
        Ok(())
    }

    async fn delete(&self, object: &ManagedObject<P>) -> Result<()> {
        let mut inner = self.begin(Op::Delete, object.key.clone())?;
        match inner.objects.remove(&object.key) {
            Some(_) => Ok(()),
            None => Err(Error::store(
                format!("memory store delete {}", object.key),
                ApiErrorKind::NotFound,
                "object not found",
            )),
        }
    }
}

/// Specification with a fixed cluster id and deletion flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticSpec {
    /// Cluster id
    pub cluster_id: String,
    /// Deletion timestamp present
    pub deleted: bool,
}

impl StaticSpec {
    /// Live specification for `cluster_id`
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            deleted: false,
        }
    }

    /// Same specification marked for deletion
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}

impl Specification for StaticSpec {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Resource kind whose desired state is a fixed list of objects
///
/// Current state is listed from its [`MemoryStore`] across the namespaces
/// of the desired objects plus any extra namespaces given.
pub struct FixtureKind<P> {
    name: &'static str,
    policy: DeletionPolicy,
    changes: ChangeKinds,
    owner: OwnerConfig,
    namespaces: Vec<String>,
    desired: Vec<ManagedObject<P>>,
    store: MemoryStore<P>,
}

impl<P: Payload> FixtureKind<P> {
    /// Kind with a Teardown policy, all change kinds and the default owner
    pub fn new(name: &'static str, namespaces: &[&str]) -> Self {
        Self {
            name,
            policy: DeletionPolicy::Teardown,
            changes: ChangeKinds::ALL,
            owner: OwnerConfig::default(),
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
            desired: Vec::new(),
            store: MemoryStore::new(),
        }
    }

    /// Set the deletion policy
    pub fn with_policy(mut self, policy: DeletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Restrict change kinds
    pub fn with_changes(mut self, changes: ChangeKinds) -> Self {
        self.changes = changes;
        self
    }

    /// Objects to desire; owner labels are added
    pub fn with_desired(mut self, desired: Vec<ManagedObject<P>>) -> Self {
        self.set_desired(desired);
        self
    }

    /// Replace the desired objects; owner labels are added
    pub fn set_desired(&mut self, desired: Vec<ManagedObject<P>>) {
        let owner_labels = self.owner.owner_labels();
        self.desired = desired
            .into_iter()
            .map(|mut o| {
                o.labels.extend(owner_labels.clone());
                o
            })
            .collect();
    }

    /// The backing store
    pub fn memory(&self) -> &MemoryStore<P> {
        &self.store
    }

    /// An owned object as this kind would create it
    pub fn owned(&self, key: ObjectKey, payload: P) -> ManagedObject<P> {
        ManagedObject::new(key, payload).with_labels(self.owner.owner_labels())
    }
}

#[async_trait]
impl<P: Payload> ResourceKind<StaticSpec> for FixtureKind<P> {
    type Payload = P;

    fn name(&self) -> &'static str {
        self.name
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        self.policy
    }

    fn changes(&self) -> ChangeKinds {
        self.changes
    }

    fn store(&self) -> &dyn ObjectStore<P> {
        &self.store
    }

    async fn resolve_current(
        &self,
        _spec: &StaticSpec,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<P>> {
        list_owned(&self.store, &self.owner, &self.namespaces, signal).await
    }

    fn resolve_desired(&self, _spec: &StaticSpec) -> Result<ResourceState<P>> {
        ResourceState::from_objects(StateTag::Desired, self.desired.iter().cloned())
    }
}
