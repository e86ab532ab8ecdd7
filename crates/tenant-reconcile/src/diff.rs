//! Differ: current state vs desired state
//!
//! Objects are matched by identity. Only the payload and the labels the
//! desired copy sets are compared; foreign labels and provider metadata never
//! cause an update. The result is a [`Patch`] whose
//! three change sets are disjoint and sorted by identity, so diffing the
//! same inputs twice yields the same patch.

use tenant_common::{Error, Result};

use crate::model::{ManagedObject, Payload, ResourceState, StateTag};

/// An object to replace, with its replacement
#[derive(Clone, Debug, PartialEq)]
pub struct Update<P> {
    /// The object as observed; supplies identity and concurrency token
    pub current: ManagedObject<P>,
    /// The replacement content
    pub desired: ManagedObject<P>,
}

/// Change kinds a resource kind performs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeKinds {
    /// Issue creates
    pub create: bool,
    /// Issue updates
    pub update: bool,
    /// Issue deletes
    pub delete: bool,
}

impl ChangeKinds {
    /// Create, update and delete
    pub const ALL: Self = Self {
        create: true,
        update: true,
        delete: true,
    };

    /// Only create missing objects
    pub const CREATE_ONLY: Self = Self {
        create: true,
        update: false,
        delete: false,
    };
}

impl Default for ChangeKinds {
    fn default() -> Self {
        Self::ALL
    }
}

/// Number of changes per change kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchCounts {
    /// Objects to create
    pub create: usize,
    /// Objects to update
    pub update: usize,
    /// Objects to delete
    pub delete: usize,
}

/// Change set transforming current state into desired state
#[derive(Clone, Debug, PartialEq)]
pub struct Patch<P> {
    /// Desired objects absent from current state
    pub to_create: Vec<ManagedObject<P>>,
    /// Objects present on both sides whose content differs
    pub to_update: Vec<Update<P>>,
    /// Current objects absent from desired state
    pub to_delete: Vec<ManagedObject<P>>,
}

impl<P> Default for Patch<P> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

impl<P: Payload> Patch<P> {
    /// Whether no change is needed
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Total number of changes
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.to_delete.len()
    }

    /// Changes per change kind
    pub fn counts(&self) -> PatchCounts {
        PatchCounts {
            create: self.to_create.len(),
            update: self.to_update.len(),
            delete: self.to_delete.len(),
        }
    }

    /// Drop change kinds the resource kind does not perform
    pub fn restrict(mut self, kinds: ChangeKinds) -> Self {
        if !kinds.create {
            self.to_create.clear();
        }
        if !kinds.update {
            self.to_update.clear();
        }
        if !kinds.delete {
            self.to_delete.clear();
        }
        self
    }
}

/// Compute the patch from `current` to `desired`
///
/// Fails only if the states are passed with the wrong tags.
pub fn diff<P: Payload>(current: &ResourceState<P>, desired: &ResourceState<P>) -> Result<Patch<P>> {
    if current.tag() != StateTag::Current || desired.tag() != StateTag::Desired {
        return Err(Error::internal_with_context(
            "differ",
            format!(
                "expected current and desired states, got {} and {}",
                current.tag(),
                desired.tag()
            ),
        ));
    }

    let mut patch = Patch::default();

    for wanted in desired.iter() {
        match current.get(&wanted.key) {
            None => patch.to_create.push(wanted.clone()),
            Some(existing) if !existing.matches_desired(wanted) => patch.to_update.push(Update {
                current: existing.clone(),
                desired: wanted.clone(),
            }),
            Some(_) => {}
        }
    }

    for existing in current.iter() {
        if !desired.contains(&existing.key) {
            patch.to_delete.push(existing.clone());
        }
    }

    Ok(patch)
}
