//! Per-module dependency tracking.
//!
//! A registered module only resolves on behalf of itself and of the
//! dependencies that were actually loaded through it.

use crate::identity::ModuleIdentity;
use crate::sync::lock;
use std::collections::HashSet;
use std::sync::Mutex;

/// The set of identities a descriptor may resolve for.
#[derive(Debug)]
pub struct DependencyTracker {
    members: Mutex<HashSet<ModuleIdentity>>,
}

impl DependencyTracker {
    /// Create a tracker seeded with the owning module's identity.
    #[must_use]
    pub fn new(owner: ModuleIdentity) -> Self {
        Self {
            members: Mutex::new(HashSet::from([owner])),
        }
    }

    /// True unless the requester is unknown or is a tracked member.
    #[must_use]
    pub fn is_resolution_inhibited(&self, requester: Option<&ModuleIdentity>) -> bool {
        requester.is_some_and(|r| !lock(&self.members).contains(r))
    }

    /// Track `identity`. Returns whether it was newly added.
    pub fn register_dependency(&self, identity: ModuleIdentity) -> bool {
        lock(&self.members).insert(identity)
    }

    /// Stop tracking `identity`, typically because loading it failed.
    pub fn unregister_dependency(&self, identity: &ModuleIdentity) -> bool {
        lock(&self.members).remove(identity)
    }

    #[must_use]
    pub fn contains(&self, identity: &ModuleIdentity) -> bool {
        lock(&self.members).contains(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.members).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.members).is_empty()
    }

    /// Tracked identities, sorted by their textual form.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModuleIdentity> {
        let mut members: Vec<_> = lock(&self.members).iter().cloned().collect();
        members.sort_by_key(ToString::to_string);
        members
    }
}
