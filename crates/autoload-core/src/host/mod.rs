//! Seams to the hosting runtime.
//!
//! The host owns the single "cannot find module" hook and the primitives for
//! reading and loading module files. The engine only ever talks to it through
//! [`ResolutionHost`] and [`ModuleLoader`].

mod in_process;

pub use in_process::InProcessHost;

use crate::error::Result;
use crate::identity::ModuleIdentity;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runtime handle of one loaded module instance.
///
/// The same identity may be loaded more than once; each load gets its own handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleHandle(pub u64);

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A module the host has loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub handle: ModuleHandle,
    pub identity: ModuleIdentity,
    /// On-disk location, if the module came from a file.
    pub location: Option<PathBuf>,
}

/// A failed lookup reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    /// The identity that could not be found.
    pub requested: ModuleIdentity,
    /// Identity of the module whose reference failed, when known.
    pub requester: Option<ModuleIdentity>,
}

impl ResolveRequest {
    #[must_use]
    pub fn new(requested: ModuleIdentity) -> Self {
        Self {
            requested,
            requester: None,
        }
    }

    #[must_use]
    pub fn from_requester(mut self, requester: ModuleIdentity) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// Callback installed into the host's failure slot.
pub type HostHook = Arc<dyn Fn(&ResolveRequest) -> Option<LoadedModule> + Send + Sync>;

/// The hosting runtime's side of resolution.
pub trait ResolutionHost: Send + Sync {
    /// Install `hook` into the host's single failure slot.
    fn attach(&self, hook: HostHook);

    /// Clear the failure slot.
    fn detach(&self);

    /// Look up a loaded module by handle.
    fn describe(&self, handle: ModuleHandle) -> Option<LoadedModule>;
}

/// Module-load primitives used by file-system backends.
pub trait ModuleLoader: Send + Sync {
    /// Read the identity of the module stored at `path` without loading it.
    fn read_identity(&self, path: &Path) -> Result<ModuleIdentity>;

    /// Load the module stored at `path`.
    fn load(&self, path: &Path) -> Result<LoadedModule>;
}
