//! In-memory host runtime.
//!
//! Module files are JSON documents holding a [`ModuleIdentity`]:
//! `{"name": "Lib", "version": "1.2.0.0"}`. Loading the same file twice
//! returns the same handle.

use super::{HostHook, LoadedModule, ModuleHandle, ModuleLoader, ResolutionHost, ResolveRequest};
use crate::error::{Error, Result};
use crate::identity::ModuleIdentity;
use crate::sync::{read, write};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct Modules {
    by_handle: HashMap<ModuleHandle, LoadedModule>,
    by_path: HashMap<PathBuf, ModuleHandle>,
}

/// Host runtime that keeps loaded modules in memory.
#[derive(Default)]
pub struct InProcessHost {
    hook: RwLock<Option<HostHook>>,
    modules: RwLock<Modules>,
    next_handle: AtomicU64,
    attach_count: AtomicUsize,
}

impl std::fmt::Debug for InProcessHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessHost")
            .field("hooked", &self.is_hooked())
            .field("modules", &read(&self.modules).by_handle.len())
            .finish()
    }
}

impl InProcessHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a module loaded by some other means.
    pub fn register(&self, identity: ModuleIdentity, location: Option<PathBuf>) -> LoadedModule {
        let mut modules = write(&self.modules);
        if let Some(handle) = location.as_ref().and_then(|p| modules.by_path.get(p)) {
            return modules.by_handle[handle].clone();
        }

        let handle = ModuleHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1);
        let module = LoadedModule {
            handle,
            identity,
            location: location.clone(),
        };
        if let Some(path) = location {
            modules.by_path.insert(path, handle);
        }
        modules.by_handle.insert(handle, module.clone());
        module
    }

    /// Answer a lookup: an already-loaded exact match wins, otherwise the
    /// failure is reported through the installed hook.
    pub fn resolve(&self, request: &ResolveRequest) -> Option<LoadedModule> {
        let loaded = read(&self.modules)
            .by_handle
            .values()
            .find(|m| m.identity == request.requested)
            .cloned();
        if loaded.is_some() {
            return loaded;
        }

        let hook = read(&self.hook).clone()?;
        debug!(requested = %request.requested, "module not found, invoking resolution hook");
        hook(request)
    }

    /// Whether a hook is currently installed.
    #[must_use]
    pub fn is_hooked(&self) -> bool {
        read(&self.hook).is_some()
    }

    /// How many times a hook has been installed.
    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.attach_count.load(Ordering::Relaxed)
    }

    /// All loaded modules, ordered by handle.
    #[must_use]
    pub fn loaded(&self) -> Vec<LoadedModule> {
        let mut modules: Vec<_> = read(&self.modules).by_handle.values().cloned().collect();
        modules.sort_by_key(|m| m.handle);
        modules
    }
}

impl ResolutionHost for InProcessHost {
    fn attach(&self, hook: HostHook) {
        self.attach_count.fetch_add(1, Ordering::Relaxed);
        *write(&self.hook) = Some(hook);
    }

    fn detach(&self) {
        *write(&self.hook) = None;
    }

    fn describe(&self, handle: ModuleHandle) -> Option<LoadedModule> {
        read(&self.modules).by_handle.get(&handle).cloned()
    }
}

impl ModuleLoader for InProcessHost {
    fn read_identity(&self, path: &Path) -> Result<ModuleIdentity> {
        let content = autoload_util::fs::read_to_string_lossy(path)?;
        serde_json::from_str(&content).map_err(|e| Error::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    fn load(&self, path: &Path) -> Result<LoadedModule> {
        let location = autoload_util::fs::canonical_path(path)?;
        let existing = {
            let modules = read(&self.modules);
            modules
                .by_path
                .get(&location)
                .map(|handle| modules.by_handle[handle].clone())
        };
        if let Some(module) = existing {
            return Ok(module);
        }
        let identity = self.read_identity(&location)?;
        debug!(module = %identity, path = %location.display(), "loaded module");
        Ok(self.register(identity, Some(location)))
    }
}
