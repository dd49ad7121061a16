//! The auto-loader front-end.
//!
//! Application code registers modules and bare probing directories here;
//! everything else is wired up behind it.

use crate::backend::{BackendFactory, ProbeSet, ResolutionBackend, Strategy, VersionMatching};
use crate::config::LoaderConfig;
use crate::descriptor::{probing_key, ModuleDescriptor};
use crate::error::{Error, Result};
use crate::host::ModuleHandle;
use crate::init::{InitEngine, InitGate};
use crate::multiplexer::{HandlerId, ResolutionMultiplexer};
use crate::sync::lock;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, trace};

static DEFAULT: OnceLock<AutoLoader> = OnceLock::new();

/// A probing directory registered without an owning module.
struct PathRegistration {
    backend: Arc<dyn ResolutionBackend>,
    handler: HandlerId,
}

/// Registers modules and probing paths for automatic resolution.
pub struct AutoLoader {
    multiplexer: Arc<ResolutionMultiplexer>,
    factory: Arc<dyn BackendFactory>,
    engine: InitEngine,
    modules: Mutex<HashMap<ModuleHandle, Arc<ModuleDescriptor>>>,
    paths: Mutex<HashMap<PathBuf, PathRegistration>>,
    disposed: AtomicBool,
    is_default: bool,
}

impl std::fmt::Debug for AutoLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoLoader")
            .field("modules", &lock(&self.modules).len())
            .field("paths", &lock(&self.paths).len())
            .field("engine", &self.engine)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .field("default", &self.is_default)
            .finish()
    }
}

impl AutoLoader {
    /// Create a loader. With deferred initialization on, setup waits on the
    /// process-wide [`InitGate`].
    #[must_use]
    pub fn new(
        multiplexer: Arc<ResolutionMultiplexer>,
        factory: Arc<dyn BackendFactory>,
        config: &LoaderConfig,
    ) -> Self {
        Self::with_gate(multiplexer, factory, Self::gate_for(config))
    }

    /// Create a loader whose deferred setup waits on `gate`.
    #[must_use]
    pub fn with_gate(
        multiplexer: Arc<ResolutionMultiplexer>,
        factory: Arc<dyn BackendFactory>,
        gate: Arc<InitGate>,
    ) -> Self {
        Self::build(multiplexer, factory, gate, false)
    }

    /// Install the process-wide default loader.
    ///
    /// The default loader lives for the rest of the process and ignores
    /// [`dispose`](Self::dispose).
    pub fn install_default(
        multiplexer: Arc<ResolutionMultiplexer>,
        factory: Arc<dyn BackendFactory>,
        config: &LoaderConfig,
    ) -> Result<&'static AutoLoader> {
        let mut installed = false;
        let loader = DEFAULT.get_or_init(|| {
            installed = true;
            Self::build(multiplexer, factory, Self::gate_for(config), true)
        });
        if installed {
            debug!("installed default auto-loader");
            Ok(loader)
        } else {
            Err(Error::DefaultAlreadyInstalled)
        }
    }

    /// The process-wide default loader, if one was installed.
    #[must_use]
    pub fn default_instance() -> Option<&'static AutoLoader> {
        DEFAULT.get()
    }

    fn gate_for(config: &LoaderConfig) -> Arc<InitGate> {
        if config.defer_initialization {
            InitGate::global()
        } else {
            Arc::new(InitGate::completed())
        }
    }

    fn build(
        multiplexer: Arc<ResolutionMultiplexer>,
        factory: Arc<dyn BackendFactory>,
        gate: Arc<InitGate>,
        is_default: bool,
    ) -> Self {
        let engine = InitEngine::attached(gate, &multiplexer);
        Self {
            multiplexer,
            factory,
            engine,
            modules: Mutex::new(HashMap::new()),
            paths: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
            is_default,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Register the module behind `handle`, probing `extra_paths` as well.
    ///
    /// Returns `false` when the module was already registered; its probing
    /// paths are merged with `extra_paths` in that case.
    pub fn add_module<I, P>(&self, handle: ModuleHandle, extra_paths: I) -> Result<bool>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.ensure_live()?;
        let extra: Vec<PathBuf> = extra_paths
            .into_iter()
            .map(|p| p.as_ref().to_path_buf())
            .collect();

        if let Some(existing) = self.descriptor(handle) {
            existing.add_probing_paths(&extra)?;
            return Ok(false);
        }

        // Built without holding the table lock: with an eager scope this
        // runs setup, which reads the policy file.
        let module = self
            .multiplexer
            .host()
            .describe(handle)
            .ok_or(Error::UnknownModule(handle))?;
        let descriptor = Arc::new(ModuleDescriptor::new(
            module,
            &extra,
            self.factory.clone(),
            &self.engine,
            &self.multiplexer,
        )?);

        let existing = {
            let mut modules = lock(&self.modules);
            if self.disposed.load(Ordering::Acquire) {
                drop(modules);
                descriptor.dispose();
                return Err(Error::Disposed);
            }
            match modules.entry(handle) {
                Entry::Occupied(entry) => Some(entry.get().clone()),
                Entry::Vacant(entry) => {
                    entry.insert(descriptor.clone());
                    None
                }
            }
        };

        match existing {
            Some(existing) => {
                trace!(handle = %handle, "lost registration race, merging paths");
                descriptor.dispose();
                existing.add_probing_paths(&extra)?;
                Ok(false)
            }
            None => {
                debug!(handle = %handle, "module added");
                Ok(true)
            }
        }
    }

    /// Unregister the module behind `handle`. Returns whether it was registered.
    pub fn remove_module(&self, handle: ModuleHandle) -> Result<bool> {
        self.ensure_live()?;
        let removed = lock(&self.modules).remove(&handle);
        match removed {
            Some(descriptor) => {
                descriptor.dispose();
                debug!(handle = %handle, "module removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Register a bare probing directory. Returns `false` if it already was.
    pub fn add_probing_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.ensure_live()?;
        let key = probing_key(path.as_ref())?;

        let mut paths = lock(&self.paths);
        if paths.contains_key(&key) {
            return Ok(false);
        }

        let backend = self.factory.build(Strategy::Heuristic(ProbeSet::new(
            vec![key.clone()],
            VersionMatching::Loose,
        )));
        let answering = backend.clone();
        let handler = self.multiplexer.subscribe(move |request| {
            match answering.try_resolve(request) {
                Ok(found) => found,
                Err(e) => {
                    debug!(requested = %request.requested, error = %e, "probing path backend failed");
                    None
                }
            }
        });
        debug!(path = %key.display(), "probing path added");
        paths.insert(key, PathRegistration { backend, handler });
        Ok(true)
    }

    /// Unregister a bare probing directory. Returns whether it was registered.
    pub fn remove_probing_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.ensure_live()?;
        let key = probing_key(path.as_ref())?;

        let removed = lock(&self.paths).remove(&key);
        match removed {
            Some(registration) => {
                self.release_path(&registration);
                debug!(path = %key.display(), "probing path removed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run all pending deferred setup now.
    pub fn flush(&self) -> Result<()> {
        self.ensure_live()?;
        self.engine.flush()
    }

    #[must_use]
    pub fn is_registered(&self, handle: ModuleHandle) -> bool {
        lock(&self.modules).contains_key(&handle)
    }

    #[must_use]
    pub fn module_count(&self) -> usize {
        lock(&self.modules).len()
    }

    /// The descriptor registered for `handle`.
    #[must_use]
    pub fn descriptor(&self, handle: ModuleHandle) -> Option<Arc<ModuleDescriptor>> {
        lock(&self.modules).get(&handle).cloned()
    }

    /// Registered bare probing paths, sorted.
    #[must_use]
    pub fn probing_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = lock(&self.paths).keys().cloned().collect();
        paths.sort();
        paths
    }

    #[must_use]
    pub fn engine(&self) -> &InitEngine {
        &self.engine
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Unregister everything. Later calls fail with [`Error::Disposed`].
    ///
    /// A no-op on the default instance.
    pub fn dispose(&self) {
        if self.is_default {
            debug!("ignoring dispose of the default auto-loader");
            return;
        }
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        let modules: Vec<_> = lock(&self.modules).drain().map(|(_, d)| d).collect();
        let paths: Vec<_> = lock(&self.paths).drain().map(|(_, r)| r).collect();
        for descriptor in &modules {
            descriptor.dispose();
        }
        for registration in &paths {
            self.release_path(registration);
        }
        self.engine.unsubscribe();
        debug!(
            modules = modules.len(),
            paths = paths.len(),
            "auto-loader disposed"
        );
    }

    fn release_path(&self, registration: &PathRegistration) {
        self.multiplexer.unsubscribe(registration.handler);
        registration.backend.dispose();
    }
}

impl Drop for AutoLoader {
    fn drop(&mut self) {
        self.dispose();
    }
}
