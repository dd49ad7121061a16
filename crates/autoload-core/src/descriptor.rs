//! Per-module resolution state.
//!
//! A descriptor owns the backends that resolve on behalf of one registered
//! module. Backend construction is deferred through the module's
//! [`InitScope`]; the resolve handler is live from construction on and
//! flushes the scope before it consults anything.

use crate::backend::{BackendFactory, ProbeSet, ResolutionBackend, Strategy, VersionMatching};
use crate::error::{Error, Result};
use crate::host::{LoadedModule, ResolveRequest};
use crate::init::{InitEngine, InitScope};
use crate::multiplexer::{HandlerId, ResolutionMultiplexer};
use crate::sync::lock;
use crate::tracker::DependencyTracker;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace, warn};

/// Absolute, normalized form of a probing path, used as its identity.
pub(crate) fn probing_key(path: &Path) -> Result<PathBuf> {
    autoload_util::fs::canonical_path(path).map_err(|e| Error::InvalidPath {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[derive(Default)]
struct DescriptorState {
    /// In construction order.
    backends: Vec<Arc<dyn ResolutionBackend>>,
    seen_paths: HashSet<PathBuf>,
    policy_in_force: bool,
    disposed: bool,
}

struct DescriptorInner {
    module: LoadedModule,
    tracker: DependencyTracker,
    factory: Arc<dyn BackendFactory>,
    scope: InitScope,
    state: Mutex<DescriptorState>,
}

/// Resolution state for one registered module.
pub struct ModuleDescriptor {
    inner: Arc<DescriptorInner>,
    handler: HandlerId,
    multiplexer: Arc<ResolutionMultiplexer>,
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("ModuleDescriptor")
            .field("module", &self.inner.module.identity)
            .field("handle", &self.inner.module.handle)
            .field("backends", &state.backends.len())
            .field("policy_in_force", &state.policy_in_force)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl ModuleDescriptor {
    /// Register `module` for auto-resolution.
    ///
    /// Backend setup is queued on a scope from `engine`; it runs right away
    /// only if the engine's deferred period is already over.
    pub fn new(
        module: LoadedModule,
        extra_paths: &[PathBuf],
        factory: Arc<dyn BackendFactory>,
        engine: &InitEngine,
        multiplexer: &Arc<ResolutionMultiplexer>,
    ) -> Result<Self> {
        let mut seen_paths = HashSet::new();
        let module_dir = match module.location.as_deref().and_then(Path::parent) {
            Some(dir) => {
                let dir = probing_key(dir)?;
                seen_paths.insert(dir.clone());
                Some(dir)
            }
            None => None,
        };
        let mut extra = Vec::with_capacity(extra_paths.len());
        for path in extra_paths {
            let key = probing_key(path)?;
            if seen_paths.insert(key.clone()) {
                extra.push(key);
            }
        }

        let inner = Arc::new(DescriptorInner {
            tracker: DependencyTracker::new(module.identity.clone()),
            module,
            factory,
            scope: engine.create_scope(),
            state: Mutex::new(DescriptorState {
                seen_paths,
                ..DescriptorState::default()
            }),
        });
        debug!(
            module = %inner.module.identity,
            handle = %inner.module.handle,
            extra_paths = extra.len(),
            deferred = inner.scope.is_lazy(),
            "registering module descriptor"
        );

        let weak = Arc::downgrade(&inner);
        inner.scope.enqueue(move || {
            if let Some(inner) = weak.upgrade() {
                inner.setup(module_dir, extra);
            }
            Ok(())
        })?;

        let weak: Weak<DescriptorInner> = Arc::downgrade(&inner);
        let handler = multiplexer.subscribe(move |request| weak.upgrade()?.resolve(request));

        Ok(Self {
            inner,
            handler,
            multiplexer: multiplexer.clone(),
        })
    }

    #[must_use]
    pub fn module(&self) -> &LoadedModule {
        &self.inner.module
    }

    #[must_use]
    pub fn tracker(&self) -> &DependencyTracker {
        &self.inner.tracker
    }

    /// Add probing directories, skipping ones already seen.
    ///
    /// Returns whether anything new was added. The backend for the new
    /// directories is built through the module's scope.
    pub fn add_probing_paths(&self, paths: &[PathBuf]) -> Result<bool> {
        let keys = paths
            .iter()
            .map(|p| probing_key(p))
            .collect::<Result<Vec<_>>>()?;

        let fresh: Vec<PathBuf> = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return Err(Error::Disposed);
            }
            keys.into_iter()
                .filter(|k| state.seen_paths.insert(k.clone()))
                .collect()
        };
        if fresh.is_empty() {
            trace!(module = %self.inner.module.identity, "probing paths already known");
            return Ok(false);
        }
        debug!(
            module = %self.inner.module.identity,
            paths = fresh.len(),
            "adding probing paths"
        );

        let weak = Arc::downgrade(&self.inner);
        self.inner
            .scope
            .enqueue(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.add_heuristic(fresh);
                }
                Ok(())
            })
            .map_err(|e| match e {
                Error::ScopeDiscarded => Error::Disposed,
                other => other,
            })?;
        Ok(true)
    }

    /// Run this descriptor's pending setup now.
    pub fn flush(&self) -> Result<()> {
        self.inner.scope.flush()
    }

    /// Number of constructed backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        lock(&self.inner.state).backends.len()
    }

    /// Whether a redirect policy was found for the module.
    #[must_use]
    pub fn has_policy(&self) -> bool {
        lock(&self.inner.state).policy_in_force
    }

    /// Every probing path seen so far, sorted.
    #[must_use]
    pub fn probing_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = lock(&self.inner.state).seen_paths.iter().cloned().collect();
        paths.sort();
        paths
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.state).disposed
    }

    /// Stop resolving: drop queued setup, unsubscribe and dispose backends.
    pub fn dispose(&self) {
        let backends = {
            let mut state = lock(&self.inner.state);
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.backends)
        };

        self.inner.scope.discard();
        self.multiplexer.unsubscribe(self.handler);
        for backend in &backends {
            backend.dispose();
        }
        debug!(
            module = %self.inner.module.identity,
            backends = backends.len(),
            "disposed module descriptor"
        );
    }
}

impl Drop for ModuleDescriptor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl DescriptorInner {
    fn setup(&self, module_dir: Option<PathBuf>, extra: Vec<PathBuf>) {
        let policy = match &self.module.location {
            Some(location) => match self.factory.load_policy(location) {
                Ok(policy) => policy,
                Err(e) => {
                    warn!(
                        module = %self.module.identity,
                        error = %e,
                        "ignoring redirect policy that failed to load"
                    );
                    None
                }
            },
            None => None,
        };

        let strategies = {
            let mut state = lock(&self.state);
            if state.disposed {
                return;
            }
            match policy {
                Some(policy) => {
                    state.policy_in_force = true;
                    let mut paths = extra;
                    for path in &policy.probing_paths {
                        if state.seen_paths.insert(path.clone()) {
                            paths.push(path.clone());
                        }
                    }
                    let mut strategies = vec![Strategy::Redirect(policy)];
                    if !paths.is_empty() {
                        strategies.push(Strategy::Heuristic(ProbeSet::new(paths, VersionMatching::Exact)));
                    }
                    strategies
                }
                None => {
                    let paths: Vec<PathBuf> = module_dir.into_iter().chain(extra).collect();
                    if paths.is_empty() {
                        Vec::new()
                    } else {
                        vec![Strategy::Heuristic(ProbeSet::new(paths, VersionMatching::Loose))]
                    }
                }
            }
        };

        debug!(
            module = %self.module.identity,
            backends = strategies.len(),
            "running descriptor setup"
        );
        let built = strategies.into_iter().map(|s| self.factory.build(s)).collect();
        self.install(built);
    }

    fn add_heuristic(&self, paths: Vec<PathBuf>) {
        let matching = if lock(&self.state).policy_in_force {
            VersionMatching::Exact
        } else {
            VersionMatching::Loose
        };
        let backend = self
            .factory
            .build(Strategy::Heuristic(ProbeSet::new(paths, matching)));
        self.install(vec![backend]);
    }

    fn install(&self, built: Vec<Arc<dyn ResolutionBackend>>) {
        let mut state = lock(&self.state);
        if state.disposed {
            drop(state);
            for backend in built {
                backend.dispose();
            }
            return;
        }
        state.backends.extend(built);
    }

    fn resolve(&self, request: &ResolveRequest) -> Option<LoadedModule> {
        if let Err(e) = self.scope.flush() {
            warn!(module = %self.module.identity, error = %e, "descriptor setup failed");
        }

        if self.tracker.is_resolution_inhibited(request.requester.as_ref()) {
            trace!(
                module = %self.module.identity,
                requested = %request.requested,
                "requester not tracked, declining"
            );
            return None;
        }

        let backends = {
            let state = lock(&self.state);
            if state.disposed {
                return None;
            }
            state.backends.clone()
        };

        // Registered first so resolutions nested inside the load are served.
        let newly_added = self.tracker.register_dependency(request.requested.clone());

        for backend in &backends {
            match backend.try_resolve(request) {
                Ok(Some(found)) => {
                    if found.identity != request.requested {
                        self.tracker.register_dependency(found.identity.clone());
                    }
                    debug!(
                        module = %self.module.identity,
                        requested = %request.requested,
                        resolved = %found.identity,
                        "resolved dependency"
                    );
                    return Some(found);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(
                        module = %self.module.identity,
                        requested = %request.requested,
                        error = %e,
                        "backend failed, trying next"
                    );
                }
            }
        }

        if newly_added {
            self.tracker.unregister_dependency(&request.requested);
        }
        None
    }
}
