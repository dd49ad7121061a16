#![allow(dead_code)]

use autoload_core::{
    AutoLoader, BackendFactory, FsBackendFactory, InProcessHost, InitGate, LoaderConfig,
    ModuleIdentity, RedirectPolicy, ResolutionBackend, ResolutionMultiplexer, Strategy,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// File-system factory that records every strategy it builds.
pub struct RecordingFactory {
    inner: FsBackendFactory,
    pub built: Mutex<Vec<Strategy>>,
}

impl RecordingFactory {
    pub fn new(host: &Arc<InProcessHost>) -> Arc<Self> {
        Arc::new(Self {
            inner: FsBackendFactory::new(host.clone(), &LoaderConfig::default()),
            built: Mutex::new(Vec::new()),
        })
    }

    pub fn built(&self) -> Vec<Strategy> {
        self.built.lock().unwrap().clone()
    }

    /// Every path covered by a heuristic backend, in build order.
    pub fn heuristic_paths(&self) -> Vec<PathBuf> {
        self.built()
            .into_iter()
            .filter_map(|s| match s {
                Strategy::Heuristic(probe) => Some(probe.paths),
                Strategy::Redirect(_) => None,
            })
            .flatten()
            .collect()
    }
}

impl BackendFactory for RecordingFactory {
    fn load_policy(&self, module_location: &Path) -> autoload_core::Result<Option<RedirectPolicy>> {
        self.inner.load_policy(module_location)
    }

    fn build(&self, strategy: Strategy) -> Arc<dyn ResolutionBackend> {
        self.built.lock().unwrap().push(strategy.clone());
        self.inner.build(strategy)
    }
}

/// A loader over `host` with its own, not yet fired, gate.
pub fn isolated_loader(host: &Arc<InProcessHost>, factory: Arc<dyn BackendFactory>) -> AutoLoader {
    let mux = ResolutionMultiplexer::new(host.clone());
    AutoLoader::with_gate(mux, factory, Arc::new(InitGate::new()))
}

pub fn id(s: &str) -> ModuleIdentity {
    s.parse().unwrap()
}

/// Write a module file holding `identity` at `dir/rel`.
pub fn write_module(dir: &Path, rel: &str, identity: &str) -> PathBuf {
    let identity = id(identity);
    let path = dir.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, serde_json::to_string(&identity).unwrap()).unwrap();
    path
}
