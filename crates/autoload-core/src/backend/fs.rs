use super::{
    BackendFactory, ProbingBackend, RedirectBackend, RedirectPolicy, ResolutionBackend, Strategy,
};
use crate::config::LoaderConfig;
use crate::error::Result;
use crate::host::ModuleLoader;
use std::path::Path;
use std::sync::Arc;

/// Builds file-system backends on top of a host's [`ModuleLoader`].
#[derive(Clone)]
pub struct FsBackendFactory {
    loader: Arc<dyn ModuleLoader>,
    extensions: Vec<String>,
    policy_suffix: String,
}

impl std::fmt::Debug for FsBackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsBackendFactory")
            .field("extensions", &self.extensions)
            .field("policy_suffix", &self.policy_suffix)
            .finish()
    }
}

impl FsBackendFactory {
    #[must_use]
    pub fn new(loader: Arc<dyn ModuleLoader>, config: &LoaderConfig) -> Self {
        Self {
            loader,
            extensions: config.module_extensions.clone(),
            policy_suffix: config.policy_suffix.clone(),
        }
    }
}

impl BackendFactory for FsBackendFactory {
    fn load_policy(&self, module_location: &Path) -> Result<Option<RedirectPolicy>> {
        RedirectPolicy::load(module_location, &self.policy_suffix)
    }

    fn build(&self, strategy: Strategy) -> Arc<dyn ResolutionBackend> {
        match strategy {
            Strategy::Redirect(policy) => Arc::new(RedirectBackend::new(
                policy,
                self.loader.clone(),
                self.extensions.clone(),
            )),
            Strategy::Heuristic(probe) => Arc::new(ProbingBackend::new(
                probe,
                self.loader.clone(),
                self.extensions.clone(),
            )),
        }
    }
}
