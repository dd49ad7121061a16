use super::probe::find_module;
use super::{RedirectPolicy, ResolutionBackend, VersionMatching};
use crate::error::Result;
use crate::host::{LoadedModule, ModuleLoader, ResolveRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Backend driven by a module's redirect policy.
///
/// Requests are first rewritten by the policy's redirects, then matched
/// exactly in the module's directory and the policy's probing paths.
pub struct RedirectBackend {
    policy: RedirectPolicy,
    loader: Arc<dyn ModuleLoader>,
    extensions: Vec<String>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for RedirectBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectBackend")
            .field("source", &self.policy.source)
            .field("redirects", &self.policy.redirects.len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl RedirectBackend {
    #[must_use]
    pub fn new(policy: RedirectPolicy, loader: Arc<dyn ModuleLoader>, extensions: Vec<String>) -> Self {
        Self {
            policy,
            loader,
            extensions,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RedirectPolicy {
        &self.policy
    }
}

impl ResolutionBackend for RedirectBackend {
    fn try_resolve(&self, request: &ResolveRequest) -> Result<Option<LoadedModule>> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(None);
        }

        let target = self.policy.redirect(&request.requested);
        if target != request.requested {
            debug!(
                requested = %request.requested,
                redirected = %target,
                policy = %self.policy.source.display(),
                "applied version redirect"
            );
        }

        find_module(
            self.loader.as_ref(),
            &self.policy.search_dirs(),
            &target.name,
            &self.extensions,
            |candidate| VersionMatching::Exact.accepts(&target, candidate),
        )
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InProcessHost;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_module(path: &Path, name: &str, version: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            serde_json::json!({"name": name, "version": version}).to_string(),
        )
        .unwrap();
    }

    fn backend_for(dir: &Path, policy_json: &str) -> RedirectBackend {
        let policy = RedirectPolicy::parse(&dir.join("App.mod.redirects.json"), dir, policy_json).unwrap();
        RedirectBackend::new(policy, Arc::new(InProcessHost::new()), vec!["mod".to_string()])
    }

    #[test]
    fn test_redirected_version_found_in_probing_path() {
        let dir = tempdir().unwrap();
        write_module(&dir.path().join("lib/Lib.mod"), "Lib", "2.0");

        let backend = backend_for(
            dir.path(),
            r#"{"probing": ["lib"], "redirects": [{"name": "Lib", "old_version": "1.0-1.9", "new_version": "2.0"}]}"#,
        );
        let found = backend
            .try_resolve(&ResolveRequest::new("Lib@1.5".parse().unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(found.identity, "Lib@2.0".parse().unwrap());
    }

    #[test]
    fn test_without_redirect_only_exact_version_matches() {
        let dir = tempdir().unwrap();
        write_module(&dir.path().join("Lib.mod"), "Lib", "2.0");

        let backend = backend_for(dir.path(), "{}");
        assert!(backend
            .try_resolve(&ResolveRequest::new("Lib@1.5".parse().unwrap()))
            .unwrap()
            .is_none());
        assert!(backend
            .try_resolve(&ResolveRequest::new("Lib@2.0".parse().unwrap()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_disposed_declines() {
        let dir = tempdir().unwrap();
        write_module(&dir.path().join("Lib.mod"), "Lib", "2.0");

        let backend = backend_for(dir.path(), "{}");
        backend.dispose();
        assert!(backend
            .try_resolve(&ResolveRequest::new("Lib@2.0".parse().unwrap()))
            .unwrap()
            .is_none());
    }
}
