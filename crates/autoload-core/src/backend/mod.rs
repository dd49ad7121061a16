//! Resolution backends.
//!
//! A backend answers "can you produce this module?" for one strategy: a
//! redirect policy that belongs to a module file, or a plain set of probing
//! directories. Descriptors pick the strategy; a [`BackendFactory`] turns it
//! into a backend. The file-system implementations here are the defaults.

mod fs;
mod policy;
mod probe;
mod redirect;

pub use fs::FsBackendFactory;
pub use policy::{Redirect, RedirectPolicy, DEFAULT_POLICY_SUFFIX};
pub use probe::{ProbingBackend, DEFAULT_MODULE_EXTENSIONS};
pub use redirect::RedirectBackend;

use crate::error::Result;
use crate::host::{LoadedModule, ResolveRequest};
use crate::identity::ModuleIdentity;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A strategy object that may satisfy resolution requests.
pub trait ResolutionBackend: Send + Sync + std::fmt::Debug {
    /// Produce the requested module, or `Ok(None)` to decline.
    fn try_resolve(&self, request: &ResolveRequest) -> Result<Option<LoadedModule>>;

    /// Release resources. Later calls to `try_resolve` decline.
    fn dispose(&self) {}
}

/// How strictly a heuristic backend compares versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionMatching {
    /// Same family and the exact requested version.
    Exact,
    /// Same family, any version.
    Loose,
}

impl VersionMatching {
    #[must_use]
    pub fn accepts(self, requested: &ModuleIdentity, candidate: &ModuleIdentity) -> bool {
        requested.same_family(candidate)
            && match self {
                Self::Exact => requested.version == candidate.version,
                Self::Loose => true,
            }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Loose => "loose",
        }
    }
}

/// Directories searched by one heuristic backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSet {
    pub paths: Vec<PathBuf>,
    pub matching: VersionMatching,
}

impl ProbeSet {
    #[must_use]
    pub fn new(paths: Vec<PathBuf>, matching: VersionMatching) -> Self {
        Self { paths, matching }
    }

    #[must_use]
    pub fn covers(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }
}

/// Which kind of backend to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Redirect(RedirectPolicy),
    Heuristic(ProbeSet),
}

/// Builds backends for descriptors and bare probing paths.
pub trait BackendFactory: Send + Sync {
    /// Load the redirect policy that accompanies the module at `module_location`.
    ///
    /// `Ok(None)` means the module has no policy.
    fn load_policy(&self, module_location: &Path) -> Result<Option<RedirectPolicy>>;

    /// Build a backend for `strategy`. Always succeeds.
    fn build(&self, strategy: Strategy) -> Arc<dyn ResolutionBackend>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ModuleVersion;

    fn id(s: &str) -> ModuleIdentity {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_matching_requires_version() {
        assert!(VersionMatching::Exact.accepts(&id("Lib@1.2"), &id("lib@1.2.0.0")));
        assert!(!VersionMatching::Exact.accepts(&id("Lib@1.2"), &id("Lib@1.3")));
    }

    #[test]
    fn test_loose_matching_ignores_version_not_name() {
        assert!(VersionMatching::Loose.accepts(&id("Lib@1.2"), &id("Lib@1.0")));
        assert!(!VersionMatching::Loose.accepts(&id("Lib@1.2"), &id("Other@1.2")));
    }

    #[test]
    fn test_loose_matching_still_checks_token() {
        let signed = ModuleIdentity::new("Lib", ModuleVersion::default()).with_token("abc");
        assert!(!VersionMatching::Loose.accepts(&signed, &id("Lib@2.0")));
        assert!(VersionMatching::Loose.accepts(&signed, &id("Lib@2.0#ABC")));
    }

    #[test]
    fn test_probe_set_covers() {
        let set = ProbeSet::new(vec![PathBuf::from("/opt/libs")], VersionMatching::Loose);
        assert!(set.covers(Path::new("/opt/libs")));
        assert!(!set.covers(Path::new("/opt")));
    }
}
