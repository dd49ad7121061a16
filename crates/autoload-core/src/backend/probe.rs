//! Directory probing.
//!
//! For a requested name `Lib` and extension `mod`, each directory is checked
//! for `Lib.mod` and then `Lib/Lib.mod`.

use super::{ProbeSet, ResolutionBackend};
use crate::error::Result;
use crate::host::{LoadedModule, ModuleLoader, ResolveRequest};
use crate::identity::ModuleIdentity;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default module file extensions, probed in order.
pub const DEFAULT_MODULE_EXTENSIONS: &[&str] = &["mod"];

/// Candidate files for `name` inside `dir`, in probe order.
///
/// Names that are not a single plain file name yield no candidates.
pub(crate) fn candidates(dir: &Path, name: &str, extensions: &[String]) -> Vec<PathBuf> {
    if !ModuleIdentity::is_valid_name(name) {
        trace!(name, "not a plain module name, nothing to probe");
        return Vec::new();
    }
    let mut out = Vec::with_capacity(extensions.len() * 2);
    for ext in extensions {
        out.push(dir.join(format!("{name}.{ext}")));
    }
    for ext in extensions {
        out.push(dir.join(name).join(format!("{name}.{ext}")));
    }
    out
}

/// Load the first candidate under `dirs` whose identity `accept`s.
pub(crate) fn find_module(
    loader: &dyn ModuleLoader,
    dirs: &[PathBuf],
    name: &str,
    extensions: &[String],
    accept: impl Fn(&ModuleIdentity) -> bool,
) -> Result<Option<LoadedModule>> {
    for dir in dirs {
        for candidate in candidates(dir, name, extensions) {
            if !candidate.is_file() {
                continue;
            }
            match loader.read_identity(&candidate) {
                Ok(identity) if accept(&identity) => {
                    debug!(module = %identity, path = %candidate.display(), "probe hit");
                    return loader.load(&candidate).map(Some);
                }
                Ok(identity) => {
                    trace!(module = %identity, path = %candidate.display(), "probe candidate rejected");
                }
                Err(e) => {
                    debug!(path = %candidate.display(), error = %e, "unreadable probe candidate");
                }
            }
        }
    }
    Ok(None)
}

/// Heuristic backend over a fixed set of directories.
pub struct ProbingBackend {
    probe: ProbeSet,
    loader: Arc<dyn ModuleLoader>,
    extensions: Vec<String>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for ProbingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbingBackend")
            .field("paths", &self.probe.paths)
            .field("matching", &self.probe.matching)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ProbingBackend {
    #[must_use]
    pub fn new(probe: ProbeSet, loader: Arc<dyn ModuleLoader>, extensions: Vec<String>) -> Self {
        Self {
            probe,
            loader,
            extensions,
            disposed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn probe_set(&self) -> &ProbeSet {
        &self.probe
    }
}

impl ResolutionBackend for ProbingBackend {
    fn try_resolve(&self, request: &ResolveRequest) -> Result<Option<LoadedModule>> {
        if self.disposed.load(Ordering::Acquire) {
            return Ok(None);
        }
        let matching = self.probe.matching;
        find_module(
            self.loader.as_ref(),
            &self.probe.paths,
            &request.requested.name,
            &self.extensions,
            |candidate| matching.accepts(&request.requested, candidate),
        )
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VersionMatching;
    use crate::host::InProcessHost;
    use std::fs;
    use tempfile::tempdir;

    fn write_module(dir: &Path, file: &str, name: &str, version: &str) {
        let path = dir.join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            path,
            serde_json::json!({"name": name, "version": version}).to_string(),
        )
        .unwrap();
    }

    fn backend(dirs: Vec<PathBuf>, matching: VersionMatching) -> ProbingBackend {
        ProbingBackend::new(
            ProbeSet::new(dirs, matching),
            Arc::new(InProcessHost::new()),
            vec!["mod".to_string()],
        )
    }

    fn request(s: &str) -> ResolveRequest {
        ResolveRequest::new(s.parse().unwrap())
    }

    #[test]
    fn test_candidates_order() {
        let got = candidates(Path::new("/d"), "Lib", &["mod".to_string(), "bin".to_string()]);
        let expected: Vec<PathBuf> = ["/d/Lib.mod", "/d/Lib.bin", "/d/Lib/Lib.mod", "/d/Lib/Lib.bin"]
            .iter()
            .map(PathBuf::from)
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_path_like_names_have_no_candidates() {
        let exts = ["mod".to_string()];
        for name in ["../outside/Lib", "/etc/Lib", "a/b", "..", ""] {
            assert!(candidates(Path::new("/d"), name, &exts).is_empty(), "{name}");
        }
    }

    #[test]
    fn test_probing_stays_inside_its_directory() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("probe")).unwrap();
        write_module(root.path(), "outside/Lib.mod", "../outside/Lib", "1.0");

        let escaping = ModuleIdentity::new("../outside/Lib", "1.0".parse().unwrap());
        let found = backend(vec![root.path().join("probe")], VersionMatching::Loose)
            .try_resolve(&ResolveRequest::new(escaping))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_loose_accepts_other_version() {
        let dir = tempdir().unwrap();
        write_module(dir.path(), "Lib.mod", "Lib", "1.0");

        let found = backend(vec![dir.path().to_path_buf()], VersionMatching::Loose)
            .try_resolve(&request("Lib@1.2"))
            .unwrap()
            .unwrap();
        assert_eq!(found.identity, "Lib@1.0".parse().unwrap());
    }

    #[test]
    fn test_exact_rejects_other_version() {
        let dir = tempdir().unwrap();
        write_module(dir.path(), "Lib.mod", "Lib", "1.0");

        let found = backend(vec![dir.path().to_path_buf()], VersionMatching::Exact)
            .try_resolve(&request("Lib@1.2"))
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_nested_layout_and_later_dirs() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write_module(first.path(), "Lib.mod", "Lib", "1.0");
        write_module(second.path(), "Lib/Lib.mod", "Lib", "1.2");

        let found = backend(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            VersionMatching::Exact,
        )
        .try_resolve(&request("Lib@1.2"))
        .unwrap()
        .unwrap();
        assert_eq!(found.identity.version.minor, 2);
    }

    #[test]
    fn test_unreadable_candidate_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Lib.mod"), "garbage").unwrap();
        write_module(dir.path(), "Lib/Lib.mod", "Lib", "1.0");

        let found = backend(vec![dir.path().to_path_buf()], VersionMatching::Loose)
            .try_resolve(&request("Lib@1.0"))
            .unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_disposed_backend_declines() {
        let dir = tempdir().unwrap();
        write_module(dir.path(), "Lib.mod", "Lib", "1.0");

        let backend = backend(vec![dir.path().to_path_buf()], VersionMatching::Loose);
        backend.dispose();
        assert!(backend.try_resolve(&request("Lib@1.0")).unwrap().is_none());
    }
}
