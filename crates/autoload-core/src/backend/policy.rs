//! Redirect policy files.
//!
//! A policy sits next to the module file it belongs to
//! (`Plugin.mod` -> `Plugin.mod.redirects.json`) and is authoritative for
//! which versions that module's references bind to.

use crate::error::{Error, Result};
use crate::identity::{ModuleIdentity, ModuleVersion, VersionRange};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Suffix appended to a module file name to find its policy.
pub const DEFAULT_POLICY_SUFFIX: &str = ".redirects.json";

/// One version redirect rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Redirect {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub old_version: VersionRange,
    pub new_version: ModuleVersion,
}

impl Redirect {
    fn applies_to(&self, requested: &ModuleIdentity) -> bool {
        if !self.name.eq_ignore_ascii_case(&requested.name) {
            return false;
        }
        if let Some(token) = &self.token {
            if !requested
                .token
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(token))
            {
                return false;
            }
        }
        self.old_version.contains(requested.version)
    }
}

/// On-disk shape of a policy file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyFile {
    #[serde(default)]
    probing: Vec<String>,
    #[serde(default)]
    redirects: Vec<Redirect>,
}

/// A parsed redirect policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedirectPolicy {
    /// The policy file.
    pub source: PathBuf,
    /// Directory of the module the policy belongs to.
    pub base_dir: PathBuf,
    /// Extra directories named by the policy, absolute.
    pub probing_paths: Vec<PathBuf>,
    pub redirects: Vec<Redirect>,
}

impl RedirectPolicy {
    /// Where the policy for `module_location` would live.
    #[must_use]
    pub fn policy_path(module_location: &Path, suffix: &str) -> PathBuf {
        let mut name = module_location
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(suffix);
        module_location.with_file_name(name)
    }

    /// Load the policy accompanying `module_location`, if there is one.
    pub fn load(module_location: &Path, suffix: &str) -> Result<Option<Self>> {
        let source = Self::policy_path(module_location, suffix);
        if !source.is_file() {
            return Ok(None);
        }

        let content = autoload_util::fs::read_to_string_lossy(&source).map_err(|e| {
            Error::PolicyRead {
                path: source.clone(),
                source: e,
            }
        })?;
        let base_dir = module_location
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::parse(&source, &base_dir, &content).map(Some)
    }

    /// Parse policy JSON. Relative probing paths resolve against `base_dir`.
    pub fn parse(source: &Path, base_dir: &Path, content: &str) -> Result<Self> {
        let file: PolicyFile = serde_json::from_str(content).map_err(|e| Error::PolicyParse {
            path: source.to_path_buf(),
            source: e,
        })?;

        let mut probing_paths = Vec::with_capacity(file.probing.len());
        for entry in &file.probing {
            let entry = entry.trim();
            if entry.is_empty() {
                return Err(Error::PolicyInvalid {
                    path: source.to_path_buf(),
                    message: "empty probing path".to_string(),
                });
            }
            let joined = base_dir.join(entry);
            probing_paths.push(autoload_util::fs::canonical_path(&joined)?);
        }

        Ok(Self {
            source: source.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            probing_paths,
            redirects: file.redirects,
        })
    }

    /// The identity a request for `requested` binds to under this policy.
    #[must_use]
    pub fn redirect(&self, requested: &ModuleIdentity) -> ModuleIdentity {
        match self.redirects.iter().find(|r| r.applies_to(requested)) {
            Some(rule) => ModuleIdentity {
                version: rule.new_version,
                ..requested.clone()
            },
            None => requested.clone(),
        }
    }

    /// Directories the redirect backend searches: the module's own directory first.
    #[must_use]
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        std::iter::once(self.base_dir.clone())
            .chain(self.probing_paths.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const POLICY: &str = r#"{
        "probing": ["plugins", "./shared/../lib"],
        "redirects": [
            { "name": "Lib", "old_version": "1.0-1.9.9.9", "new_version": "2.0" },
            { "name": "Signed", "token": "abc", "old_version": "1.0", "new_version": "1.5" }
        ]
    }"#;

    fn id(s: &str) -> ModuleIdentity {
        s.parse().unwrap()
    }

    #[test]
    fn test_policy_path_appends_suffix() {
        let path = RedirectPolicy::policy_path(Path::new("/app/Plugin.mod"), DEFAULT_POLICY_SUFFIX);
        assert_eq!(path, Path::new("/app/Plugin.mod.redirects.json"));
    }

    #[test]
    fn test_missing_policy_is_none() {
        let dir = tempdir().unwrap();
        let module = dir.path().join("Plugin.mod");
        fs::write(&module, "{}").unwrap();
        assert!(RedirectPolicy::load(&module, DEFAULT_POLICY_SUFFIX)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_resolves_probing_against_module_dir() {
        let dir = tempdir().unwrap();
        let module = dir.path().join("Plugin.mod");
        fs::write(&module, "{}").unwrap();
        fs::write(dir.path().join("Plugin.mod.redirects.json"), POLICY).unwrap();

        let policy = RedirectPolicy::load(&module, DEFAULT_POLICY_SUFFIX)
            .unwrap()
            .unwrap();
        let base = autoload_util::fs::canonical_path(dir.path()).unwrap();
        let expected_plugins = autoload_util::fs::canonical_path(&dir.path().join("plugins")).unwrap();
        let expected_lib = autoload_util::fs::canonical_path(&dir.path().join("lib")).unwrap();
        assert_eq!(policy.probing_paths, vec![expected_plugins, expected_lib]);
        assert_eq!(policy.redirects.len(), 2);
        assert_eq!(
            autoload_util::fs::canonical_path(&policy.base_dir).unwrap(),
            base
        );
    }

    #[test]
    fn test_malformed_policy_is_parse_error() {
        let err = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), "{ nope").unwrap_err();
        assert!(matches!(err, Error::PolicyParse { .. }));

        let err = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), r#"{"bogus": 1}"#)
            .unwrap_err();
        assert!(matches!(err, Error::PolicyParse { .. }));
    }

    #[test]
    fn test_empty_probing_entry_is_invalid() {
        let err = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), r#"{"probing": [" "]}"#)
            .unwrap_err();
        assert!(matches!(err, Error::PolicyInvalid { .. }));
    }

    #[test]
    fn test_redirect_rewrites_version_in_range() {
        let policy = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), POLICY).unwrap();

        assert_eq!(policy.redirect(&id("Lib@1.4")), id("Lib@2.0"));
        assert_eq!(policy.redirect(&id("lib@1.0")), id("lib@2.0"));
        assert_eq!(policy.redirect(&id("Lib@3.0")), id("Lib@3.0"));
        assert_eq!(policy.redirect(&id("Other@1.4")), id("Other@1.4"));
    }

    #[test]
    fn test_redirect_with_token_requires_matching_token() {
        let policy = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), POLICY).unwrap();

        assert_eq!(policy.redirect(&id("Signed@1.0")), id("Signed@1.0"));
        assert_eq!(policy.redirect(&id("Signed@1.0#ABC")), id("Signed@1.5#ABC"));
    }

    #[test]
    fn test_search_dirs_start_with_base() {
        let policy = RedirectPolicy::parse(Path::new("p.json"), Path::new("/app"), POLICY).unwrap();
        let dirs = policy.search_dirs();
        assert_eq!(dirs[0], Path::new("/app"));
        assert_eq!(dirs.len(), 3);
    }
}
