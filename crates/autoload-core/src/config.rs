use crate::backend::{DEFAULT_MODULE_EXTENSIONS, DEFAULT_POLICY_SUFFIX};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for an auto-loader and its default backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    /// Queue descriptor setup until the first failed resolution.
    ///
    /// When false, setup runs as soon as a module is added.
    pub defer_initialization: bool,

    /// Module file extensions probed, in order, without the leading dot.
    pub module_extensions: Vec<String>,

    /// Appended to a module file name to locate its redirect policy.
    pub policy_suffix: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            defer_initialization: true,
            module_extensions: DEFAULT_MODULE_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            policy_suffix: DEFAULT_POLICY_SUFFIX.to_string(),
        }
    }
}

impl LoaderConfig {
    /// Read a JSON config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Set whether setup is deferred.
    #[must_use]
    pub fn with_defer_initialization(mut self, defer: bool) -> Self {
        self.defer_initialization = defer;
        self
    }

    /// Set probed module extensions. Leading dots are stripped.
    #[must_use]
    pub fn with_module_extensions(mut self, extensions: Vec<String>) -> Self {
        self.module_extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    /// Set the redirect policy suffix.
    #[must_use]
    pub fn with_policy_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.policy_suffix = suffix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert!(config.defer_initialization);
        assert_eq!(config.module_extensions, vec!["mod".to_string()]);
        assert_eq!(config.policy_suffix, ".redirects.json");
    }

    #[test]
    fn test_builder() {
        let config = LoaderConfig::default()
            .with_defer_initialization(false)
            .with_module_extensions(vec![".dll".to_string(), "so".to_string(), String::new()])
            .with_policy_suffix(".cfg");
        assert!(!config.defer_initialization);
        assert_eq!(config.module_extensions, vec!["dll".to_string(), "so".to_string()]);
        assert_eq!(config.policy_suffix, ".cfg");
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("autoload.json");
        fs::write(&path, r#"{"defer_initialization": false}"#).unwrap();

        let config = LoaderConfig::from_file(&path).unwrap();
        assert!(!config.defer_initialization);
        assert_eq!(config.policy_suffix, DEFAULT_POLICY_SUFFIX);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            LoaderConfig::from_file(&missing),
            Err(Error::ConfigRead { .. })
        ));

        let bad = dir.path().join("bad.json");
        fs::write(&bad, r#"{"unknown": 1}"#).unwrap();
        assert!(matches!(
            LoaderConfig::from_file(&bad),
            Err(Error::ConfigParse { .. })
        ));
    }
}
