pub mod policy;
pub mod resolve;
pub mod version;

use autoload_core::LoaderConfig;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

/// Load the config file if one was given, defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<LoaderConfig> {
    match path {
        Some(path) => LoaderConfig::from_file(path).into_diagnostic(),
        None => Ok(LoaderConfig::default()),
    }
}
