use crate::host::ModuleHandle;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for autoload operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read redirect policy at {path}: {source}")]
    PolicyRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse redirect policy at {path}: {source}")]
    PolicyParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid redirect policy at {path}: {message}")]
    PolicyInvalid { path: PathBuf, message: String },

    #[error("Invalid module version '{0}'")]
    InvalidVersion(String),

    #[error("Invalid module identity '{0}'")]
    InvalidIdentity(String),

    #[error("Failed to load module from {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Module handle {0} is not known to the host")]
    UnknownModule(ModuleHandle),

    #[error("Invalid probing path '{}': {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Auto-loader has been disposed")]
    Disposed,

    #[error("Initialization scope has been discarded")]
    ScopeDiscarded,

    #[error("A default auto-loader is already installed")]
    DefaultAlreadyInstalled,

    #[error("{} deferred initialization actions failed; first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Aggregate(Vec<Error>),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Flatten a list of collected failures: none is `Ok`, one is returned
    /// as itself, several become [`Error::Aggregate`].
    pub(crate) fn collect(mut failures: Vec<Error>) -> Result<()> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(Self::Aggregate(failures)),
        }
    }
}

/// Result alias for autoload operations.
pub type Result<T> = std::result::Result<T, Error>;
