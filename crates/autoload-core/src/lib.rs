#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Dynamic module resolution.
//!
//! Modules register with an [`AutoLoader`]. When the host fails to find a
//! module, the [`ResolutionMultiplexer`] offers the request to every
//! registered module's [`ModuleDescriptor`], which probes its directories
//! or applies its redirect policy. Descriptor setup is deferred by the
//! [`init`] engine until the first such failure.

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod host;
pub mod identity;
pub mod init;
pub mod loader;
pub mod multiplexer;
mod sync;
pub mod tracker;
pub mod version;

pub use backend::{
    BackendFactory, FsBackendFactory, ProbeSet, RedirectPolicy, ResolutionBackend, Strategy,
    VersionMatching,
};
pub use config::LoaderConfig;
pub use descriptor::ModuleDescriptor;
pub use error::{Error, Result};
pub use host::{InProcessHost, LoadedModule, ModuleHandle, ModuleLoader, ResolutionHost, ResolveRequest};
pub use identity::{ModuleIdentity, ModuleVersion, VersionRange};
pub use init::{InitEngine, InitGate, InitScope};
pub use loader::AutoLoader;
pub use multiplexer::{HandlerId, ResolutionMultiplexer};
pub use tracker::DependencyTracker;
pub use version::VERSION;
