//! Deferred extension-loading orchestration for editor configurations.
//! This crate is the single source of truth for load-order invariants;
//! extensions themselves stay opaque.

use std::error::Error;

pub mod extension;
pub mod hooks;
pub mod install;
pub mod loader;
pub mod logging;
pub mod scheduler;
pub mod setup;
pub mod startup;

pub use extension::declaration::{ExtensionDeclaration, LoadPolicy, Tier};
pub use extension::manifest::{load_manifest, parse_manifest, ManifestError, PluginManifest, PluginSpec};
pub use extension::registry::{DeclareError, ExtensionRegistry, ExtensionState};
pub use hooks::{HookError, HookEvent, HookOutcome, HookRunner};
pub use install::{DirectoryInstaller, InstallOutcome, Installer, NoopInstaller};
pub use loader::{ExtensionStatus, LoadReport, Loader, LoaderError, TaskError, TaskFailure};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use scheduler::{Scheduler, TierState};
pub use setup::{SetupOutcome, SetupTrigger};
pub use startup::StartupContext;

/// Error type returned by opaque extension callbacks and installers.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Result of one extension callback (configure, post-install hook).
pub type CallbackResult = Result<(), BoxError>;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub(crate) fn boxed_source(err: &BoxError) -> &(dyn Error + 'static) {
    err.as_ref()
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
