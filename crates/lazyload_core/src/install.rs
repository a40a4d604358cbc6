//! Installer collaborator seam.
//!
//! The core never inspects extension contents. An `Installer` turns a source
//! identifier into files on disk and reports what happened, so the loader can
//! fire the matching post-install hook.

use crate::hooks::HookEvent;
use crate::BoxError;
use log::info;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const SOURCE_MARKER_FILE: &str = ".source";

/// Result of one install call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    Updated,
    Unchanged,
}

impl InstallOutcome {
    /// Lifecycle event this outcome triggers, if any.
    pub fn hook_event(self) -> Option<HookEvent> {
        match self {
            Self::Installed => Some(HookEvent::Install),
            Self::Updated => Some(HookEvent::Update),
            Self::Unchanged => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// External installer contract.
pub trait Installer {
    fn install(&mut self, extension: &str, source: &str) -> Result<InstallOutcome, BoxError>;
}

/// Installer that treats every extension as already present.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstaller;

impl Installer for NoopInstaller {
    fn install(&mut self, _extension: &str, _source: &str) -> Result<InstallOutcome, BoxError> {
        Ok(InstallOutcome::Unchanged)
    }
}

/// Installer that materializes one directory per extension under `root`.
///
/// Each directory carries a marker with the source it was installed from; a
/// different source on the next run counts as an update.
#[derive(Debug, Clone)]
pub struct DirectoryInstaller {
    root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension_dir(&self, extension: &str) -> PathBuf {
        self.root.join(extension)
    }
}

impl Installer for DirectoryInstaller {
    fn install(&mut self, extension: &str, source: &str) -> Result<InstallOutcome, BoxError> {
        let dir = self.extension_dir(extension);
        let marker = dir.join(SOURCE_MARKER_FILE);

        let outcome = match fs::read_to_string(&marker) {
            Ok(existing) if existing.trim() == source => return Ok(InstallOutcome::Unchanged),
            Ok(_) => InstallOutcome::Updated,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&dir)?;
                InstallOutcome::Installed
            }
            Err(err) => return Err(err.into()),
        };

        fs::write(&marker, source)?;
        info!(
            "event=extension_install module=install status=ok extension={} outcome={} dir={}",
            extension,
            outcome.as_str(),
            dir.display()
        );
        Ok(outcome)
    }
}
