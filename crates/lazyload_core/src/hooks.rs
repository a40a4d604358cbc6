//! One-time lifecycle hooks.
//!
//! # Invariants
//! - A `(extension, event)` pair fires at most once per runner.
//! - The fire record is set before the callback runs and is never cleared,
//!   so a failing hook is not retried.

use crate::{boxed_source, BoxError, CallbackResult};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Extension lifecycle event delivered by the installer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    Install,
    Update,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
        }
    }
}

impl Display for HookEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `fire_once` call ran the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOutcome {
    Fired,
    AlreadyFired,
}

/// Process-lifetime record of fired hooks.
#[derive(Debug, Default)]
pub struct HookRunner {
    fired: BTreeSet<(String, HookEvent)>,
}

impl HookRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` unless this `(extension, event)` pair already fired.
    pub fn fire_once<F>(
        &mut self,
        extension: &str,
        event: HookEvent,
        callback: F,
    ) -> Result<HookOutcome, HookError>
    where
        F: FnOnce() -> CallbackResult,
    {
        if !self.fired.insert((extension.to_string(), event)) {
            debug!(
                "event=hook_fire module=hooks status=skip extension={} hook_event={} reason=already_fired",
                extension, event
            );
            return Ok(HookOutcome::AlreadyFired);
        }

        callback().map_err(|source| HookError {
            extension: extension.to_string(),
            event,
            source,
        })?;
        info!(
            "event=hook_fire module=hooks status=ok extension={} hook_event={}",
            extension, event
        );
        Ok(HookOutcome::Fired)
    }

    pub fn has_fired(&self, extension: &str, event: HookEvent) -> bool {
        self.fired.contains(&(extension.to_string(), event))
    }

    pub fn len(&self) -> usize {
        self.fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
    }
}

/// A hook callback returned an error.
#[derive(Debug)]
pub struct HookError {
    pub extension: String,
    pub event: HookEvent,
    source: BoxError,
}

impl Display for HookError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hook for `{}` failed: {}",
            self.event, self.extension, self.source
        )
    }
}

impl Error for HookError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(boxed_source(&self.source))
    }
}
