//! Extension declarations and load tiers.
//!
//! # Responsibility
//! - Describe one extension: identity, source, dependencies and callbacks.
//! - Resolve the requested load policy against the startup context.
//!
//! # Invariants
//! - Names are stable identifiers (`^[A-Za-z0-9][A-Za-z0-9._-]*$`).
//! - Sources are opaque to the core beyond a shape check.

use crate::extension::registry::DeclareError;
use crate::hooks::HookEvent;
use crate::loader::Loader;
use crate::startup::StartupContext;
use crate::CallbackResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::Path;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid name regex"));
static SOURCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+|(?:https?|git|ssh)://\S+)$")
        .expect("valid source regex")
});

/// Post-install hook invoked with the lifecycle event that triggered it.
pub type PostInstallHook = Box<dyn FnMut(HookEvent) -> CallbackResult>;

/// Configuration entry point. Receives the loader so it can declare more
/// extensions while running.
pub type Configure = Box<dyn FnMut(&mut Loader) -> CallbackResult>;

/// Scheduling class. Ordered `Now < Later`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Drained at the startup checkpoint, before first render.
    Now,
    /// Drained on the first idle tick after first render.
    Later,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Now => "now",
            Self::Later => "later",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load tier requested by the caller, before dependency placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    Now,
    #[default]
    Later,
    /// `Now` when the editor was opened on a file, `Later` otherwise.
    OnFileArgument,
}

impl LoadPolicy {
    pub fn resolve(self, context: &StartupContext) -> Tier {
        match self {
            Self::Now => Tier::Now,
            Self::Later => Tier::Later,
            Self::OnFileArgument if context.has_file_argument() => Tier::Now,
            Self::OnFileArgument => Tier::Later,
        }
    }
}

/// One declared extension.
///
/// Each capability is optional: an extension may only be installable, only
/// configurable, or anything in between.
pub struct ExtensionDeclaration {
    pub(crate) name: String,
    pub(crate) source: Option<String>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) policy: LoadPolicy,
    pub(crate) post_install: Option<PostInstallHook>,
    pub(crate) configure: Option<Configure>,
}

impl ExtensionDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            dependencies: Vec::new(),
            policy: LoadPolicy::default(),
            post_install: None,
            configure: None,
        }
    }

    /// Sets the source identifier handed to the installer.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn load(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn post_install(mut self, hook: impl FnMut(HookEvent) -> CallbackResult + 'static) -> Self {
        self.post_install = Some(Box::new(hook));
        self
    }

    pub fn configure(mut self, configure: impl FnMut(&mut Loader) -> CallbackResult + 'static) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn dependency_names(&self) -> &[String] {
        &self.dependencies
    }

    pub fn policy(&self) -> LoadPolicy {
        self.policy
    }

    pub(crate) fn validate(&self) -> Result<(), DeclareError> {
        if !is_valid_extension_name(&self.name) {
            return Err(DeclareError::InvalidName(self.name.clone()));
        }
        for dependency in &self.dependencies {
            if !is_valid_extension_name(dependency) {
                return Err(DeclareError::InvalidName(dependency.clone()));
            }
        }
        if let Some(source) = &self.source {
            if !is_valid_source(source) {
                return Err(DeclareError::InvalidSource {
                    extension: self.name.clone(),
                    value: source.clone(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ExtensionDeclaration {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDeclaration")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("dependencies", &self.dependencies)
            .field("policy", &self.policy)
            .field("post_install", &self.post_install.is_some())
            .field("configure", &self.configure.is_some())
            .finish()
    }
}

/// Returns whether `value` is a well-formed extension name.
pub fn is_valid_extension_name(value: &str) -> bool {
    NAME_RE.is_match(value)
}

/// Returns whether `value` is a supported source identifier: `owner/repo`
/// shorthand, a remote URL, or an absolute local path.
pub fn is_valid_source(value: &str) -> bool {
    SOURCE_RE.is_match(value) || Path::new(value).is_absolute()
}
