//! Extension registry and tier placement.
//!
//! # Responsibility
//! - Own every declared extension record for the loader's lifetime.
//! - Reject duplicate names and dependency cycles before anything is queued.
//! - Admit declarations into a tier once all their dependencies are admitted.
//!
//! # Invariants
//! - A name is registered at most once.
//! - The dependency graph stays acyclic.
//! - `tier(ext) >= tier(dep)` for every admitted dependency edge.

use crate::extension::declaration::{Configure, ExtensionDeclaration, PostInstallHook, Tier};
use crate::startup::StartupContext;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Lifecycle state of one registered extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExtensionState {
    /// Waiting for at least one dependency to be declared.
    Blocked,
    Queued,
    Running,
    Loaded,
    Failed { reason: String },
    /// Not run because a dependency did not load.
    Skipped { reason: String },
}

impl ExtensionState {
    /// Returns true once the extension's task has finished, successfully or not.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Loaded | Self::Failed { .. } | Self::Skipped { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Loaded => "loaded",
            Self::Failed { .. } => "failed",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Registered extension record.
pub struct ExtensionRecord {
    pub(crate) name: String,
    pub(crate) source: Option<String>,
    pub(crate) dependencies: Vec<String>,
    pub(crate) requested: Tier,
    pub(crate) tier: Option<Tier>,
    pub(crate) state: ExtensionState,
    pub(crate) post_install: Option<PostInstallHook>,
    pub(crate) configure: Option<Configure>,
    pub(crate) auto_configured: bool,
}

impl ExtensionRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Tier requested by the caller after resolving its load policy.
    pub fn requested_tier(&self) -> Tier {
        self.requested
    }

    /// Assigned tier, `None` while blocked.
    pub fn tier(&self) -> Option<Tier> {
        self.tier
    }

    pub fn state(&self) -> &ExtensionState {
        &self.state
    }
}

/// A declaration that just moved from blocked to a tier queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub name: String,
    pub tier: Tier,
}

/// In-process registry of declared extensions, kept in declaration order.
#[derive(Default)]
pub struct ExtensionRegistry {
    records: Vec<ExtensionRecord>,
    index: BTreeMap<String, usize>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one declaration and admits everything that became ready.
    ///
    /// Returns the admissions in the order their tasks must be queued. An empty
    /// list means the declaration is blocked on an undeclared dependency.
    pub fn declare(
        &mut self,
        declaration: ExtensionDeclaration,
        context: &StartupContext,
    ) -> Result<Vec<Admission>, DeclareError> {
        declaration.validate()?;
        if self.index.contains_key(declaration.name.as_str()) {
            return Err(DeclareError::DuplicateName(declaration.name));
        }
        if let Some(via) = self.find_cycle(&declaration.name, &declaration.dependencies) {
            return Err(DeclareError::CyclicDependency {
                extension: declaration.name,
                via,
            });
        }

        let ExtensionDeclaration {
            name,
            source,
            dependencies,
            policy,
            post_install,
            configure,
        } = declaration;
        self.index.insert(name.clone(), self.records.len());
        self.records.push(ExtensionRecord {
            name,
            source,
            dependencies,
            requested: policy.resolve(context),
            tier: None,
            state: ExtensionState::Blocked,
            post_install,
            configure,
            auto_configured: false,
        });

        Ok(self.admit_ready())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ExtensionRecord> {
        self.index.get(name).map(|&position| &self.records[position])
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut ExtensionRecord> {
        let position = *self.index.get(name)?;
        self.records.get_mut(position)
    }

    /// Iterates records in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.records.iter()
    }

    /// Returns blocked extensions with the dependency names still undeclared.
    pub fn unresolved(&self) -> Vec<(String, Vec<String>)> {
        self.records
            .iter()
            .filter(|record| record.tier.is_none())
            .map(|record| {
                let missing = record
                    .dependencies
                    .iter()
                    .filter(|dependency| !self.index.contains_key(dependency.as_str()))
                    .cloned()
                    .collect();
                (record.name.clone(), missing)
            })
            .collect()
    }

    pub(crate) fn set_state(&mut self, name: &str, state: ExtensionState) {
        if let Some(record) = self.get_mut(name) {
            record.state = state;
        }
    }

    /// Depth-first search from each direct dependency back to `name`.
    ///
    /// Returns the direct dependency through which the cycle closes.
    fn find_cycle(&self, name: &str, dependencies: &[String]) -> Option<String> {
        for direct in dependencies {
            let mut stack = vec![direct.as_str()];
            let mut visited = BTreeSet::new();
            while let Some(current) = stack.pop() {
                if current == name {
                    return Some(direct.clone());
                }
                if !visited.insert(current) {
                    continue;
                }
                if let Some(record) = self.get(current) {
                    stack.extend(record.dependencies.iter().map(String::as_str));
                }
            }
        }
        None
    }

    fn admit_ready(&mut self) -> Vec<Admission> {
        let mut admitted = Vec::new();
        loop {
            let ready = self.records.iter().position(|record| {
                record.tier.is_none()
                    && record
                        .dependencies
                        .iter()
                        .all(|dependency| self.assigned_tier(dependency).is_some())
            });
            let Some(position) = ready else {
                break;
            };

            let tier = self.placement(&self.records[position]);
            let record = &mut self.records[position];
            record.tier = Some(tier);
            record.state = ExtensionState::Queued;
            admitted.push(Admission {
                name: record.name.clone(),
                tier,
            });
        }
        admitted
    }

    /// Any LATER dependency pushes the extension to LATER. Otherwise NOW
    /// dependencies pull it to NOW. Without dependencies the request stands.
    fn placement(&self, record: &ExtensionRecord) -> Tier {
        let dependency_tiers: Vec<Tier> = record
            .dependencies
            .iter()
            .filter_map(|dependency| self.assigned_tier(dependency))
            .collect();

        match dependency_tiers.iter().max() {
            Some(Tier::Later) => Tier::Later,
            Some(Tier::Now) => Tier::Now,
            None => record.requested,
        }
    }

    fn assigned_tier(&self, name: &str) -> Option<Tier> {
        self.get(name).and_then(|record| record.tier)
    }
}

/// Declaration-time errors, reported to the `declare` caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareError {
    InvalidName(String),
    InvalidSource { extension: String, value: String },
    DuplicateName(String),
    CyclicDependency { extension: String, via: String },
}

impl Display for DeclareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(value) => write!(f, "extension name is invalid: `{value}`"),
            Self::InvalidSource { extension, value } => {
                write!(f, "extension `{extension}` has an invalid source: `{value}`")
            }
            Self::DuplicateName(value) => write!(f, "extension already declared: {value}"),
            Self::CyclicDependency { extension, via } => write!(
                f,
                "declaring `{extension}` would create a dependency cycle through `{via}`"
            ),
        }
    }
}

impl Error for DeclareError {}
