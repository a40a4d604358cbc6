//! Loader composition root.
//!
//! # Responsibility
//! - Own the registry, scheduler, hook runner and installer for one editor
//!   session.
//! - Drive NOW at the startup checkpoint and LATER on the first idle tick.
//! - Isolate extension failures so one broken extension never stops the rest.
//!
//! # Invariants
//! - An extension task runs only after every dependency task settled.
//! - Only one task executes at a time; tasks declared from inside a task run
//!   after it returns.
//! - Every task failure produces an `error` log record.

use crate::extension::declaration::{ExtensionDeclaration, Tier};
use crate::extension::registry::{DeclareError, ExtensionRegistry, ExtensionState};
use crate::hooks::{HookError, HookEvent, HookOutcome, HookRunner};
use crate::install::{Installer, NoopInstaller};
use crate::scheduler::{Scheduler, TierState};
use crate::setup::{self, SetupOutcome, SetupTrigger};
use crate::startup::StartupContext;
use crate::{boxed_source, BoxError};
use log::{error, info, warn};
use serde::Serialize;
use std::any::Any;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

/// Orchestration context for one editor session.
pub struct Loader {
    run_id: Uuid,
    context: StartupContext,
    pub(crate) registry: ExtensionRegistry,
    scheduler: Scheduler<String>,
    hooks: HookRunner,
    installer: Box<dyn Installer>,
    depth: usize,
}

impl Loader {
    /// Creates a loader whose extensions are considered already installed.
    pub fn new(context: StartupContext) -> Self {
        Self::with_installer(context, NoopInstaller)
    }

    pub fn with_installer(context: StartupContext, installer: impl Installer + 'static) -> Self {
        let run_id = Uuid::new_v4();
        info!(
            "event=loader_init module=loader status=ok run_id={} has_file_argument={}",
            run_id,
            context.has_file_argument()
        );
        Self {
            run_id,
            context,
            registry: ExtensionRegistry::new(),
            scheduler: Scheduler::new(),
            hooks: HookRunner::new(),
            installer: Box::new(installer),
            depth: 0,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn context(&self) -> StartupContext {
        self.context
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookRunner {
        &self.hooks
    }

    pub fn tier_state(&self, tier: Tier) -> TierState {
        self.scheduler.state(tier)
    }

    pub fn state(&self, extension: &str) -> Option<&ExtensionState> {
        self.registry.get(extension).map(|record| record.state())
    }

    pub fn tier(&self, extension: &str) -> Option<Tier> {
        self.registry.get(extension).and_then(|record| record.tier())
    }

    /// Registers an extension and schedules its load task.
    ///
    /// When the target tier already drained, the task runs before this call
    /// returns, or right after the current task when called from a task.
    pub fn declare(&mut self, declaration: ExtensionDeclaration) -> Result<(), DeclareError> {
        let name = declaration.name().to_string();
        let admitted = match self.registry.declare(declaration, &self.context) {
            Ok(admitted) => admitted,
            Err(err) => {
                warn!(
                    "event=extension_declare module=loader status=error extension={} error={}",
                    name, err
                );
                return Err(err);
            }
        };

        if admitted.is_empty() {
            info!(
                "event=extension_declare module=loader status=blocked extension={}",
                name
            );
            return Ok(());
        }

        let mut immediate = false;
        for admission in admitted {
            let state = self.scheduler.enqueue(admission.tier, admission.name.clone());
            info!(
                "event=extension_declare module=loader status=ok extension={} tier={} tier_state={:?}",
                admission.name, admission.tier, state
            );
            immediate |= state == TierState::Drained;
        }
        if immediate {
            self.run_immediate();
        }
        Ok(())
    }

    /// Startup checkpoint: drains the NOW tier synchronously.
    pub fn checkpoint(&mut self) {
        self.drain(Tier::Now);
    }

    /// Idle-tick signal from the host. Only the first tick drains LATER.
    pub fn idle_tick(&mut self) {
        if self.depth > 0 {
            warn!("event=idle_tick module=loader status=skip reason=inside_task");
            return;
        }
        self.checkpoint();
        if self.scheduler.state(Tier::Later) != TierState::Pending {
            return;
        }
        self.drain(Tier::Later);

        for (extension, missing) in self.registry.unresolved() {
            warn!(
                "event=extension_unresolved module=loader status=skip extension={} missing={}",
                extension,
                missing.join(",")
            );
        }
    }

    /// Entry point for the installer collaborator's install/update events.
    ///
    /// Returns `None` when the extension declares no post-install hook.
    pub fn notify_install_event(
        &mut self,
        extension: &str,
        event: HookEvent,
    ) -> Result<Option<HookOutcome>, LoaderError> {
        if self.registry.get(extension).is_none() {
            return Err(LoaderError::UnknownExtension(extension.to_string()));
        }
        self.fire_hook(extension, event).map_err(LoaderError::Hook)
    }

    /// Manually re-runs an extension's configure callback.
    ///
    /// Only extensions whose load task ran to `Loaded` or `Failed` can be
    /// reloaded; earlier states still wait on their dependencies.
    pub fn reload(&mut self, extension: &str) -> Result<SetupOutcome, LoaderError> {
        let Some(record) = self.registry.get(extension) else {
            return Err(LoaderError::UnknownExtension(extension.to_string()));
        };
        if !matches!(
            record.state(),
            ExtensionState::Loaded | ExtensionState::Failed { .. }
        ) {
            return Err(LoaderError::NotLoaded {
                extension: extension.to_string(),
                state: record.state().clone(),
            });
        }
        let outcome = setup::invoke_configure(self, extension, SetupTrigger::Reload).map_err(
            |source| LoaderError::Configure {
                extension: extension.to_string(),
                source,
            },
        )?;
        info!(
            "event=extension_reload module=loader status=ok extension={} outcome={:?}",
            extension, outcome
        );
        Ok(outcome)
    }

    /// Blocked extensions and their undeclared dependencies.
    pub fn unresolved(&self) -> Vec<(String, Vec<String>)> {
        self.registry.unresolved()
    }

    pub fn report(&self) -> LoadReport {
        LoadReport {
            run_id: self.run_id,
            has_file_argument: self.context.has_file_argument(),
            now: self.scheduler.state(Tier::Now),
            later: self.scheduler.state(Tier::Later),
            extensions: self
                .registry
                .iter()
                .map(|record| ExtensionStatus {
                    name: record.name().to_string(),
                    tier: record.tier(),
                    state: record.state().clone(),
                })
                .collect(),
        }
    }

    fn drain(&mut self, tier: Tier) {
        if self.depth > 0 {
            warn!(
                "event=tier_drain module=loader status=skip tier={} reason=inside_task",
                tier
            );
            return;
        }
        if !self.scheduler.begin_drain(tier) {
            return;
        }

        info!(
            "event=tier_drain module=loader status=start tier={} queued={}",
            tier,
            self.scheduler.pending(tier)
        );
        let mut executed = 0usize;
        let mut failed = 0usize;
        while let Some(extension) = self.scheduler.next(tier) {
            executed += 1;
            if !self.execute(&extension, tier) {
                failed += 1;
            }
            self.run_immediate();
        }
        self.scheduler.finish_drain(tier);
        info!(
            "event=tier_drain module=loader status=ok tier={} executed={} failed={}",
            tier, executed, failed
        );
    }

    fn run_immediate(&mut self) {
        if self.depth > 0 {
            return;
        }
        while let Some((tier, extension)) = self.scheduler.next_immediate() {
            self.execute(&extension, tier);
        }
    }

    /// Runs one load task behind the isolation boundary. Returns success.
    fn execute(&mut self, extension: &str, tier: Tier) -> bool {
        self.registry.set_state(extension, ExtensionState::Running);

        self.depth += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_task(extension, tier)));
        self.depth -= 1;

        let result = outcome.unwrap_or_else(|payload| {
            Err(TaskError {
                extension: extension.to_string(),
                tier,
                failure: TaskFailure::Panicked(panic_message(payload.as_ref())),
            })
        });

        match result {
            Ok(()) => {
                self.registry.set_state(extension, ExtensionState::Loaded);
                info!(
                    "event=extension_load module=loader status=ok extension={} tier={}",
                    extension, tier
                );
                true
            }
            Err(err) => {
                error!(
                    "event=extension_load module=loader status=error extension={} tier={} error={}",
                    err.extension, err.tier, err
                );
                let reason = err.failure.to_string();
                let state = match err.failure {
                    TaskFailure::DependencyFailed(_) => ExtensionState::Skipped { reason },
                    _ => ExtensionState::Failed { reason },
                };
                self.registry.set_state(extension, state);
                false
            }
        }
    }

    /// Dependency check, install, post-install hook, configure.
    fn run_task(&mut self, extension: &str, tier: Tier) -> Result<(), TaskError> {
        let fail = |failure| TaskError {
            extension: extension.to_string(),
            tier,
            failure,
        };

        if let Some(dependency) = self.unloaded_dependency(extension) {
            return Err(fail(TaskFailure::DependencyFailed(dependency)));
        }
        self.install(extension).map_err(fail)?;
        setup::invoke_configure(self, extension, SetupTrigger::Startup)
            .map_err(|source| fail(TaskFailure::Configure(source)))?;
        Ok(())
    }

    fn unloaded_dependency(&self, extension: &str) -> Option<String> {
        let record = self.registry.get(extension)?;
        record
            .dependencies()
            .iter()
            .find(|dependency| self.state(dependency) != Some(&ExtensionState::Loaded))
            .cloned()
    }

    fn install(&mut self, extension: &str) -> Result<(), TaskFailure> {
        let Some(source) = self
            .registry
            .get(extension)
            .and_then(|record| record.source().map(str::to_string))
        else {
            return Ok(());
        };

        let outcome = self
            .installer
            .install(extension, &source)
            .map_err(TaskFailure::Install)?;
        if let Some(event) = outcome.hook_event() {
            self.fire_hook(extension, event).map_err(TaskFailure::Hook)?;
        }
        Ok(())
    }

    fn fire_hook(
        &mut self,
        extension: &str,
        event: HookEvent,
    ) -> Result<Option<HookOutcome>, HookError> {
        let Self {
            registry, hooks, ..
        } = self;
        let Some(hook) = registry
            .get_mut(extension)
            .and_then(|record| record.post_install.as_deref_mut())
        else {
            return Ok(None);
        };
        hooks
            .fire_once(extension, event, || {
                panic::catch_unwind(AssertUnwindSafe(|| hook(event))).unwrap_or_else(|payload| {
                    Err(format!("panicked: {}", panic_message(payload.as_ref())).into())
                })
            })
            .map(Some)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Serializable snapshot of one loader run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub has_file_argument: bool,
    pub now: TierState,
    pub later: TierState,
    /// Extensions in declaration order.
    pub extensions: Vec<ExtensionStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    pub name: String,
    pub tier: Option<Tier>,
    #[serde(flatten)]
    pub state: ExtensionState,
}

/// A load task failed. Caught at the drain boundary and never re-queued.
#[derive(Debug)]
pub struct TaskError {
    pub extension: String,
    pub tier: Tier,
    pub failure: TaskFailure,
}

impl Display for TaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "extension `{}` failed in {} tier: {}",
            self.extension, self.tier, self.failure
        )
    }
}

impl Error for TaskError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.failure.source()
    }
}

#[derive(Debug)]
pub enum TaskFailure {
    /// Named dependency did not load.
    DependencyFailed(String),
    Install(BoxError),
    Hook(HookError),
    Configure(BoxError),
    Panicked(String),
}

impl Display for TaskFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DependencyFailed(dependency) => {
                write!(f, "dependency `{dependency}` did not load")
            }
            Self::Install(err) => write!(f, "install failed: {err}"),
            Self::Hook(err) => write!(f, "{err}"),
            Self::Configure(err) => write!(f, "configure failed: {err}"),
            Self::Panicked(message) => write!(f, "panicked: {message}"),
        }
    }
}

impl Error for TaskFailure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Install(err) | Self::Configure(err) => Some(boxed_source(err)),
            Self::Hook(err) => Some(err),
            Self::DependencyFailed(_) | Self::Panicked(_) => None,
        }
    }
}

/// Errors from loader entry points used after startup.
#[derive(Debug)]
pub enum LoaderError {
    UnknownExtension(String),
    /// The extension's load task has not run to completion.
    NotLoaded {
        extension: String,
        state: ExtensionState,
    },
    Hook(HookError),
    Configure { extension: String, source: BoxError },
}

impl Display for LoaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownExtension(name) => write!(f, "extension not declared: {name}"),
            Self::NotLoaded { extension, state } => write!(
                f,
                "extension `{extension}` is {} and cannot be reloaded yet",
                state.as_str()
            ),
            Self::Hook(err) => write!(f, "{err}"),
            Self::Configure { extension, source } => {
                write!(f, "configure for `{extension}` failed: {source}")
            }
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::UnknownExtension(_) | Self::NotLoaded { .. } => None,
            Self::Hook(err) => Some(err),
            Self::Configure { source, .. } => Some(boxed_source(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{panic_message, Loader, LoaderError, TaskFailure};
    use crate::extension::declaration::{ExtensionDeclaration, LoadPolicy, Tier};
    use crate::extension::registry::ExtensionState;
    use crate::hooks::{HookEvent, HookOutcome};
    use crate::scheduler::TierState;
    use crate::startup::StartupContext;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn logging(name: &str, log: &Rc<RefCell<Vec<String>>>) -> ExtensionDeclaration {
        let log = Rc::clone(log);
        let label = name.to_string();
        ExtensionDeclaration::new(name).configure(move |_| {
            log.borrow_mut().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn checkpoint_then_idle_tick_drains_both_tiers() {
        let log = recorder();
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(logging("dashboard", &log).load(LoadPolicy::Now))
            .expect("declare dashboard");
        loader.declare(logging("gitsigns", &log)).expect("declare gitsigns");

        assert_eq!(loader.tier_state(Tier::Now), TierState::Pending);
        loader.checkpoint();
        assert_eq!(*log.borrow(), vec!["dashboard"]);
        assert_eq!(loader.tier_state(Tier::Now), TierState::Drained);
        assert_eq!(loader.state("gitsigns"), Some(&ExtensionState::Queued));

        loader.idle_tick();
        assert_eq!(*log.borrow(), vec!["dashboard", "gitsigns"]);
        assert_eq!(loader.tier_state(Tier::Later), TierState::Drained);
    }

    #[test]
    fn idle_tick_runs_a_skipped_checkpoint_first() {
        let log = recorder();
        let mut loader = Loader::new(StartupContext::new(false));
        loader.declare(logging("later", &log)).expect("declare later");
        loader
            .declare(logging("now", &log).load(LoadPolicy::Now))
            .expect("declare now");

        loader.idle_tick();
        assert_eq!(*log.borrow(), vec!["now", "later"]);
    }

    #[test]
    fn second_idle_tick_is_a_no_op() {
        let log = recorder();
        let mut loader = Loader::new(StartupContext::new(false));
        loader.declare(logging("a", &log)).expect("declare");
        loader.idle_tick();
        loader.idle_tick();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn panicking_configure_is_isolated() {
        let log = recorder();
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("broken").configure(|_| panic!("bad config")))
            .expect("declare broken");
        loader.declare(logging("fine", &log)).expect("declare fine");
        loader.idle_tick();

        assert_eq!(*log.borrow(), vec!["fine"]);
        match loader.state("broken") {
            Some(ExtensionState::Failed { reason }) => assert!(reason.contains("bad config")),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    #[test]
    fn dependents_of_failed_extension_are_skipped() {
        let log = recorder();
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("mason").configure(|_| Err("no network".into())))
            .expect("declare mason");
        loader
            .declare(logging("mason-lspconfig", &log).depends_on("mason"))
            .expect("declare dependent");
        loader.idle_tick();

        assert!(log.borrow().is_empty());
        assert!(matches!(
            loader.state("mason-lspconfig"),
            Some(ExtensionState::Skipped { .. })
        ));
    }

    #[test]
    fn install_event_fires_declared_hook_once() {
        let builds = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&builds);
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(
                ExtensionDeclaration::new("treesitter").post_install(move |event| {
                    sink.borrow_mut().push(event);
                    Ok(())
                }),
            )
            .expect("declare");

        for _ in 0..3 {
            loader
                .notify_install_event("treesitter", HookEvent::Update)
                .expect("notify");
        }
        assert_eq!(*builds.borrow(), vec![HookEvent::Update]);
        assert_eq!(
            loader
                .notify_install_event("treesitter", HookEvent::Install)
                .expect("install event"),
            Some(HookOutcome::Fired)
        );
    }

    #[test]
    fn install_event_without_hook_or_extension() {
        let mut loader = Loader::new(StartupContext::new(false));
        loader.declare(ExtensionDeclaration::new("plain")).expect("declare");
        assert_eq!(
            loader
                .notify_install_event("plain", HookEvent::Install)
                .expect("no hook"),
            None
        );
        let err = loader
            .notify_install_event("ghost", HookEvent::Install)
            .expect_err("unknown extension");
        assert!(matches!(err, LoaderError::UnknownExtension(_)));
    }

    #[test]
    fn report_lists_extensions_in_declaration_order() {
        let mut loader = Loader::new(StartupContext::new(true));
        loader
            .declare(ExtensionDeclaration::new("lsp").load(LoadPolicy::OnFileArgument))
            .expect("declare lsp");
        loader
            .declare(ExtensionDeclaration::new("cmp").depends_on("snippets"))
            .expect("declare cmp");
        loader.checkpoint();

        let report = loader.report();
        assert!(report.has_file_argument);
        assert_eq!(report.now, TierState::Drained);
        assert_eq!(report.later, TierState::Pending);
        let names: Vec<&str> = report.extensions.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["lsp", "cmp"]);
        assert_eq!(report.extensions[0].tier, Some(Tier::Now));
        assert_eq!(report.extensions[0].state, ExtensionState::Loaded);
        assert_eq!(report.extensions[1].tier, None);
        assert_eq!(report.extensions[1].state, ExtensionState::Blocked);
    }

    #[test]
    fn failure_display_names_the_dependency() {
        let failure = TaskFailure::DependencyFailed("plenary".to_string());
        assert_eq!(failure.to_string(), "dependency `plenary` did not load");
    }

    #[test]
    fn panic_message_reads_string_payloads() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
