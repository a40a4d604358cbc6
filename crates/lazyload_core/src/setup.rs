//! Configure entry-point invocation.
//!
//! # Invariants
//! - Startup invokes each extension's configure callback at most once.
//! - Manual reloads always re-run the callback; idempotence inside the
//!   callback is the extension's own business.

use crate::loader::Loader;
use crate::BoxError;
use log::debug;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};

/// Why configure is being invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupTrigger {
    /// Automatic call from the extension's load task.
    Startup,
    /// User-requested re-run, e.g. after editing the config.
    Reload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupOutcome {
    Configured,
    AlreadyConfigured,
    NoConfigure,
}

/// Calls the configure callback of `extension`.
///
/// The callback is moved out of its record for the duration of the call so it
/// can freely use the loader, then put back for later reloads. A panic is
/// re-raised only after the callback is back in place.
pub(crate) fn invoke_configure(
    loader: &mut Loader,
    extension: &str,
    trigger: SetupTrigger,
) -> Result<SetupOutcome, BoxError> {
    let Some(record) = loader.registry.get_mut(extension) else {
        return Ok(SetupOutcome::NoConfigure);
    };
    if trigger == SetupTrigger::Startup && record.auto_configured {
        debug!(
            "event=extension_configure module=setup status=skip extension={} reason=already_configured",
            extension
        );
        return Ok(SetupOutcome::AlreadyConfigured);
    }
    let Some(mut configure) = record.configure.take() else {
        return Ok(SetupOutcome::NoConfigure);
    };
    if trigger == SetupTrigger::Startup {
        record.auto_configured = true;
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| configure(loader)));
    if let Some(record) = loader.registry.get_mut(extension) {
        record.configure = Some(configure);
    }
    match result {
        Ok(result) => result.map(|()| SetupOutcome::Configured),
        Err(payload) => panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::{invoke_configure, SetupOutcome, SetupTrigger};
    use crate::extension::declaration::ExtensionDeclaration;
    use crate::loader::Loader;
    use crate::startup::StartupContext;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn startup_configures_once_and_reload_reruns() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("lualine").configure(move |_| {
                counter.set(counter.get() + 1);
                Ok(())
            }))
            .expect("declare");

        let first = invoke_configure(&mut loader, "lualine", SetupTrigger::Startup).expect("first");
        let second = invoke_configure(&mut loader, "lualine", SetupTrigger::Startup).expect("second");
        let reload = invoke_configure(&mut loader, "lualine", SetupTrigger::Reload).expect("reload");

        assert_eq!(first, SetupOutcome::Configured);
        assert_eq!(second, SetupOutcome::AlreadyConfigured);
        assert_eq!(reload, SetupOutcome::Configured);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn missing_callback_is_a_no_op() {
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("devicons"))
            .expect("declare");

        let outcome =
            invoke_configure(&mut loader, "devicons", SetupTrigger::Startup).expect("no-op");
        assert_eq!(outcome, SetupOutcome::NoConfigure);
        let outcome = invoke_configure(&mut loader, "unknown", SetupTrigger::Reload).expect("no-op");
        assert_eq!(outcome, SetupOutcome::NoConfigure);
    }

    #[test]
    fn callback_survives_its_own_error() {
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("lsp").configure(|_| Err("server missing".into())))
            .expect("declare");

        let err = invoke_configure(&mut loader, "lsp", SetupTrigger::Startup)
            .expect_err("configure error must propagate");
        assert_eq!(err.to_string(), "server missing");
        let err = invoke_configure(&mut loader, "lsp", SetupTrigger::Reload)
            .expect_err("reload runs the callback again");
        assert_eq!(err.to_string(), "server missing");
    }

    #[test]
    fn callback_survives_its_own_panic() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let mut loader = Loader::new(StartupContext::new(false));
        loader
            .declare(ExtensionDeclaration::new("flaky").configure(move |_| {
                counter.set(counter.get() + 1);
                if counter.get() == 1 {
                    panic!("first run breaks");
                }
                Ok(())
            }))
            .expect("declare");

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            invoke_configure(&mut loader, "flaky", SetupTrigger::Startup)
        }));
        assert!(unwound.is_err());

        let outcome =
            invoke_configure(&mut loader, "flaky", SetupTrigger::Reload).expect("reload");
        assert_eq!(outcome, SetupOutcome::Configured);
        assert_eq!(calls.get(), 2);
    }
}
