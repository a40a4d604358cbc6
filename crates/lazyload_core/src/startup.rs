//! Startup context detection.
//!
//! # Responsibility
//! - Decide whether the editor was launched with a target file.
//!
//! # Invariants
//! - Process arguments are inspected at most once per process.
//! - The detected context never changes after the first `detect` call.

use log::info;
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::ffi::OsStr;

static DETECTED: OnceCell<StartupContext> = OnceCell::new();

/// Immutable snapshot of how the editor was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StartupContext {
    has_file_argument: bool,
}

impl StartupContext {
    pub fn new(has_file_argument: bool) -> Self {
        Self { has_file_argument }
    }

    /// Detects the context from the current process arguments.
    ///
    /// The first call reads `std::env::args_os`; every later call returns the
    /// cached snapshot.
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let context = Self::from_args(std::env::args_os().skip(1));
            info!(
                "event=startup_detect module=startup status=ok has_file_argument={}",
                context.has_file_argument
            );
            context
        })
    }

    /// Builds a context from an argument list that excludes the program name.
    ///
    /// Arguments starting with `-` or `+` are editor flags. Everything after a
    /// literal `--` is treated as a file.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut after_separator = false;
        for arg in args {
            let arg = arg.as_ref();
            if arg.is_empty() {
                continue;
            }
            if after_separator {
                return Self::new(true);
            }
            if arg == "--" {
                after_separator = true;
                continue;
            }
            let text = arg.to_string_lossy();
            if text.starts_with('-') || text.starts_with('+') {
                continue;
            }
            return Self::new(true);
        }
        Self::new(false)
    }

    pub fn has_file_argument(&self) -> bool {
        self.has_file_argument
    }
}

#[cfg(test)]
mod tests {
    use super::StartupContext;

    #[test]
    fn no_arguments_means_no_file() {
        let context = StartupContext::from_args(Vec::<String>::new());
        assert!(!context.has_file_argument());
    }

    #[test]
    fn plain_argument_is_a_file() {
        let context = StartupContext::from_args(["src/main.rs"]);
        assert!(context.has_file_argument());
    }

    #[test]
    fn flags_and_commands_are_not_files() {
        let context = StartupContext::from_args(["-R", "--clean", "+checkhealth", ""]);
        assert!(!context.has_file_argument());
    }

    #[test]
    fn arguments_after_separator_are_files() {
        let context = StartupContext::from_args(["--", "-dash-named-file"]);
        assert!(context.has_file_argument());

        let context = StartupContext::from_args(["--"]);
        assert!(!context.has_file_argument());
    }

    #[test]
    fn detect_is_cached() {
        let first = StartupContext::detect();
        let second = StartupContext::detect();
        assert_eq!(first, second);
    }
}
