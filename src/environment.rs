//! Operation dispatch
//!
//! The executor never touches disks itself. Every confirmed step is handed to
//! an `Environment`, which runs it and reports back once it has finished.
//!
//! # Contract
//!
//! - `dispatch` blocks until the operation is over.
//! - Failures come back as a `DispatchOutcome`, never as an error: the
//!   operator reads the tool's own output and decides whether to confirm the
//!   next step.
//! - `ShellEnvironment` keeps the child in the foreground process group with
//!   inherited stdio, so interactive tools like `cfdisk` own the terminal.

use crate::engine::plan::Step;
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// How a dispatched operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The command ran to completion (`None` if killed by a signal)
    Exited { code: Option<i32> },
    /// The command could not be started at all
    NotStarted { reason: String },
    /// Dry run: nothing was executed
    Simulated,
}

impl DispatchOutcome {
    /// Returns true if the operation ran and exited with status 0.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: Some(0) } | Self::Simulated)
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with status {}", code),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::NotStarted { reason } => write!(f, "could not be started: {}", reason),
            Self::Simulated => write!(f, "skipped (dry run)"),
        }
    }
}

/// The command-execution collaborator.
pub trait Environment {
    /// Run the step's operation and wait for it to finish.
    fn dispatch(&mut self, step: &Step) -> DispatchOutcome;
}

/// Runs each operation with `sh -c`, inheriting the console.
#[derive(Debug, Clone)]
pub struct ShellEnvironment {
    shell: PathBuf,
}

impl ShellEnvironment {
    pub fn new() -> Self {
        Self {
            shell: PathBuf::from("/bin/sh"),
        }
    }

    /// Use a different POSIX shell.
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for ShellEnvironment {
    fn dispatch(&mut self, step: &Step) -> DispatchOutcome {
        info!(
            "dispatch step {}: {} -c {:?}",
            step.ordinal,
            self.shell.display(),
            step.command
        );

        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(&step.command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status();

        match status {
            Ok(status) => {
                let outcome = DispatchOutcome::Exited {
                    code: status.code(),
                };
                if outcome.is_success() {
                    info!("Step {} completed", step.ordinal);
                } else {
                    warn!("Step {} {}", step.ordinal, outcome);
                }
                outcome
            }
            Err(e) => {
                warn!("Step {} could not be started: {}", step.ordinal, e);
                DispatchOutcome::NotStarted {
                    reason: e.to_string(),
                }
            }
        }
    }
}

/// Prints each operation instead of running it.
#[derive(Debug)]
pub struct DryRunEnvironment<W: Write> {
    out: W,
}

impl<W: Write> DryRunEnvironment<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Environment for DryRunEnvironment<W> {
    fn dispatch(&mut self, step: &Step) -> DispatchOutcome {
        info!("dry run, skipping step {}", step.ordinal);
        if let Err(e) = writeln!(self.out, "[dry-run] would run: {}", step.command) {
            warn!("Failed to write dry-run output: {}", e);
        }
        DispatchOutcome::Simulated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::plan::{Phase, StorageOp};

    fn step(command: &str) -> Step {
        Step {
            ordinal: 1,
            phase: Phase::Layout,
            description: "test step".to_string(),
            command: command.to_string(),
            op: StorageOp::CreateDirectories { paths: Vec::new() },
        }
    }

    #[test]
    fn test_shell_reports_exit_status() {
        let mut env = ShellEnvironment::new();
        assert_eq!(env.dispatch(&step("true")), DispatchOutcome::Exited { code: Some(0) });
        assert_eq!(env.dispatch(&step("exit 7")), DispatchOutcome::Exited { code: Some(7) });
    }

    #[test]
    fn test_shell_missing_is_not_started() {
        let mut env = ShellEnvironment::with_shell("/nonexistent/shell");
        let outcome = env.dispatch(&step("true"));
        assert!(matches!(outcome, DispatchOutcome::NotStarted { .. }));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_dry_run_prints_command() {
        let mut env = DryRunEnvironment::new(Vec::new());
        let outcome = env.dispatch(&step("sgdisk --zap-all /dev/vda"));
        assert_eq!(outcome, DispatchOutcome::Simulated);
        let out = String::from_utf8(env.into_inner()).expect("utf8");
        assert_eq!(out, "[dry-run] would run: sgdisk --zap-all /dev/vda\n");
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            DispatchOutcome::Exited { code: Some(1) }.to_string(),
            "exited with status 1"
        );
        assert_eq!(DispatchOutcome::Simulated.to_string(), "skipped (dry run)");
    }
}
