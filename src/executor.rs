//! Confirmation Executor
//!
//! Walks a `Plan` one step at a time. Before each step the operator sees the
//! description and the exact command, and must answer `y` or `yes` (any case).
//! Any other answer, an empty line, a line that is not UTF-8, or end of input
//! halts the run for good. So does a console read error, which is then
//! returned to the caller.
//!
//! # State Flow
//!
//! ```text
//! Running ──(refusal)──> Halted
//! ```
//!
//! `Halted` is terminal: a halted executor dispatches nothing, whatever input
//! follows. A failed operation does *not* halt; the outcome is printed and
//! the operator decides at the next prompt.

use crate::engine::plan::{Plan, Step};
use crate::environment::Environment;
use crossterm::style::{style, Stylize};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use strum::Display;
use tracing::{debug, info, warn};

/// Execution state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum ExecutionState {
    /// Steps are still being offered
    Running,
    /// The operator refused a step (terminal)
    Halted,
}

impl ExecutionState {
    #[inline]
    pub const fn is_halted(self) -> bool {
        matches!(self, Self::Halted)
    }
}

/// Returns true if `input` confirms a step: `y` or `yes`, case-insensitive.
///
/// Only the line terminator is stripped; ` y` and `yep` are refusals.
pub fn is_confirmation(input: &str) -> bool {
    let answer = input.trim_end_matches(&['\r', '\n'][..]);
    answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

/// What happened during `Executor::run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub state: ExecutionState,
    /// Number of steps handed to the environment
    pub dispatched: usize,
    /// Number of steps in the plan
    pub total: usize,
    /// Ordinals of dispatched steps that did not succeed
    pub failed: Vec<usize>,
    /// Ordinal of the refused step, if the run halted
    pub halted_at: Option<usize>,
}

impl RunReport {
    /// Returns true if every step was confirmed and dispatched.
    pub fn is_complete(&self) -> bool {
        !self.state.is_halted() && self.dispatched == self.total
    }
}

/// Confirm-then-dispatch loop over a plan.
pub struct Executor<R, W, E> {
    input: R,
    output: W,
    env: E,
    state: ExecutionState,
    styled: bool,
}

impl<R: BufRead, W: Write, E: Environment> Executor<R, W, E> {
    pub fn new(input: R, output: W, env: E) -> Self {
        Self {
            input,
            output,
            env,
            state: ExecutionState::Running,
            styled: false,
        }
    }

    /// Enable terminal styling of the prompt.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn environment(&self) -> &E {
        &self.env
    }

    pub fn into_environment(self) -> E {
        self.env
    }

    /// Offer every step of `plan` in order.
    ///
    /// # Errors
    ///
    /// Only console I/O failures, after which the executor is halted. Refusal
    /// is reported through `RunReport::state`, and operation failures through
    /// `RunReport::failed`.
    pub fn run(&mut self, plan: Plan) -> io::Result<RunReport> {
        let mut report = RunReport {
            state: self.state,
            dispatched: 0,
            total: plan.len(),
            failed: Vec::new(),
            halted_at: None,
        };

        if self.state.is_halted() {
            warn!("Executor is halted; refusing to offer {} steps", plan.len());
            return Ok(report);
        }

        for step in plan.steps {
            let mut line = Vec::new();
            let read = match self
                .present(&step, report.total)
                .and_then(|()| self.input.read_until(b'\n', &mut line))
            {
                Ok(read) => read,
                Err(e) => {
                    self.state = ExecutionState::Halted;
                    warn!("Console I/O failed at step {}: {}", step.ordinal, e);
                    return Err(e);
                }
            };
            let confirmed = read > 0 && std::str::from_utf8(&line).is_ok_and(is_confirmation);
            if !confirmed {
                debug!(
                    "Answer {:?} for step {} is not a confirmation",
                    String::from_utf8_lossy(&line),
                    step.ordinal
                );
                self.state = ExecutionState::Halted;
                report.halted_at = Some(step.ordinal);
                info!("Halted at step {} by operator", step.ordinal);
                writeln!(
                    self.output,
                    "Halted at step {}. No further commands will be run.",
                    step.ordinal
                )?;
                break;
            }

            let outcome = self.env.dispatch(&step);
            report.dispatched += 1;
            if !outcome.is_success() {
                report.failed.push(step.ordinal);
                writeln!(self.output, "Step {} {}", step.ordinal, outcome)?;
            }
        }

        report.state = self.state;
        Ok(report)
    }

    fn present(&mut self, step: &Step, total: usize) -> io::Result<()> {
        let counter = format!("[{}/{}]", step.ordinal, total);
        if self.styled {
            writeln!(
                self.output,
                "\n{} {}",
                style(&counter).dark_grey(),
                style(&step.description).bold()
            )?;
            write!(
                self.output,
                "Run command: `{}` ? [Y/N] ",
                style(&step.command).cyan()
            )?;
        } else {
            writeln!(self.output, "\n{} {}", counter, step.description)?;
            write!(self.output, "Run command: `{}` ? [Y/N] ", step.command)?;
        }
        self.output.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::DispatchOutcome;
    use crate::engine::plan::{Phase, StorageOp};
    use std::io::{BufReader, Cursor, Read};

    #[derive(Default)]
    struct Recorder {
        commands: Vec<String>,
    }

    impl Environment for Recorder {
        fn dispatch(&mut self, step: &Step) -> DispatchOutcome {
            self.commands.push(step.command.clone());
            DispatchOutcome::Exited { code: Some(0) }
        }
    }

    fn plan_of(n: usize) -> Plan {
        let steps = (1..=n)
            .map(|i| Step {
                ordinal: i,
                phase: Phase::Layout,
                description: format!("step {}", i),
                command: format!("cmd-{}", i),
                op: StorageOp::CreateDirectories { paths: Vec::new() },
            })
            .collect();
        Plan {
            disk: "/dev/vda".into(),
            firmware: crate::hardware::FirmwareMode::Uefi,
            steps,
        }
    }

    #[test]
    fn test_confirmation_matching() {
        for yes in ["y", "Y", "yes", "YES", "Yes", "yEs", "y\n", "yes\r\n"] {
            assert!(is_confirmation(yes), "{:?} should confirm", yes);
        }
        for no in ["", "\n", "n", "no", "N", "yep", " y", "y ", "ye", "yess", "oui"] {
            assert!(!is_confirmation(no), "{:?} should refuse", no);
        }
    }

    #[test]
    fn test_prompt_format() {
        let mut exec = Executor::new(Cursor::new("n\n"), Vec::new(), Recorder::default());
        exec.run(plan_of(1)).expect("run");
        let out = String::from_utf8(exec.output.clone()).expect("utf8");
        assert!(out.contains("[1/1] step 1"));
        assert!(out.contains("Run command: `cmd-1` ? [Y/N] "));
        assert!(out.contains("Halted at step 1."));
    }

    #[test]
    fn test_non_utf8_answer_halts() {
        let input = Cursor::new(vec![0xff, 0xfe, b'\n', b'y', b'\n']);
        let mut exec = Executor::new(input, Vec::new(), Recorder::default());
        let report = exec.run(plan_of(2)).expect("invalid bytes are a refusal");
        assert_eq!(report.halted_at, Some(1));
        assert_eq!(report.dispatched, 0);
        assert_eq!(exec.state(), ExecutionState::Halted);
    }

    struct Unreadable;

    impl Read for Unreadable {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("console gone"))
        }
    }

    #[test]
    fn test_read_error_halts_before_propagating() {
        let mut exec = Executor::new(BufReader::new(Unreadable), Vec::new(), Recorder::default());
        assert!(exec.run(plan_of(2)).is_err());
        assert_eq!(exec.state(), ExecutionState::Halted);

        let again = exec.run(plan_of(2)).expect("halted executor does not read");
        assert_eq!(again.dispatched, 0);
        assert!(exec.environment().commands.is_empty());
    }

    #[test]
    fn test_eof_halts() {
        let mut exec = Executor::new(Cursor::new("y\n"), Vec::new(), Recorder::default());
        let report = exec.run(plan_of(3)).expect("run");
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.halted_at, Some(2));
        assert_eq!(exec.state(), ExecutionState::Halted);
    }

    #[test]
    fn test_halted_executor_never_dispatches() {
        let mut exec = Executor::new(Cursor::new("no\ny\ny\ny\n"), Vec::new(), Recorder::default());
        let first = exec.run(plan_of(3)).expect("run");
        assert_eq!(first.dispatched, 0);

        let second = exec.run(plan_of(3)).expect("run");
        assert_eq!(second.state, ExecutionState::Halted);
        assert_eq!(second.dispatched, 0);
        assert!(exec.environment().commands.is_empty());
    }
}
