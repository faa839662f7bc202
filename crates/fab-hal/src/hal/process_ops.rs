//! External tool execution.
//!
//! The flashing tool is "world-touching" and must go through the HAL so we can
//! test provisioning runs without spawning real processes.

use crate::HalResult;
use std::time::Duration;

/// How a finished process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    /// Everything the process wrote to stderr, untrimmed.
    pub stderr: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Run `program`, streaming stdout line-by-line into `on_stdout_line` as it arrives.
    ///
    /// A non-zero exit is reported through [`ProcessExit`], not as an error. Errors are
    /// reserved for spawn failures and for exceeding `timeout` (the child is killed).
    fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        on_stdout_line: &mut dyn FnMut(&str),
    ) -> HalResult<ProcessExit>;

    /// Convenience wrapper collecting stdout lines.
    fn run_collect(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> HalResult<(Vec<String>, ProcessExit)> {
        let mut lines = Vec::new();
        let exit = self.run_streaming(program, args, timeout, &mut |line| {
            lines.push(line.to_string())
        })?;
        Ok((lines, exit))
    }
}
