//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without touching hardware and
//! answers from scripts, allowing CI-safe testing of whole provisioning runs.

use super::{ImageOps, ProcessExit, ProcessOps, SerialLink, SerialOps};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        program: String,
        args: Vec<String>,
        timeout_secs: u64,
    },
    SerialOpen {
        port: String,
        baud: u32,
    },
    SerialWrite {
        port: String,
        line: String,
    },
    SerialClose {
        port: String,
    },
    LocateImage {
        dir: PathBuf,
        keyword: String,
    },
    ListPorts,
}

/// Canned behaviour of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedProcess {
    pub stdout: Vec<String>,
    pub stderr: String,
    pub code: Option<i32>,
    /// Simulate the binary being absent (spawn failure).
    pub missing: bool,
}

impl ScriptedProcess {
    /// Clean exit printing `stdout`.
    pub fn ok<I, S>(stdout: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stdout: stdout.into_iter().map(Into::into).collect(),
            stderr: String::new(),
            code: Some(0),
            missing: false,
        }
    }

    /// Non-zero exit with `stderr`.
    pub fn exit(code: i32, stderr: &str) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.to_string(),
            code: Some(code),
            missing: false,
        }
    }

    pub fn missing() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: String::new(),
            code: None,
            missing: true,
        }
    }

    pub fn with_stdout<I, S>(mut self, stdout: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdout = stdout.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone)]
struct CommandRule {
    tokens: Vec<String>,
    response: ScriptedProcess,
}

#[derive(Debug, Clone, Default)]
struct SerialScript {
    lines: Vec<String>,
    trailing_error: Option<String>,
}

/// Shared state for FakeHal operations.
#[derive(Debug, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    command_rules: Vec<CommandRule>,
    serial_scripts: HashMap<String, SerialScript>,
    unopenable_ports: HashSet<String>,
    unwritable_ports: HashSet<String>,
    images: HashMap<(PathBuf, String), PathBuf>,
    ports: Vec<String>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// Commands with no matching rule exit 0 with no output, like a tool that ran
/// but printed nothing useful.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

fn lock(state: &Mutex<FakeHalState>) -> MutexGuard<'_, FakeHalState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command whose arguments contain all `tokens` (substring match
    /// per token) with `response`. The first matching rule wins.
    pub fn script_command(&self, tokens: &[&str], response: ScriptedProcess) {
        lock(&self.state).command_rules.push(CommandRule {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            response,
        });
    }

    /// Bytes the device on `port` will send once opened. Only newline-terminated
    /// lines are delivered; afterwards reads time out.
    pub fn script_serial(&self, port: &str, bytes: &[u8]) {
        let mut state = lock(&self.state);
        let script = state.serial_scripts.entry(port.to_string()).or_default();
        script.lines = split_lines(bytes);
    }

    /// After the scripted lines are exhausted, the next read fails with `message`.
    pub fn script_serial_error(&self, port: &str, message: &str) {
        let mut state = lock(&self.state);
        let script = state.serial_scripts.entry(port.to_string()).or_default();
        script.trailing_error = Some(message.to_string());
    }

    /// Opening `port` fails.
    pub fn fail_serial_open(&self, port: &str) {
        lock(&self.state)
            .unopenable_ports
            .insert(port.to_string());
    }

    /// Every write on `port` fails; nothing is recorded.
    pub fn fail_serial_write(&self, port: &str) {
        lock(&self.state)
            .unwritable_ports
            .insert(port.to_string());
    }

    pub fn add_image(&self, dir: impl Into<PathBuf>, keyword: &str, path: impl Into<PathBuf>) {
        lock(&self.state)
            .images
            .insert((dir.into(), keyword.to_string()), path.into());
    }

    pub fn set_ports(&self, ports: &[&str]) {
        lock(&self.state).ports = ports.iter().map(|p| p.to_string()).collect();
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.state).operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        lock(&self.state).operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        lock(&self.state).operations.iter().any(check)
    }

    /// Argument lists of every recorded command, in call order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        lock(&self.state)
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Command { args, .. } => Some(args.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded commands whose arguments contain all `tokens`.
    pub fn command_count(&self, tokens: &[&str]) -> usize {
        self.commands()
            .iter()
            .filter(|args| args_match(args, tokens))
            .count()
    }

    pub fn serial_writes(&self, port: &str) -> Vec<String> {
        lock(&self.state)
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::SerialWrite { port: p, line } if p == port => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn serial_close_count(&self, port: &str) -> usize {
        lock(&self.state)
            .operations
            .iter()
            .filter(|op| matches!(op, Operation::SerialClose { port: p } if p == port))
            .count()
    }

    /// Clear all recorded operations (scripts are kept).
    pub fn clear(&self) {
        lock(&self.state).operations.clear();
    }

    fn record_operation(&self, op: Operation) {
        lock(&self.state).operations.push(op);
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|l| l.trim_end_matches('\r').to_string())
        .collect();
    // The last segment is either empty (terminated input) or an unterminated tail.
    lines.pop();
    lines
}

fn args_match(args: &[String], tokens: &[&str]) -> bool {
    tokens
        .iter()
        .all(|token| args.iter().any(|arg| arg.contains(token)))
}

impl ProcessOps for FakeHal {
    fn run_streaming(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
        on_stdout_line: &mut dyn FnMut(&str),
    ) -> HalResult<ProcessExit> {
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.to_vec(),
            timeout_secs: timeout.as_secs(),
        });
        log::info!("FAKE HAL: {} {}", program, args.join(" "));

        let response = {
            let state = lock(&self.state);
            state
                .command_rules
                .iter()
                .find(|rule| {
                    let tokens: Vec<&str> = rule.tokens.iter().map(String::as_str).collect();
                    args_match(args, &tokens)
                })
                .map(|rule| rule.response.clone())
        };
        let response = response.unwrap_or_else(|| ScriptedProcess::ok(Vec::<String>::new()));

        if response.missing {
            return Err(HalError::CommandNotFound(program.to_string()));
        }
        for line in &response.stdout {
            on_stdout_line(line);
        }
        Ok(ProcessExit {
            code: response.code,
            stderr: response.stderr,
        })
    }
}

/// Scripted serial line; writes and close are recorded on the owning FakeHal.
struct FakeSerialLink {
    port: String,
    lines: VecDeque<String>,
    trailing_error: Option<String>,
    fail_writes: bool,
    read_timeout: Duration,
    hal: FakeHal,
}

impl SerialLink for FakeSerialLink {
    fn read_line(&mut self) -> HalResult<Option<String>> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if let Some(message) = self.trailing_error.take() {
            return Err(HalError::SerialIo(message));
        }
        std::thread::sleep(self.read_timeout);
        Ok(None)
    }

    fn write_line(&mut self, line: &str) -> HalResult<()> {
        if self.fail_writes {
            return Err(HalError::SerialIo(format!("{}: write failed", self.port)));
        }
        self.hal.record_operation(Operation::SerialWrite {
            port: self.port.clone(),
            line: line.to_string(),
        });
        Ok(())
    }
}

impl Drop for FakeSerialLink {
    fn drop(&mut self) {
        self.hal.record_operation(Operation::SerialClose {
            port: self.port.clone(),
        });
    }
}

impl SerialOps for FakeHal {
    fn open_serial(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> HalResult<Box<dyn SerialLink>> {
        let (script, fail_writes) = {
            let state = lock(&self.state);
            if state.unopenable_ports.contains(port) {
                return Err(HalError::SerialOpen {
                    port: port.to_string(),
                    reason: "No such file or directory".to_string(),
                });
            }
            (
                state.serial_scripts.get(port).cloned().unwrap_or_default(),
                state.unwritable_ports.contains(port),
            )
        };
        self.record_operation(Operation::SerialOpen {
            port: port.to_string(),
            baud,
        });
        Ok(Box::new(FakeSerialLink {
            port: port.to_string(),
            lines: script.lines.into(),
            trailing_error: script.trailing_error,
            fail_writes,
            read_timeout,
            hal: self.clone(),
        }))
    }

    fn list_serial_ports(&self) -> HalResult<Vec<String>> {
        self.record_operation(Operation::ListPorts);
        Ok(lock(&self.state).ports.clone())
    }
}

impl ImageOps for FakeHal {
    fn locate_image(&self, dir: &Path, keyword: &str) -> HalResult<Option<PathBuf>> {
        self.record_operation(Operation::LocateImage {
            dir: dir.to_path_buf(),
            keyword: keyword.to_string(),
        });
        Ok(lock(&self.state)
            .images
            .get(&(dir.to_path_buf(), keyword.to_string()))
            .cloned())
    }
}
