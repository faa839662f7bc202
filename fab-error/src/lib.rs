use std::io;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("Failed to open serial port {port}: {reason}")]
    SerialOpen { port: String, reason: String },

    #[error("Serial I/O error: {0}")]
    SerialIo(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure taxonomy for one provisioning run.
///
/// Leaf components never raise these into the caller's control flow; they are
/// carried inside result values so the display layer gets the full text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Process exited with {}: {stderr}", exit_status(.exit_code))]
    ProcessExitError {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Process timed out: {program} after {timeout_secs}s")]
    ProcessTimeout { program: String, timeout_secs: u64 },

    #[error("Tool exited cleanly but never confirmed the hard reset")]
    SentinelNotObserved,

    #[error("Failed to open serial port {port}: {reason}")]
    SerialOpenError { port: String, reason: String },

    #[error("Serial read error: {0}")]
    SerialReadError(String),

    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),
}

fn exit_status(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "signal".to_string(),
    }
}

impl ProvisionError {
    /// Map a HAL failure raised while spawning/waiting on an external tool.
    pub fn from_process(program: &str, err: HalError) -> Self {
        match err {
            HalError::CommandTimeout {
                program,
                timeout_secs,
            } => ProvisionError::ProcessTimeout {
                program,
                timeout_secs,
            },
            other => ProvisionError::SpawnFailed {
                program: program.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Map a HAL failure raised by the serial line.
    pub fn from_serial(port: &str, err: HalError) -> Self {
        match err {
            HalError::SerialOpen { port, reason } => {
                ProvisionError::SerialOpenError { port, reason }
            }
            HalError::CommandNotFound(_) | HalError::CommandTimeout { .. } => {
                ProvisionError::SerialOpenError {
                    port: port.to_string(),
                    reason: err.to_string(),
                }
            }
            other => ProvisionError::SerialReadError(other.to_string()),
        }
    }
}
