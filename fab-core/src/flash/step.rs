use fab_error::ProvisionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Which microcontroller a step talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    S3,
    H2,
}

impl Target {
    pub fn label(&self) -> &'static str {
        match self {
            Target::S3 => "s3",
            Target::H2 => "h2",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    WriteCertificate,
    WriteFirmware,
    /// Leave the bootloader and run the application.
    Run,
    ReadMac,
}

impl OperationKind {
    pub fn subcommand(&self) -> &'static str {
        match self {
            OperationKind::WriteCertificate | OperationKind::WriteFirmware => "write_flash",
            OperationKind::Run => "run",
            OperationKind::ReadMac => "read_mac",
        }
    }

    /// Whether success requires the tool's hard-reset confirmation.
    pub fn expects_reset_sentinel(&self) -> bool {
        matches!(
            self,
            OperationKind::WriteCertificate | OperationKind::WriteFirmware
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::WriteCertificate => "write-certificate",
            OperationKind::WriteFirmware => "write-firmware",
            OperationKind::Run => "run",
            OperationKind::ReadMac => "read-mac",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub address: String,
    pub image: PathBuf,
}

/// One invocation of the flashing tool. Built once from resolved config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashStep {
    target: Target,
    kind: OperationKind,
    pairs: Vec<ImagePair>,
    port: String,
    baud: u32,
}

impl FlashStep {
    pub fn new(
        target: Target,
        kind: OperationKind,
        pairs: Vec<ImagePair>,
        port: impl Into<String>,
        baud: u32,
    ) -> Self {
        Self {
            target,
            kind,
            pairs,
            port: port.into(),
            baud,
        }
    }

    /// A step without images (`run`, `read_mac`).
    pub fn one_shot(target: Target, kind: OperationKind, port: impl Into<String>, baud: u32) -> Self {
        Self::new(target, kind, Vec::new(), port, baud)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn pairs(&self) -> &[ImagePair] {
        &self.pairs
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// `--port <PORT> --baud <BAUD> <subcommand> [<address> <image>]...`
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--port".to_string(),
            self.port.clone(),
            "--baud".to_string(),
            self.baud.to_string(),
            self.kind.subcommand().to_string(),
        ];
        for pair in &self.pairs {
            args.push(pair.address.clone());
            args.push(pair.image.display().to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    /// The tool exited cleanly but did not confirm the write.
    Failure,
    /// The tool could not run or exited non-zero.
    Error,
}

/// Outcome of one [`FlashStep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub target: Target,
    pub kind: OperationKind,
    pub status: StepStatus,
    /// Last lines of stdout, oldest first.
    pub stdout_tail: Vec<String>,
    /// Verbatim stderr, kept when the step did not succeed.
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub failure: Option<ProvisionError>,
}

impl StepResult {
    pub fn pending(step: &FlashStep) -> Self {
        Self {
            target: step.target(),
            kind: step.kind(),
            status: StepStatus::Pending,
            stdout_tail: Vec::new(),
            stderr: None,
            exit_code: None,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    /// Text for the display layer: the failure plus whatever stderr was captured.
    pub fn detail(&self) -> Option<String> {
        match (&self.failure, &self.stderr) {
            (Some(ProvisionError::ProcessExitError { .. }), _) => {
                self.failure.as_ref().map(ToString::to_string)
            }
            (Some(failure), Some(stderr)) if !stderr.trim().is_empty() => {
                Some(format!("{}: {}", failure, stderr))
            }
            (Some(failure), _) => Some(failure.to_string()),
            (None, _) => None,
        }
    }
}
