//! Per-unit provisioning report.
//!
//! One entry per check, each moving Pending -> Pass/Fail at most once. The
//! report is shared between the sequencer and the handshake monitor, can be
//! polled or subscribed to, and is frozen once the run finishes.

use crate::errors;
use crate::flash::Target;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

const REPORT_VERSION: u32 = 1;

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Check {
    S3CertificateFlash,
    S3FirmwareFlash,
    S3Reboot,
    S3FactoryMode,
    H2FirmwareFlash,
}

impl Check {
    pub const ALL: [Check; 5] = [
        Check::S3CertificateFlash,
        Check::S3FirmwareFlash,
        Check::S3Reboot,
        Check::S3FactoryMode,
        Check::H2FirmwareFlash,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Check::S3CertificateFlash => "s3-certificate-flash",
            Check::S3FirmwareFlash => "s3-firmware-flash",
            Check::S3Reboot => "s3-reboot",
            Check::S3FactoryMode => "s3-factory-mode",
            Check::H2FirmwareFlash => "h2-firmware-flash",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Pending,
    Pass,
    Fail,
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckOutcome::Pending => "PENDING",
            CheckOutcome::Pass => "PASS",
            CheckOutcome::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub outcome: CheckOutcome,
    /// Failure text for display, verbatim.
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub updated_at_unix_ms: Option<u64>,
}

impl CheckEntry {
    fn pending() -> Self {
        Self {
            outcome: CheckOutcome::Pending,
            detail: None,
            updated_at_unix_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacReport {
    pub s3: Option<String>,
    pub h2: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub report_version: u32,
    pub order_id: Option<String>,
    pub started_at_unix_ms: u64,
    pub finished_at_unix_ms: Option<u64>,
    /// Keyed by check name.
    pub checks: BTreeMap<String, CheckEntry>,
    pub macs: MacReport,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportUpdate {
    pub check: Check,
    pub outcome: CheckOutcome,
    pub detail: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("{check} is already {current}")]
    AlreadyResolved { check: Check, current: CheckOutcome },

    #[error("{0} cannot be set back to PENDING")]
    InvalidTransition(Check),

    #[error("report is finalized")]
    Finalized,
}

struct ReportState {
    order_id: Option<String>,
    started_at_unix_ms: u64,
    finished_at_unix_ms: Option<u64>,
    checks: BTreeMap<Check, CheckEntry>,
    macs: MacReport,
    subscribers: Vec<Sender<ReportUpdate>>,
}

impl ReportState {
    fn passed(&self) -> bool {
        self.checks
            .values()
            .all(|entry| entry.outcome == CheckOutcome::Pass)
    }
}

/// Cloneable handle; all clones see the same report.
#[derive(Clone)]
pub struct ProvisioningReport {
    inner: Arc<Mutex<ReportState>>,
}

impl fmt::Debug for ProvisioningReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisioningReport")
            .field("checks", &self.get_all())
            .finish()
    }
}

impl ProvisioningReport {
    pub fn new(order_id: Option<String>) -> Self {
        let checks = Check::ALL
            .iter()
            .map(|check| (*check, CheckEntry::pending()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(ReportState {
                order_id,
                started_at_unix_ms: now_unix_ms(),
                finished_at_unix_ms: None,
                checks,
                macs: MacReport::default(),
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set(&self, check: Check, outcome: CheckOutcome) -> Result<(), ReportError> {
        self.set_with_detail(check, outcome, None)
    }

    /// Resolve a Pending check. A resolved check keeps its first value and the
    /// call returns `AlreadyResolved`.
    pub fn set_with_detail(
        &self,
        check: Check,
        outcome: CheckOutcome,
        detail: Option<String>,
    ) -> Result<(), ReportError> {
        if outcome == CheckOutcome::Pending {
            return Err(ReportError::InvalidTransition(check));
        }
        let mut state = self.lock();
        if state.finished_at_unix_ms.is_some() {
            return Err(ReportError::Finalized);
        }
        let entry = state.checks.entry(check).or_insert_with(CheckEntry::pending);
        if entry.outcome != CheckOutcome::Pending {
            return Err(ReportError::AlreadyResolved {
                check,
                current: entry.outcome,
            });
        }
        entry.outcome = outcome;
        entry.detail = detail.clone();
        entry.updated_at_unix_ms = Some(now_unix_ms());

        let update = ReportUpdate {
            check,
            outcome,
            detail,
        };
        state
            .subscribers
            .retain(|tx| tx.send(update.clone()).is_ok());
        Ok(())
    }

    pub fn get(&self, check: Check) -> CheckOutcome {
        self.lock()
            .checks
            .get(&check)
            .map(|entry| entry.outcome)
            .unwrap_or(CheckOutcome::Pending)
    }

    pub fn detail(&self, check: Check) -> Option<String> {
        self.lock()
            .checks
            .get(&check)
            .and_then(|entry| entry.detail.clone())
    }

    pub fn get_all(&self) -> BTreeMap<Check, CheckOutcome> {
        self.lock()
            .checks
            .iter()
            .map(|(check, entry)| (*check, entry.outcome))
            .collect()
    }

    /// Store a MAC reading against the chip it was read from.
    pub fn record_mac(&self, target: Target, mac: Option<String>) -> Result<(), ReportError> {
        let mut state = self.lock();
        if state.finished_at_unix_ms.is_some() {
            return Err(ReportError::Finalized);
        }
        match target {
            Target::S3 => state.macs.s3 = mac,
            Target::H2 => state.macs.h2 = mac,
        }
        Ok(())
    }

    pub fn macs(&self) -> MacReport {
        self.lock().macs.clone()
    }

    pub fn order_id(&self) -> Option<String> {
        self.lock().order_id.clone()
    }

    /// Updates accepted after this call are delivered to the returned receiver.
    pub fn subscribe(&self) -> Receiver<ReportUpdate> {
        let (tx, rx) = mpsc::channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Freeze the report. Subscribers are released.
    pub fn finish(&self) {
        let mut state = self.lock();
        if state.finished_at_unix_ms.is_none() {
            state.finished_at_unix_ms = Some(now_unix_ms());
        }
        state.subscribers.clear();
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished_at_unix_ms.is_some()
    }

    /// True only when every check passed.
    pub fn passed(&self) -> bool {
        self.lock().passed()
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let state = self.lock();
        ReportSnapshot {
            report_version: REPORT_VERSION,
            order_id: state.order_id.clone(),
            started_at_unix_ms: state.started_at_unix_ms,
            finished_at_unix_ms: state.finished_at_unix_ms,
            checks: state
                .checks
                .iter()
                .map(|(check, entry)| (check.name().to_string(), entry.clone()))
                .collect(),
            macs: state.macs.clone(),
            passed: state.passed(),
        }
    }

    /// Write the snapshot to `dir` as `<unit>-<millis>.json`.
    pub fn persist(&self, dir: &Path) -> errors::Result<PathBuf> {
        let snapshot = self.snapshot();
        let unit = snapshot
            .order_id
            .as_deref()
            .map(file_safe)
            .unwrap_or_else(|| "unit".to_string());
        let path = dir.join(format!("{}-{}.json", unit, snapshot.started_at_unix_ms));
        write_json_atomic(&path, &snapshot)?;
        Ok(path)
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> errors::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create report directory: {}", parent.display())
        })?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    fs::write(&tmp, payload).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to atomically replace report: {}", path.display()))?;
    if let Some(parent) = path.parent() {
        let dir = fs::File::open(parent).with_context(|| {
            format!("failed to open report directory for sync: {}", parent.display())
        })?;
        let _ = dir.sync_all();
    }
    Ok(())
}
