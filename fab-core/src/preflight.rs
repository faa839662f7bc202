//! Station health checks run before a unit is provisioned.

use crate::errors::Result;
use anyhow::Context;
use fab_hal::ProcessOps;
use log::info;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const USAGE_MARKER: &str = "usage:";

/// The flashing tool must exist and be executable. A tool given as a path is
/// checked in place; a bare name is searched on `PATH`.
pub fn check_tool(tool: &str) -> Result<PathBuf> {
    let found = if tool.contains('/') {
        let path = PathBuf::from(tool);
        if !path.exists() {
            anyhow::bail!("Flashing tool '{}' not found", tool);
        }
        path
    } else {
        let path = env::var_os("PATH").unwrap_or_default();
        let entries = env::split_paths(&path).collect::<Vec<_>>();
        let Some(found) = find_in_paths(tool, &entries) else {
            anyhow::bail!("Flashing tool '{}' not found in PATH", tool);
        };
        found
    };
    ensure_executable(&found).with_context(|| {
        format!(
            "Flashing tool '{}' was found at {} but is not executable",
            tool,
            found.display()
        )
    })?;
    Ok(found)
}

/// Run the tool without arguments; a healthy install prints its usage.
pub fn probe_tool<P: ProcessOps + ?Sized>(hal: &P, tool: &str, timeout: Duration) -> Result<()> {
    let (lines, exit) = hal
        .run_collect(tool, &[], timeout)
        .with_context(|| format!("failed to run {}", tool))?;
    let mentions_usage = |text: &str| text.to_ascii_lowercase().contains(USAGE_MARKER);
    if lines.iter().any(|l| mentions_usage(l)) || mentions_usage(&exit.stderr) {
        info!("✅ {} responds", tool);
        return Ok(());
    }
    anyhow::bail!(
        "{} did not print usage (exit={:?}): {}",
        tool,
        exit.code,
        exit.stderr.trim()
    )
}

/// Both checks, in order.
pub fn check_station_tool<P: ProcessOps + ?Sized>(
    hal: &P,
    tool: &str,
    timeout: Duration,
) -> Result<PathBuf> {
    let found = check_tool(tool)?;
    probe_tool(hal, tool, timeout)?;
    Ok(found)
}

fn ensure_executable(path: &Path) -> Result<()> {
    let md = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if !md.is_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if md.permissions().mode() & 0o111 == 0 {
            anyhow::bail!("{} is not executable", path.display());
        }
    }
    Ok(())
}

fn find_in_paths(binary: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}
