//! Station configuration.
//!
//! Loaded once from TOML and passed by reference into the planner; there is no
//! global configuration object.

use crate::config_states::ValidateConfig;
use anyhow::Context;
use fab_error::{ProvisionError, ProvisionResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_TOOL: &str = "esptool.py";
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;
const DEFAULT_S3_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_S3_BAUD: u32 = 460_800;
const DEFAULT_FACTORY_PORT: &str = "/dev/ttyUSB1";
const DEFAULT_FACTORY_BAUD: u32 = 115_200;
const DEFAULT_H2_PORT: &str = "/dev/ttyUSB2";
const DEFAULT_H2_BAUD: u32 = 921_600;
const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SENTINEL: &str = ".";

/// Source of a [`StationConfig`].
pub trait ConfigSource {
    fn load(&self) -> anyhow::Result<StationConfig>;
}

/// Reads the station config from a TOML file.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    pub path: PathBuf,
}

impl TomlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSource for TomlFileSource {
    fn load(&self) -> anyhow::Result<StationConfig> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        StationConfig::from_toml_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    /// Flashing tool executable.
    pub tool: String,
    /// Hard bound on a single tool invocation.
    pub tool_timeout_secs: u64,
    /// When set, every unit's report is written here as JSON.
    pub report_dir: Option<PathBuf>,
    pub s3: S3Config,
    pub h2: H2Config,
    pub factory: FactoryConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            tool: DEFAULT_TOOL.to_string(),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            report_dir: None,
            s3: S3Config::default(),
            h2: H2Config::default(),
            factory: FactoryConfig::default(),
        }
    }
}

impl StationConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid station config")
    }
}

/// Main microcontroller: certificates, firmware and the factory console.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub port: Option<String>,
    pub baud: u32,
    /// Directory searched for firmware images.
    pub images: Option<PathBuf>,
    /// Directory searched for certificate images.
    pub certificates: Option<PathBuf>,
    pub addresses: S3Addresses,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_S3_PORT.to_string()),
            baud: DEFAULT_S3_BAUD,
            images: None,
            certificates: None,
            addresses: S3Addresses::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Addresses {
    pub bootloader: Option<String>,
    pub partition_table: Option<String>,
    pub ota_data: Option<String>,
    pub firmware: Option<String>,
    pub secure_cert: Option<String>,
    pub data_provider: Option<String>,
}

/// Radio co-processor: firmware only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct H2Config {
    pub port: Option<String>,
    pub baud: u32,
    pub images: Option<PathBuf>,
    pub addresses: H2Addresses,
}

impl Default for H2Config {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_H2_PORT.to_string()),
            baud: DEFAULT_H2_BAUD,
            images: None,
            addresses: H2Addresses::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct H2Addresses {
    pub bootloader: Option<String>,
    pub partition_table: Option<String>,
    pub firmware: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub port: Option<String>,
    pub baud: u32,
    /// Bounded wait per serial read attempt; also the stop latency.
    pub read_timeout_ms: u64,
    /// How long the unit gets to reach factory mode.
    pub handshake_timeout_secs: u64,
    pub sentinel: String,
    pub password: Option<String>,
    pub command: Option<String>,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            port: Some(DEFAULT_FACTORY_PORT.to_string()),
            baud: DEFAULT_FACTORY_BAUD,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            sentinel: DEFAULT_SENTINEL.to_string(),
            password: None,
            command: None,
        }
    }
}

fn missing(what: &str) -> ProvisionError {
    ProvisionError::ConfigurationMissing(what.to_string())
}

/// A present, non-blank string value or `ConfigurationMissing(what)`.
pub fn require_str<'a>(value: &'a Option<String>, what: &str) -> ProvisionResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(what))
}

pub fn require_path<'a>(value: &'a Option<PathBuf>, what: &str) -> ProvisionResult<&'a Path> {
    value
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| missing(what))
}

/// A flash address: present and parseable as `0x`-prefixed hex or decimal.
pub fn require_address<'a>(value: &'a Option<String>, what: &str) -> ProvisionResult<&'a str> {
    let raw = require_str(value, what)?;
    if parse_address(raw).is_none() {
        return Err(ProvisionError::ConfigurationMissing(format!(
            "{} (invalid address '{}')",
            what, raw
        )));
    }
    Ok(raw)
}

pub fn parse_address(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse::<u64>().ok(),
    }
}

impl ValidateConfig for StationConfig {
    fn validate_cfg(&self) -> ProvisionResult<()> {
        if self.tool.trim().is_empty() {
            return Err(missing("tool"));
        }
        if self.tool_timeout_secs == 0 {
            return Err(missing("tool_timeout_secs (must be at least 1)"));
        }

        require_str(&self.s3.port, "s3.port")?;
        require_path(&self.s3.images, "s3.images")?;
        require_path(&self.s3.certificates, "s3.certificates")?;
        let a = &self.s3.addresses;
        require_address(&a.bootloader, "s3.addresses.bootloader")?;
        require_address(&a.partition_table, "s3.addresses.partition_table")?;
        require_address(&a.ota_data, "s3.addresses.ota_data")?;
        require_address(&a.firmware, "s3.addresses.firmware")?;
        require_address(&a.secure_cert, "s3.addresses.secure_cert")?;
        require_address(&a.data_provider, "s3.addresses.data_provider")?;

        require_str(&self.h2.port, "h2.port")?;
        require_path(&self.h2.images, "h2.images")?;
        let a = &self.h2.addresses;
        require_address(&a.bootloader, "h2.addresses.bootloader")?;
        require_address(&a.partition_table, "h2.addresses.partition_table")?;
        require_address(&a.firmware, "h2.addresses.firmware")?;

        require_str(&self.factory.port, "factory.port")?;
        require_str(&self.factory.password, "factory.password")?;
        require_str(&self.factory.command, "factory.command")?;
        if self.factory.sentinel.trim().is_empty() {
            return Err(missing("factory.sentinel"));
        }
        if self.factory.handshake_timeout_secs == 0 {
            return Err(missing("factory.handshake_timeout_secs (must be at least 1)"));
        }
        Ok(())
    }
}
