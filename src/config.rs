use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::models::TestMode;
use crate::registry;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "registry::default_records")]
    pub providers: Vec<ProviderRecord>,
    #[serde(default = "default_interval")]
    pub interval: Interval,
    #[serde(default)]
    pub mode: TestMode,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: Option<u64>,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            providers: registry::default_records(),
            interval: default_interval(),
            mode: TestMode::default(),
            probe_timeout_ms: default_probe_timeout(),
            api_port: default_api_port(),
            autostart: default_autostart(),
            log_level: default_log_level(),
        }
    }
}

/// Raw registry entry as written in the config file. Every field may be absent;
/// `registry::build` decides what survives.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub probe_path: String,
    #[serde(default)]
    pub color: String,
}

/// How often the scheduler fires a round. `Manual` arms no timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub enum Interval {
    Every(Duration),
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawInterval {
    Millis(i64),
    Text(String),
}

impl TryFrom<RawInterval> for Interval {
    type Error = ConfigError;

    fn try_from(raw: RawInterval) -> Result<Self, Self::Error> {
        match raw {
            RawInterval::Millis(ms) if ms > 0 => Ok(Interval::Every(Duration::from_millis(ms as u64))),
            RawInterval::Millis(ms) => Err(ConfigError::InvalidInterval(ms.to_string())),
            RawInterval::Text(text) => text.parse(),
        }
    }
}

impl From<Interval> for RawInterval {
    fn from(interval: Interval) -> Self {
        match interval {
            Interval::Every(period) => RawInterval::Millis(period.as_millis() as i64),
            Interval::Manual => RawInterval::Text("manual".into()),
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("manual") {
            return Ok(Interval::Manual);
        }
        match trimmed.parse::<u64>() {
            Ok(ms) if ms > 0 => Ok(Interval::Every(Duration::from_millis(ms))),
            _ => Err(ConfigError::InvalidInterval(s.to_string())),
        }
    }
}

fn default_interval() -> Interval { Interval::Every(Duration::from_secs(30)) }
fn default_probe_timeout() -> Option<u64> { Some(10_000) }
fn default_api_port() -> u16 { 3000 }
fn default_autostart() -> bool { true }
fn default_log_level() -> String { "info".into() }

impl MonitorConfig {
    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_ms.map(Duration::from_millis)
    }

    /// Reads the JSON config at `path`, falling back to the built-in defaults
    /// when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using built-in provider registry", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}
