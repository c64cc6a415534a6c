use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use tokio::task::JoinHandle;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
    Idle,
    Testing,
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    #[default]
    Ping,
    Simple,
    Full,
}

impl FromStr for TestMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ping" => Ok(TestMode::Ping),
            "simple" => Ok(TestMode::Simple),
            "full" => Ok(TestMode::Full),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TestMode::Ping => "ping",
            TestMode::Simple => "simple",
            TestMode::Full => "full",
        };
        f.write_str(name)
    }
}

/// Validated identity of one monitored endpoint. Never mutated after registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    pub id: String,
    pub name: String,
    pub color: String,
    pub endpoint: String,
    pub probe_path: String,
}

impl ProviderIdentity {
    pub fn probe_url(&self) -> String {
        format!("{}{}", self.endpoint, self.probe_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySample {
    pub timestamp: DateTime<Utc>,
    pub latency: f64,
}

/// Running statistics for one provider. `min`/`max`/`avg`/`total` only ever
/// see successful probes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStats {
    pub current: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub total: f64,
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub history: VecDeque<LatencySample>,
}

#[derive(Debug, Clone)]
pub struct Provider {
    pub identity: ProviderIdentity,
    pub status: ProviderStatus,
    pub stats: ProviderStats,
}

impl Provider {
    pub fn new(identity: ProviderIdentity) -> Self {
        Self {
            identity,
            status: ProviderStatus::Idle,
            stats: ProviderStats::new(),
        }
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            id: self.identity.id.clone(),
            name: self.identity.name.clone(),
            color: self.identity.color.clone(),
            status: self.status,
            stats: self.stats.clone(),
        }
    }
}

/// Copy-out view handed to renderers and listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderSnapshot {
    pub id: String,
    pub name: String,
    pub color: String,
    pub status: ProviderStatus,
    pub stats: ProviderStats,
}

pub struct MonitorState {
    pub providers: Vec<Provider>,
    pub total_tests: u64,
    pub mode: TestMode,
    pub running: bool,
    /// Repeating timer task; only ever set while `running`.
    pub timer: Option<JoinHandle<()>>,
}

impl MonitorState {
    pub fn new(identities: Vec<ProviderIdentity>) -> Self {
        Self {
            providers: identities.into_iter().map(Provider::new).collect(),
            total_tests: 0,
            mode: TestMode::default(),
            running: false,
            timer: None,
        }
    }

    pub fn provider_mut(&mut self, id: &str) -> Option<&mut Provider> {
        self.providers.iter_mut().find(|p| p.identity.id == id)
    }

    pub fn snapshots(&self) -> Vec<ProviderSnapshot> {
        self.providers.iter().map(Provider::snapshot).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u64,
    pub probed: usize,
    pub failures: usize,
    pub elapsed_ms: u64,
}

/// Everything a renderer needs for one refresh, read under a single lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub providers: Vec<ProviderSnapshot>,
    pub fastest: Option<String>,
    pub average_latency: Option<f64>,
    pub total_tests: u64,
    pub running: bool,
    pub mode: TestMode,
}
