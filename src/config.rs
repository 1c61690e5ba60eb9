//! Configuration file (`config.toml`) types, defaults and validation.

use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::labels::AdditionalLabelConfig;
use crate::metrics::{Distribution, LatencyValue};
use crate::target::Target;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub name: String,
    /// Time between the start of two cycles.
    #[serde(deserialize_with = "human_duration")]
    pub interval: Duration,
    /// Upper bound on a whole cycle, from dispatch to the last probe.
    #[serde(deserialize_with = "human_duration")]
    pub timeout: Duration,
    /// Upper bound on waiting for a reply within one attempt.
    #[serde(deserialize_with = "human_duration")]
    pub receive_timeout: Duration,
    pub max_workers: usize,
    /// Latency samples are recorded as multiples of this unit.
    #[serde(deserialize_with = "human_duration")]
    pub latency_unit: Duration,
    /// Lower bounds of the latency histogram; a plain sum is kept when unset.
    pub latency_distribution: Option<Vec<f64>>,
    /// Re-read on every cycle; takes precedence over the static `[[targets]]`.
    pub targets_file: Option<PathBuf>,
    pub additional_labels: Vec<AdditionalLabelConfig>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            name: "arping".into(),
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(1),
            max_workers: 16,
            latency_unit: Duration::from_micros(1),
            latency_distribution: None,
            targets_file: None,
            additional_labels: Vec::new(),
        }
    }
}

impl ProbeConfig {
    /// A fresh, empty latency value of the configured kind.
    pub fn latency_value(&self) -> Result<LatencyValue> {
        match &self.latency_distribution {
            Some(bounds) => Ok(LatencyValue::Distribution(Distribution::new(bounds)?)),
            None => Ok(LatencyValue::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::Config("probe.interval must be positive".into()));
        }
        if self.timeout.is_zero() || self.timeout > self.interval {
            return Err(Error::Config(format!(
                "probe.timeout must be positive and at most the interval ({:?}), got {:?}",
                self.interval, self.timeout
            )));
        }
        if self.receive_timeout.is_zero() {
            return Err(Error::Config("probe.receive_timeout must be positive".into()));
        }
        if self.latency_unit.is_zero() {
            return Err(Error::Config("probe.latency_unit must be positive".into()));
        }
        if self.max_workers == 0 {
            return Err(Error::Config("probe.max_workers must be at least 1".into()));
        }
        self.latency_value().map(|_| ())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SnapshotConfig {
    /// File the live records are written to; no snapshot is kept when unset.
    pub path: Option<PathBuf>,
    #[serde(deserialize_with = "human_duration")]
    pub period: Duration,
    /// Records not written for `period * eviction_multiple` are dropped.
    pub eviction_multiple: u32,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            period: Duration::from_secs(10),
            eviction_multiple: 6,
        }
    }
}

impl SnapshotConfig {
    pub fn expiration(&self) -> Duration {
        self.period * self.eviction_multiple
    }

    pub fn validate(&self) -> Result<()> {
        if self.period.is_zero() {
            return Err(Error::Config("snapshot.period must be positive".into()));
        }
        if self.eviction_multiple == 0 {
            return Err(Error::Config(
                "snapshot.eviction_multiple must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses and validates a TOML document.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.probe.validate()?;
        self.snapshot.validate()
    }
}

fn human_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    humantime::parse_duration(&value).map_err(serde::de::Error::custom)
}
