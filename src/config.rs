//! Configuration for progress aggregation

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of consecutive passes with an unchanged layer count
/// required before reports are emitted.
pub const DEFAULT_STABILIZATION_THRESHOLD: usize = 10;

/// Default maximum silence between two reports.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Tuning knobs for an [`Aggregator`](crate::Aggregator).
///
/// Deserializes from config files with humantime durations:
///
/// ```
/// # use imageprogress::AggregatorConfig;
/// let config: AggregatorConfig =
///     serde_json::from_str(r#"{"heartbeat_interval": "1m 30s"}"#).unwrap();
/// assert_eq!(config.heartbeat_interval.as_secs(), 90);
/// assert_eq!(config.stabilization_threshold, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Consecutive stable layer-count observations needed (default: 10)
    pub stabilization_threshold: usize,
    /// Forced re-report interval when nothing material changes (default: 30s)
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            stabilization_threshold: DEFAULT_STABILIZATION_THRESHOLD,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl AggregatorConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the stabilization threshold. Zero reports as soon as the layer
    /// count repeats once.
    pub fn stabilization_threshold(mut self, passes: usize) -> Self {
        self.stabilization_threshold = passes;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat interval from a humantime string such as `"45s"`.
    pub fn heartbeat(self, interval: &str) -> Result<Self> {
        let parsed = humantime::parse_duration(interval)
            .map_err(|e| Error::Config(format!("invalid heartbeat {:?}: {}", interval, e)))?;
        Ok(self.heartbeat_interval(parsed))
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}
