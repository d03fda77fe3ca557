use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::MIN_INTERVAL_SECS;
use crate::Error;
use crate::Result;

/// Per-ring coordination settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RingSettings {
    /// Interval used by watchers that name neither an interval nor a cron
    /// schedule. Must be at least 5 seconds.
    #[serde(default = "default_interval_secs")]
    pub default_interval_secs: i64,

    /// Sustained rate at which a faulted watcher session may be restarted
    #[serde(default = "default_restart_rate_per_sec")]
    pub restart_rate_per_sec: f64,

    /// Restarts allowed back to back before the rate applies
    #[serde(default = "default_restart_burst")]
    pub restart_burst: u32,
}

impl Default for RingSettings {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval_secs(),
            restart_rate_per_sec: default_restart_rate_per_sec(),
            restart_burst: default_restart_burst(),
        }
    }
}

impl RingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.default_interval_secs < MIN_INTERVAL_SECS {
            return Err(Error::Config(ConfigError::Message(format!(
                "ring.default_interval_secs {} must be at least {}",
                self.default_interval_secs, MIN_INTERVAL_SECS
            ))));
        }
        if !(self.restart_rate_per_sec > 0.0) {
            return Err(Error::Config(ConfigError::Message(
                "ring.restart_rate_per_sec must be > 0".into(),
            )));
        }
        if self.restart_burst == 0 {
            return Err(Error::Config(ConfigError::Message(
                "ring.restart_burst must be > 0".into(),
            )));
        }
        Ok(())
    }
}

/// Buffer sizing for a watcher's channels
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Capacity of the event channel handed to callers
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of the re-arm notifier. Notifications beyond this are dropped.
    #[serde(default = "default_notifier_buffer")]
    pub notifier_buffer: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
            notifier_buffer: default_notifier_buffer(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watcher.event_buffer must be > 0".into(),
            )));
        }
        if self.notifier_buffer == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watcher.notifier_buffer must be > 0".into(),
            )));
        }
        Ok(())
    }
}

fn default_interval_secs() -> i64 {
    MIN_INTERVAL_SECS
}
fn default_restart_rate_per_sec() -> f64 {
    1.0
}
fn default_restart_burst() -> u32 {
    1
}
fn default_event_buffer() -> usize {
    100
}
fn default_notifier_buffer() -> usize {
    1
}
