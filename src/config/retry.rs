use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::TRIGGER_BACKOFF_CEILING_MS;
use crate::constants::TRIGGER_BACKOFF_FACTOR;
use crate::constants::TRIGGER_BACKOFF_FLOOR_MS;
use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds, 0 disables the timeout)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied to the delay after every failed attempt
    #[serde(default = "default_factor")]
    pub factor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
        }
    }
}

impl BackoffPolicy {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.base_delay_ms must be > 0"
            ))));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.base_delay_ms {} must not exceed max_delay_ms {}",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        if self.factor < 1 {
            return Err(Error::Config(ConfigError::Message(format!(
                "retry.{name}.factor must be >= 1"
            ))));
        }
        Ok(())
    }
}

/// Divide strategies by call site
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryPolicies {
    /// Individual store calls (get/put/delete/grant/revoke/keepalive)
    #[serde(default = "default_store_policy")]
    pub store: BackoffPolicy,

    /// Re-arming a missing trigger; retried until it succeeds or the
    /// watcher is cancelled
    #[serde(default = "default_trigger_policy")]
    pub trigger: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            store: default_store_policy(),
            trigger: default_trigger_policy(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.store.validate("store")?;
        self.trigger.validate("trigger")?;
        Ok(())
    }
}

fn default_store_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 5,
        timeout_ms: 5_000,
        base_delay_ms: 10,
        max_delay_ms: 1_000,
        factor: 2,
    }
}

fn default_trigger_policy() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 0,
        base_delay_ms: TRIGGER_BACKOFF_FLOOR_MS,
        max_delay_ms: TRIGGER_BACKOFF_CEILING_MS,
        factor: TRIGGER_BACKOFF_FACTOR,
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    1000
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
fn default_factor() -> u32 {
    2
}
