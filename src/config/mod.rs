//! Configuration for coordination rings.
//!
//! Sources are layered with increasing priority:
//! 1. Default values (hardcoded)
//! 2. File named by `RING_CONFIG_PATH` (or passed to `with_override_config`)
//! 3. Environment variables prefixed `RING__`

mod retry;
mod ring;
pub use retry::*;
pub use ring::*;


//---
use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RingConfig {
    /// Ring cadence and restart limits
    #[serde(default)]
    pub ring: RingSettings,
    /// Watcher channel sizing
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Retry policies for store calls and trigger re-arming
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Debug for RingConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RingConfig")
            .field("ring", &self.ring)
            .field("watcher", &self.watcher)
            .finish_non_exhaustive()
    }
}

impl RingConfig {
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("RING_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RING")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("RING")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config) // No validation - deferred to validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.ring.validate()?;
        self.watcher.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}
