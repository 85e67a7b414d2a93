// SPDX-License-Identifier: MIT
//
// Fortuna Pool: Continuously Reseeded Entropy Accumulator
// Copyright (c) 2025 Fortuna Pool Contributors

//! Configuration management for the pooled generator

use crate::accumulator::AccumulatorConfig;
use crate::pool::PoolHash;
use crate::primitive::PrimitiveKind;
use crate::source::Priority;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Timing and thresholds in effect for one priority
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityProfile {
    /// Delay between poll cycles
    pub poll_interval: Duration,
    /// Reseed once this much time has passed and pool zero holds anything
    pub reseed_interval: Duration,
    /// Reseed once pool zero has collected this many bytes
    pub entropy_to_reseed: u64,
}

/// Pooled generator configuration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GeneratorConfig {
    /// Linear pools (Fortuna's divisor-scheduled pools)
    #[serde(default = "default_linear_pool_count")]
    pub linear_pool_count: usize,

    /// Random pools (probabilistically included pools)
    #[serde(default = "default_random_pool_count")]
    pub random_pool_count: usize,

    /// Extra random draws ANDed into the random pool mask
    #[serde(default = "default_random_pool_factor")]
    pub random_pool_factor: u32,

    /// Hash used by every pool
    #[serde(default)]
    pub pool_hash: PoolHash,

    /// Keyed transform driving the block generator
    #[serde(default)]
    pub primitive: PrimitiveKind,

    /// Output buffer size in bytes, rounded up to whole blocks
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,

    /// Force a reseed after this many bytes have been served under one key
    #[serde(default = "default_maximum_bytes_generated_before_reseed")]
    pub maximum_bytes_generated_before_reseed: u64,

    /// Hard floor between reseeds
    #[serde(default = "default_minimum_time_between_reseeds_ms")]
    pub minimum_time_between_reseeds_ms: u64,

    #[serde(default = "default_poll_interval_high_ms")]
    pub poll_interval_high_ms: u64,
    #[serde(default = "default_poll_interval_normal_ms")]
    pub poll_interval_normal_ms: u64,
    #[serde(default = "default_poll_interval_low_ms")]
    pub poll_interval_low_ms: u64,

    #[serde(default = "default_reseed_interval_high_ms")]
    pub reseed_interval_high_ms: u64,
    #[serde(default = "default_reseed_interval_normal_ms")]
    pub reseed_interval_normal_ms: u64,
    #[serde(default = "default_reseed_interval_low_ms")]
    pub reseed_interval_low_ms: u64,

    #[serde(default = "default_entropy_to_reseed_high")]
    pub entropy_to_reseed_high: u64,
    #[serde(default = "default_entropy_to_reseed_normal")]
    pub entropy_to_reseed_normal: u64,
    #[serde(default = "default_entropy_to_reseed_low")]
    pub entropy_to_reseed_low: u64,

    /// Demote Normal to Low after this many reseeds
    #[serde(default = "default_reseed_count_before_switch_to_low_priority")]
    pub reseed_count_before_switch_to_low_priority: u64,

    /// Demote Normal to Low after this long without a priority request
    #[serde(default = "default_time_before_switch_to_low_priority_ms")]
    pub time_before_switch_to_low_priority_ms: u64,

    /// Periodic checkpoint interval (0 = disabled)
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,

    /// Upper bound on a single source poll
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            linear_pool_count: default_linear_pool_count(),
            random_pool_count: default_random_pool_count(),
            random_pool_factor: default_random_pool_factor(),
            pool_hash: PoolHash::default(),
            primitive: PrimitiveKind::default(),
            output_buffer_bytes: default_output_buffer_bytes(),
            maximum_bytes_generated_before_reseed: default_maximum_bytes_generated_before_reseed(),
            minimum_time_between_reseeds_ms: default_minimum_time_between_reseeds_ms(),
            poll_interval_high_ms: default_poll_interval_high_ms(),
            poll_interval_normal_ms: default_poll_interval_normal_ms(),
            poll_interval_low_ms: default_poll_interval_low_ms(),
            reseed_interval_high_ms: default_reseed_interval_high_ms(),
            reseed_interval_normal_ms: default_reseed_interval_normal_ms(),
            reseed_interval_low_ms: default_reseed_interval_low_ms(),
            entropy_to_reseed_high: default_entropy_to_reseed_high(),
            entropy_to_reseed_normal: default_entropy_to_reseed_normal(),
            entropy_to_reseed_low: default_entropy_to_reseed_low(),
            reseed_count_before_switch_to_low_priority:
                default_reseed_count_before_switch_to_low_priority(),
            time_before_switch_to_low_priority_ms: default_time_before_switch_to_low_priority_ms(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            source_timeout_ms: default_source_timeout_ms(),
        }
    }
}

impl GeneratorConfig {
    /// Load configuration from `FORTUNA_*` environment variables
    pub fn from_env() -> Result<Self> {
        let config: Self = envy::prefixed("FORTUNA_").from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file; missing fields take their defaults
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.accumulator_config().validate()?;

        if self.output_buffer_bytes == 0 {
            return Err(Error::Config("output_buffer_bytes must be > 0".to_string()));
        }

        if self.maximum_bytes_generated_before_reseed == 0 {
            return Err(Error::Config(
                "maximum_bytes_generated_before_reseed must be > 0".to_string(),
            ));
        }

        for priority in [Priority::High, Priority::Normal, Priority::Low] {
            let profile = self.profile(priority);
            if profile.poll_interval.is_zero() {
                return Err(Error::Config(format!(
                    "poll_interval_{}_ms must be > 0",
                    priority
                )));
            }
            if profile.entropy_to_reseed == 0 {
                return Err(Error::Config(format!(
                    "entropy_to_reseed_{} must be > 0",
                    priority
                )));
            }
            if self.minimum_time_between_reseeds() > profile.reseed_interval {
                return Err(Error::Config(format!(
                    "minimum_time_between_reseeds_ms ({}) exceeds reseed_interval_{}_ms ({})",
                    self.minimum_time_between_reseeds_ms,
                    priority,
                    profile.reseed_interval.as_millis()
                )));
            }
        }

        if self.source_timeout_ms == 0 {
            return Err(Error::Config("source_timeout_ms must be > 0".to_string()));
        }

        Ok(())
    }

    pub fn accumulator_config(&self) -> AccumulatorConfig {
        AccumulatorConfig {
            linear_pool_count: self.linear_pool_count,
            random_pool_count: self.random_pool_count,
            random_factor: self.random_pool_factor,
            hash: self.pool_hash,
        }
    }

    pub fn profile(&self, priority: Priority) -> PriorityProfile {
        let (poll, reseed, entropy) = match priority {
            Priority::High => (
                self.poll_interval_high_ms,
                self.reseed_interval_high_ms,
                self.entropy_to_reseed_high,
            ),
            Priority::Normal => (
                self.poll_interval_normal_ms,
                self.reseed_interval_normal_ms,
                self.entropy_to_reseed_normal,
            ),
            Priority::Low => (
                self.poll_interval_low_ms,
                self.reseed_interval_low_ms,
                self.entropy_to_reseed_low,
            ),
        };
        PriorityProfile {
            poll_interval: Duration::from_millis(poll),
            reseed_interval: Duration::from_millis(reseed),
            entropy_to_reseed: entropy,
        }
    }

    pub fn minimum_time_between_reseeds(&self) -> Duration {
        Duration::from_millis(self.minimum_time_between_reseeds_ms)
    }

    pub fn time_before_switch_to_low_priority(&self) -> Duration {
        Duration::from_millis(self.time_before_switch_to_low_priority_ms)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        if self.checkpoint_interval_ms > 0 {
            Some(Duration::from_millis(self.checkpoint_interval_ms))
        } else {
            None
        }
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }
}

// Default value functions
fn default_linear_pool_count() -> usize {
    28
}

fn default_random_pool_count() -> usize {
    12
}

fn default_random_pool_factor() -> u32 {
    crate::accumulator::DEFAULT_RANDOM_FACTOR
}

fn default_output_buffer_bytes() -> usize {
    crate::generator::DEFAULT_BUFFER_BYTES
}

fn default_maximum_bytes_generated_before_reseed() -> u64 {
    16 * 1024 * 1024
}

fn default_minimum_time_between_reseeds_ms() -> u64 {
    100
}

fn default_poll_interval_high_ms() -> u64 {
    100
}

fn default_poll_interval_normal_ms() -> u64 {
    5_000
}

fn default_poll_interval_low_ms() -> u64 {
    30_000
}

fn default_reseed_interval_high_ms() -> u64 {
    1_000
}

fn default_reseed_interval_normal_ms() -> u64 {
    60_000
}

fn default_reseed_interval_low_ms() -> u64 {
    12 * 60 * 60 * 1000
}

fn default_entropy_to_reseed_high() -> u64 {
    32
}

fn default_entropy_to_reseed_normal() -> u64 {
    128
}

fn default_entropy_to_reseed_low() -> u64 {
    256
}

fn default_reseed_count_before_switch_to_low_priority() -> u64 {
    20
}

fn default_time_before_switch_to_low_priority_ms() -> u64 {
    5 * 60 * 1000
}

fn default_checkpoint_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_source_timeout_ms() -> u64 {
    30_000
}
