//! Recovery Configuration
//!
//! Loaded once at coordinator startup (JSON file or string), validated, and
//! immutable afterwards. Every field has a default, so an empty object is a
//! complete configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::errors::{RecoveryError, RecoveryResult};
use crate::observability::{Logger, RecoveryEvent};

const MIB: u64 = 1024 * 1024;

/// Budget for one partition of a crashed server's tablets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// A partition is closed before its estimated size would exceed this
    #[serde(default = "default_max_bytes_per_partition")]
    pub max_bytes_per_partition: u64,

    /// A partition is closed before it would hold more tablets than this
    #[serde(default = "default_max_tablets_per_partition")]
    pub max_tablets_per_partition: usize,

    /// Size assumed for a tablet with no estimate of its own
    #[serde(default = "default_tablet_bytes")]
    pub default_tablet_bytes: u64,
}

fn default_max_bytes_per_partition() -> u64 {
    512 * MIB
}

fn default_max_tablets_per_partition() -> usize {
    64
}

fn default_tablet_bytes() -> u64 {
    // Unknown tablets are assumed to fill a partition on their own.
    512 * MIB
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_partition: default_max_bytes_per_partition(),
            max_tablets_per_partition: default_max_tablets_per_partition(),
            default_tablet_bytes: default_tablet_bytes(),
        }
    }
}

/// Inputs to replica ordering in the replica map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaMapConfig {
    /// Segment size used to estimate how long a backup takes to load a replica
    #[serde(default = "default_segment_size_mb")]
    pub segment_size_mb: u64,

    /// Added to every secondary's estimate so it sorts behind all primaries
    #[serde(default = "default_secondary_penalty_ms")]
    pub secondary_penalty_ms: u64,

    /// Each estimate is scaled by a random factor in `[1, 1 + load_jitter)`.
    /// Zero makes the ordering a strict sort on estimated load time.
    #[serde(default = "default_load_jitter")]
    pub load_jitter: f64,
}

fn default_segment_size_mb() -> u64 {
    8
}

fn default_secondary_penalty_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_load_jitter() -> f64 {
    0.1
}

impl Default for ReplicaMapConfig {
    fn default() -> Self {
        Self {
            segment_size_mb: default_segment_size_mb(),
            secondary_penalty_ms: default_secondary_penalty_ms(),
            load_jitter: default_load_jitter(),
        }
    }
}

/// Recovery coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default)]
    pub partitioning: PartitionConfig,

    #[serde(default)]
    pub replica_map: ReplicaMapConfig,

    /// Seed for master selection and replica jitter. `None` seeds from entropy.
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl RecoveryConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> RecoveryResult<Self> {
        let config: RecoveryConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> RecoveryResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        Logger::info(
            RecoveryEvent::ConfigLoaded,
            &[("path", &path.display().to_string())],
        );
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> RecoveryResult<()> {
        let partitioning = &self.partitioning;
        if partitioning.max_bytes_per_partition == 0 {
            return Err(RecoveryError::invalid_config(
                "max_bytes_per_partition must be positive",
            ));
        }
        if partitioning.max_tablets_per_partition == 0 {
            return Err(RecoveryError::invalid_config(
                "max_tablets_per_partition must be positive",
            ));
        }

        let replica_map = &self.replica_map;
        if replica_map.segment_size_mb == 0 {
            return Err(RecoveryError::invalid_config(
                "segment_size_mb must be positive",
            ));
        }
        if !replica_map.load_jitter.is_finite()
            || !(0.0..=1.0).contains(&replica_map.load_jitter)
        {
            return Err(RecoveryError::invalid_config(format!(
                "load_jitter must be within [0, 1], got {}",
                replica_map.load_jitter
            )));
        }

        Ok(())
    }

    /// Same configuration with deterministic replica ordering.
    pub fn without_jitter(mut self) -> Self {
        self.replica_map.load_jitter = 0.0;
        self
    }
}
