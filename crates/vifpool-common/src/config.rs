//! Configuration file support for the VIF pool daemon
//!
//! Loads and validates pool configuration from TOML files.
//! Default location: /etc/vifpoold/vifpoold.conf

use crate::error::{PoolError, PoolResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/vifpoold/vifpoold.conf";

/// What the reclamation loop does with a port it failed to clean or tear down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecycleFailurePolicy {
    /// Keep the port queued and retry it on the next cycle
    #[default]
    Retain,
    /// Remove the port from the queue; it stays known but is never reused
    Drop,
}

impl RecycleFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecycleFailurePolicy::Retain => "retain",
            RecycleFailurePolicy::Drop => "drop",
        }
    }
}

/// Pool sizing and timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VifPoolConfig {
    /// Maximum ports kept per pool, 0 disables the limit
    #[serde(default = "default_ports_pool_max")]
    pub ports_pool_max: usize,

    /// Target minimum number of ready ports per pool
    #[serde(default = "default_ports_pool_min")]
    pub ports_pool_min: usize,

    /// Number of ports created in one bulk request
    #[serde(default = "default_ports_pool_batch")]
    pub ports_pool_batch: usize,

    /// Minimum interval in seconds between pool updates, used both for
    /// populating pools and for recycling ports
    #[serde(default = "default_ports_pool_update_frequency")]
    pub ports_pool_update_frequency: u64,

    /// Fate of ports that fail cleaning or teardown
    #[serde(default)]
    pub recycle_failure_policy: RecycleFailurePolicy,
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDaemonConfig {
    /// Pool configuration
    #[serde(default)]
    pub vif_pool: VifPoolConfig,
}

fn default_ports_pool_max() -> usize {
    0
}

fn default_ports_pool_min() -> usize {
    5
}

fn default_ports_pool_batch() -> usize {
    10
}

fn default_ports_pool_update_frequency() -> u64 {
    20
}

impl Default for VifPoolConfig {
    fn default() -> Self {
        Self {
            ports_pool_max: default_ports_pool_max(),
            ports_pool_min: default_ports_pool_min(),
            ports_pool_batch: default_ports_pool_batch(),
            ports_pool_update_frequency: default_ports_pool_update_frequency(),
            recycle_failure_policy: RecycleFailurePolicy::default(),
        }
    }
}

impl VifPoolConfig {
    /// Get the update frequency as Duration
    pub fn update_frequency(&self) -> Duration {
        Duration::from_secs(self.ports_pool_update_frequency)
    }

    /// Returns true if pools are capped
    pub fn is_bounded(&self) -> bool {
        self.ports_pool_max > 0
    }

    /// Number of ports to request when a pool currently holds `pool_size`
    pub fn batch_size_for(&self, pool_size: usize) -> usize {
        self.ports_pool_batch
            .max(self.ports_pool_min.saturating_sub(pool_size))
    }

    /// Validate configuration
    pub fn validate(&self) -> PoolResult<()> {
        if self.ports_pool_batch == 0 {
            return Err(PoolError::invalid_config(
                "ports_pool_batch",
                "must be > 0",
            ));
        }

        if self.ports_pool_update_frequency == 0 {
            return Err(PoolError::invalid_config(
                "ports_pool_update_frequency",
                "must be > 0",
            ));
        }

        if self.is_bounded() && self.ports_pool_min > self.ports_pool_max {
            return Err(PoolError::invalid_config(
                "ports_pool_min",
                format!(
                    "{} exceeds ports_pool_max {}",
                    self.ports_pool_min, self.ports_pool_max
                ),
            ));
        }

        if self.is_bounded() && self.ports_pool_batch > self.ports_pool_max {
            warn!(
                batch = self.ports_pool_batch,
                max = self.ports_pool_max,
                "ports_pool_batch exceeds ports_pool_max, surplus ports are deleted on recycle"
            );
        }

        Ok(())
    }
}

impl PoolDaemonConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> PoolResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PoolError::invalid_config("config", e.to_string()))?;
        config.vif_pool.validate()?;
        Ok(config)
    }

    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> PoolResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Ok(Self::default())
            }
            Err(e) => Err(PoolError::ConfigIo {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> PoolResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }
}
