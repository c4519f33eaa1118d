//! Common infrastructure for the VIF pool daemon.
//!
//! This crate holds everything the pool engine shares with the code that
//! embeds it:
//!
//! - [`types`]: Pool keys, ports and consumers
//! - [`VifProvider`] / [`TrunkProvider`]: The network control plane seam
//! - [`error`]: Error types for provider and pool operations
//! - [`config`]: Pool sizing configuration loaded from TOML
//!
//! # Example
//!
//! ```ignore
//! use vifpool_common::{PoolDaemonConfig, PoolKey};
//!
//! let config = PoolDaemonConfig::load()?;
//! let key = PoolKey::new("10.0.0.1", "project-a", ["sg-default"]);
//! println!("batch for empty {}: {}", key, config.vif_pool.batch_size_for(0));
//! ```

pub mod config;
pub mod error;
pub mod provider;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{PoolDaemonConfig, RecycleFailurePolicy, VifPoolConfig, DEFAULT_CONFIG_PATH};
pub use error::{PoolError, PoolResult, ProviderError, ProviderResult};
pub use provider::{TrunkProvider, VifProvider};
pub use types::{
    Consumer, ParentPort, PoolKey, PortId, PortUpdate, SubnetSpec, TrunkId, Vif,
    AVAILABLE_PORT_NAME,
};
