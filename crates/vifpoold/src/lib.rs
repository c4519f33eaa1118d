//! vifpoold - pre-created network port pools
//!
//! Serves consumers from pools of ready ports keyed by host, project and
//! security groups, replenishing pools in the background and recycling
//! released ports through a supervised reclamation loop.

mod driver;
mod flat;
pub mod memory;
mod nested;
mod noop;
mod pool;
mod reclaim;
mod registry;
mod variant;

pub use driver::VifPoolDriver;
pub use flat::FlatPorts;
pub use memory::{InMemoryProvider, ProviderCall};
pub use nested::NestedPorts;
pub use noop::NoopVifPool;
pub use pool::{RecycleOutcome, RecycleReport, VifPool};
pub use reclaim::ReclaimerHandle;
pub use registry::{PoolRegistry, VifPoolStats};
pub use variant::PoolVariant;
