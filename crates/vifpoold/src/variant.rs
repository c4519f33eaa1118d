//! Selection between flat and nested port handling.

use std::sync::Arc;

use vifpool_common::{Consumer, PoolKey, PortUpdate, ProviderResult, TrunkProvider};

use crate::flat::FlatPorts;
use crate::nested::NestedPorts;

/// The two hooks that differ between deployments: how a port is bound to
/// a consumer, and what must happen before a port is deleted.
#[derive(Debug)]
pub enum PoolVariant {
    /// Ports attached directly to consumers.
    Flat(FlatPorts),
    /// Trunk subports for consumers inside VMs.
    Nested(NestedPorts),
}

impl PoolVariant {
    pub fn flat() -> Self {
        PoolVariant::Flat(FlatPorts)
    }

    pub fn nested(trunks: Arc<dyn TrunkProvider>) -> Self {
        PoolVariant::Nested(NestedPorts::new(trunks))
    }

    pub fn name(&self) -> &'static str {
        match self {
            PoolVariant::Flat(_) => "flat",
            PoolVariant::Nested(_) => "nested",
        }
    }

    /// Update applied when a pooled port is handed to `consumer`.
    pub fn bind_update(&self, consumer: &Consumer) -> PortUpdate {
        match self {
            PoolVariant::Flat(flat) => flat.bind_update(consumer),
            PoolVariant::Nested(nested) => nested.bind_update(consumer),
        }
    }

    /// Update applied when a released port goes back into `key`'s pool.
    pub fn clean_update(&self, key: &PoolKey) -> PortUpdate {
        match self {
            PoolVariant::Flat(flat) => flat.clean_update(key),
            PoolVariant::Nested(nested) => nested.clean_update(key),
        }
    }

    /// Work that must succeed before the port itself is deleted.
    pub async fn teardown(
        &self,
        port_id: &str,
        key: &PoolKey,
        vlan_id: Option<u16>,
    ) -> ProviderResult<()> {
        match self {
            PoolVariant::Flat(_) => Ok(()),
            PoolVariant::Nested(nested) => nested.teardown(port_id, key, vlan_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProvider;

    #[test]
    fn test_variant_names() {
        assert_eq!(PoolVariant::flat().name(), "flat");
        let provider = Arc::new(InMemoryProvider::nested());
        assert_eq!(PoolVariant::nested(provider).name(), "nested");
    }

    #[test]
    fn test_bind_differs_by_variant() {
        let consumer = Consumer::new("nginx-1", "uid-1");
        let flat = PoolVariant::flat().bind_update(&consumer);
        let nested = PoolVariant::nested(Arc::new(InMemoryProvider::nested())).bind_update(&consumer);
        assert_eq!(flat.device_id.as_deref(), Some("uid-1"));
        assert!(nested.device_id.is_none());
        assert_eq!(flat.name, nested.name);
    }

    #[tokio::test]
    async fn test_flat_teardown_is_noop() {
        let key = PoolKey::new("h1", "p1", ["sgA"]);
        assert!(PoolVariant::flat().teardown("r1", &key, Some(5)).await.is_ok());
    }
}
