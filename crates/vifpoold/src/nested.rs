//! Nested ports: subports of a per-host trunk.
//!
//! Consumers running inside a VM get a trunk subport tagged with its own
//! VLAN. Before such a port can be deleted it has to be detached from the
//! trunk and its VLAN tag handed back.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};
use vifpool_common::{
    Consumer, PoolKey, PortUpdate, ProviderResult, TrunkId, TrunkProvider, AVAILABLE_PORT_NAME,
};

/// Port handling for consumers behind a trunk.
pub struct NestedPorts {
    trunks: Arc<dyn TrunkProvider>,
    /// Trunk ids per pool key, saves the parent port lookup.
    known_trunk_ids: Mutex<HashMap<PoolKey, TrunkId>>,
}

impl std::fmt::Debug for NestedPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NestedPorts")
            .field("known_trunks", &self.known_trunk_ids.lock().len())
            .finish()
    }
}

impl NestedPorts {
    pub fn new(trunks: Arc<dyn TrunkProvider>) -> Self {
        Self {
            trunks,
            known_trunk_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Only the name changes; the device owner stays the trunk's VM.
    pub fn bind_update(&self, consumer: &Consumer) -> PortUpdate {
        PortUpdate::new().name(&consumer.name)
    }

    pub fn clean_update(&self, key: &PoolKey) -> PortUpdate {
        PortUpdate::new()
            .name(AVAILABLE_PORT_NAME)
            .security_groups(key.security_groups.clone())
    }

    pub fn cached_trunk_id(&self, key: &PoolKey) -> Option<TrunkId> {
        self.known_trunk_ids.lock().get(key).cloned()
    }

    async fn trunk_id_for(&self, key: &PoolKey) -> ProviderResult<TrunkId> {
        if let Some(trunk_id) = self.cached_trunk_id(key) {
            return Ok(trunk_id);
        }

        let parent = self.trunks.parent_port_by_host(&key.host_addr).await?;
        let trunk_id = self.trunks.trunk_id(&parent).await?;
        debug!(pool_key = %key, trunk_id = %trunk_id, "Cached trunk id");
        self.known_trunk_ids
            .lock()
            .insert(key.clone(), trunk_id.clone());
        Ok(trunk_id)
    }

    /// Detaches the subport and releases its VLAN tag.
    ///
    /// A subport that is already detached counts as success. Any other
    /// failure is returned before the VLAN tag is touched.
    #[instrument(skip(self, key), fields(pool_key = %key))]
    pub async fn teardown(
        &self,
        port_id: &str,
        key: &PoolKey,
        vlan_id: Option<u16>,
    ) -> ProviderResult<()> {
        let trunk_id = self.trunk_id_for(key).await?;

        match self.trunks.remove_subport(&trunk_id, port_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(port_id, trunk_id = %trunk_id, "Subport already detached");
            }
            Err(e) => return Err(e),
        }

        if let Some(vlan_id) = vlan_id {
            self.trunks.release_vlan_id(vlan_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryProvider, ProviderCall};
    use vifpool_common::{SubnetSpec, VifProvider};

    fn key() -> PoolKey {
        PoolKey::new("10.0.0.1", "p1", ["sgA"])
    }

    #[test]
    fn test_bind_sets_name_only() {
        let provider = Arc::new(InMemoryProvider::nested());
        let nested = NestedPorts::new(provider);
        let consumer = Consumer::new("nginx-1", "uid-1");
        let update = nested.bind_update(&consumer);
        assert_eq!(update.name.as_deref(), Some("nginx-1"));
        assert!(update.device_id.is_none());

        let update = nested.clean_update(&key());
        assert_eq!(update.name.as_deref(), Some(AVAILABLE_PORT_NAME));
        assert!(update.device_id.is_none());
        assert_eq!(update.security_groups, Some(vec!["sgA".to_string()]));
    }

    #[tokio::test]
    async fn test_teardown_caches_trunk() {
        let provider = Arc::new(InMemoryProvider::nested());
        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("10.0.0.1");
        let vifs = provider
            .request_vifs(&consumer, "p1", &SubnetSpec::default(), &[], 2)
            .await
            .unwrap();
        let nested = NestedPorts::new(provider.clone());
        assert!(nested.cached_trunk_id(&key()).is_none());

        for vif in &vifs {
            nested.teardown(&vif.id, &key(), vif.vlan_id).await.unwrap();
            assert!(!provider.is_subport(&vif.id));
            assert!(!provider.vlan_in_use(vif.vlan_id.unwrap()));
        }

        assert!(nested.cached_trunk_id(&key()).is_some());
        let lookups = provider.count_calls(|c| matches!(c, ProviderCall::ParentPortByHost(_)));
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn test_teardown_already_detached() {
        let provider = Arc::new(InMemoryProvider::nested());
        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("10.0.0.1");
        let vif = provider
            .request_vifs(&consumer, "p1", &SubnetSpec::default(), &[], 1)
            .await
            .unwrap()
            .remove(0);
        let nested = NestedPorts::new(provider.clone());

        nested.teardown(&vif.id, &key(), vif.vlan_id).await.unwrap();
        // second pass: subport gone, no VLAN left to release
        nested.teardown(&vif.id, &key(), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_detach_failure_keeps_vlan() {
        let provider = Arc::new(InMemoryProvider::nested());
        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("10.0.0.1");
        let vif = provider
            .request_vifs(&consumer, "p1", &SubnetSpec::default(), &[], 1)
            .await
            .unwrap()
            .remove(0);
        provider.fail_detach_for(&vif.id);
        let nested = NestedPorts::new(provider.clone());

        let result = nested.teardown(&vif.id, &key(), vif.vlan_id).await;
        assert!(result.is_err());
        assert!(provider.is_subport(&vif.id));
        assert!(provider.vlan_in_use(vif.vlan_id.unwrap()));
    }
}
