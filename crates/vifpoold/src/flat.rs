//! Flat (bare metal) ports: bound straight to the consumer.

use vifpool_common::{Consumer, PoolKey, PortUpdate, AVAILABLE_PORT_NAME};

/// Port handling for consumers that attach to ports directly.
///
/// Binding sets both the name and the device owner; nothing extra has to
/// happen before a port is deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatPorts;

impl FlatPorts {
    pub fn bind_update(&self, consumer: &Consumer) -> PortUpdate {
        PortUpdate::new()
            .name(&consumer.name)
            .device_id(&consumer.uid)
    }

    pub fn clean_update(&self, key: &PoolKey) -> PortUpdate {
        PortUpdate::new()
            .name(AVAILABLE_PORT_NAME)
            .device_id("")
            .security_groups(key.security_groups.clone())
    }
}
