//! Data model shared by the pool engine and its providers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Control plane port identifier.
pub type PortId = String;

/// Control plane trunk identifier.
pub type TrunkId = String;

/// Name given to a port that sits in a pool waiting for a consumer.
pub const AVAILABLE_PORT_NAME: &str = "available-port";

/// Pool partition identity: host, project and security groups.
///
/// Security group order is preserved, so two keys listing the same groups in
/// a different order belong to different pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    /// Host address of the node the consumer is scheduled on.
    pub host_addr: String,
    /// Tenant/project identifier.
    pub project_id: String,
    /// Security group identifiers.
    pub security_groups: Vec<String>,
}

impl PoolKey {
    /// Creates a new pool key.
    pub fn new(
        host_addr: impl Into<String>,
        project_id: impl Into<String>,
        security_groups: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            host_addr: host_addr.into(),
            project_id: project_id.into(),
            security_groups: security_groups.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.host_addr,
            self.project_id,
            self.security_groups.join(",")
        )
    }
}

/// A workload that needs a network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    /// Display name
    pub name: String,
    /// Unique id
    pub uid: String,
    /// Host address, set once the scheduler placed the consumer
    pub host_addr: Option<String>,
}

impl Consumer {
    /// Create a consumer that has not been scheduled yet
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            host_addr: None,
        }
    }

    /// Set the host address
    pub fn scheduled_on(mut self, host_addr: impl Into<String>) -> Self {
        self.host_addr = Some(host_addr.into());
        self
    }
}

/// Network and subnets a port is allocated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub network_id: String,
    pub subnet_ids: Vec<String>,
}

impl SubnetSpec {
    pub fn new(
        network_id: impl Into<String>,
        subnet_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            subnet_ids: subnet_ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// A virtual network interface (port).
///
/// Identity is `id`; every other field may change while the port cycles
/// through the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vif {
    /// Port id
    pub id: PortId,
    /// Display name
    pub name: String,
    /// Device binding, empty when unbound
    pub device_id: String,
    /// Segmentation id of the subport (nested ports only)
    pub vlan_id: Option<u16>,
    /// Security groups applied to the port
    pub security_groups: Vec<String>,
    /// Whether the port has been activated
    pub active: bool,
}

impl Vif {
    /// Create an unbound port
    pub fn new(id: impl Into<PortId>) -> Self {
        Self {
            id: id.into(),
            name: AVAILABLE_PORT_NAME.to_string(),
            device_id: String::new(),
            vlan_id: None,
            security_groups: Vec::new(),
            active: false,
        }
    }

    /// Set the VLAN tag
    pub fn with_vlan_id(mut self, vlan_id: u16) -> Self {
        self.vlan_id = Some(vlan_id);
        self
    }

    /// Set the security groups
    pub fn with_security_groups(mut self, security_groups: Vec<String>) -> Self {
        self.security_groups = security_groups;
        self
    }

    /// Check if the port is bound to a device
    pub fn is_bound(&self) -> bool {
        !self.device_id.is_empty()
    }
}

/// Partial update of a port's mutable attributes.
///
/// Fields left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortUpdate {
    pub name: Option<String>,
    pub device_id: Option<String>,
    pub security_groups: Option<Vec<String>>,
}

impl PortUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn security_groups(mut self, security_groups: Vec<String>) -> Self {
        self.security_groups = Some(security_groups);
        self
    }

    /// Returns true if the update changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.device_id.is_none() && self.security_groups.is_none()
    }

    /// Apply the update to a local port record.
    pub fn apply_to(&self, vif: &mut Vif) {
        if let Some(name) = &self.name {
            vif.name = name.clone();
        }
        if let Some(device_id) = &self.device_id {
            vif.device_id = device_id.clone();
        }
        if let Some(security_groups) = &self.security_groups {
            vif.security_groups = security_groups.clone();
        }
    }
}

/// The trunk parent port of a host (nested deployments).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentPort {
    /// Port id of the host's own interface
    pub id: PortId,
    /// Fixed address of the host on that port
    pub host_addr: String,
    /// Trunk attached to the port, if known
    pub trunk_id: Option<TrunkId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_equality() {
        let a = PoolKey::new("10.0.0.1", "p1", ["sgA", "sgB"]);
        let b = PoolKey::new("10.0.0.1", "p1", ["sgA", "sgB"]);
        let c = PoolKey::new("10.0.0.1", "p1", ["sgB", "sgA"]);
        let d = PoolKey::new("10.0.0.2", "p1", ["sgA", "sgB"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.to_string(), "10.0.0.1|p1|sgA,sgB");
    }

    #[test]
    fn test_consumer_scheduling() {
        let consumer = Consumer::new("nginx-1", "uid-1");
        assert!(consumer.host_addr.is_none());

        let consumer = consumer.scheduled_on("10.0.0.1");
        assert_eq!(consumer.host_addr.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_vif_new() {
        let vif = Vif::new("port-1").with_vlan_id(101);
        assert_eq!(vif.name, AVAILABLE_PORT_NAME);
        assert_eq!(vif.vlan_id, Some(101));
        assert!(!vif.is_bound());
        assert!(!vif.active);
    }

    #[test]
    fn test_port_update_apply() {
        let mut vif = Vif::new("port-1");
        let update = PortUpdate::new().name("nginx-1").device_id("uid-1");
        assert!(!update.is_empty());

        update.apply_to(&mut vif);
        assert_eq!(vif.name, "nginx-1");
        assert_eq!(vif.device_id, "uid-1");
        assert!(vif.security_groups.is_empty());

        PortUpdate::new()
            .security_groups(vec!["sgA".to_string()])
            .apply_to(&mut vif);
        assert_eq!(vif.name, "nginx-1");
        assert_eq!(vif.security_groups, vec!["sgA".to_string()]);
        assert!(PortUpdate::new().is_empty());
    }
}
