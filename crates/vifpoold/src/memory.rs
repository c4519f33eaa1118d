//! In-memory provider.
//!
//! Keeps ports, trunks and VLAN tags in process memory. The daemon uses it
//! for dry runs; tests use its fault injection and call log to drive the
//! engine through the control plane's failure modes.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use vifpool_common::{
    Consumer, ParentPort, PortId, PortUpdate, ProviderError, ProviderResult, SubnetSpec, TrunkId,
    TrunkProvider, Vif, VifProvider,
};

/// First VLAN tag handed out to subports.
const VLAN_ID_BASE: u16 = 100;

/// A call received by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    RequestVif { project_id: String },
    RequestVifs { project_id: String, num_ports: usize },
    ReleaseVif(PortId),
    ActivateVif(PortId),
    UpdatePort { port_id: PortId, update: PortUpdate },
    DeletePort(PortId),
    ParentPortByHost(String),
    ResolveTrunk(PortId),
    RemoveSubport { trunk_id: TrunkId, port_id: PortId },
    ReleaseVlanId(u16),
}

#[derive(Debug, Default)]
struct MemoryState {
    ports: HashMap<PortId, Vif>,
    next_port: u64,
    /// trunk_id -> attached subports
    subports: HashMap<TrunkId, HashSet<PortId>>,
    vlans_in_use: HashSet<u16>,
    calls: Vec<ProviderCall>,
    fail_update: HashSet<PortId>,
    fail_delete: HashSet<PortId>,
    fail_detach: HashSet<PortId>,
    fail_next_batch: bool,
}

impl MemoryState {
    fn new_port_id(&mut self) -> PortId {
        self.next_port += 1;
        format!("port-{}", self.next_port)
    }

    fn allocate_vlan_id(&mut self) -> ProviderResult<u16> {
        let vlan_id = (VLAN_ID_BASE..=4094)
            .find(|id| !self.vlans_in_use.contains(id))
            .ok_or_else(|| ProviderError::conflict("vlan", "no free VLAN ids"))?;
        self.vlans_in_use.insert(vlan_id);
        Ok(vlan_id)
    }
}

/// Provider backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    nested: bool,
    state: Mutex<MemoryState>,
}

fn trunk_for_host(host_addr: &str) -> TrunkId {
    format!("trunk-{}", host_addr)
}

impl InMemoryProvider {
    /// Provider for flat ports.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that creates trunk subports with VLAN tags.
    pub fn nested() -> Self {
        Self {
            nested: true,
            ..Self::default()
        }
    }

    /// Gets a copy of a port.
    pub fn port(&self, port_id: &str) -> Option<Vif> {
        self.state.lock().ports.get(port_id).cloned()
    }

    /// Number of ports that exist.
    pub fn port_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// Removes a port behind the pool's back.
    pub fn remove_port_out_of_band(&self, port_id: &str) -> Option<Vif> {
        self.state.lock().ports.remove(port_id)
    }

    /// Checks if the port is attached to any trunk.
    pub fn is_subport(&self, port_id: &str) -> bool {
        self.state
            .lock()
            .subports
            .values()
            .any(|ports| ports.contains(port_id))
    }

    pub fn vlan_in_use(&self, vlan_id: u16) -> bool {
        self.state.lock().vlans_in_use.contains(&vlan_id)
    }

    /// Makes every update of `port_id` fail with a client error.
    pub fn fail_update_for(&self, port_id: &str) {
        self.state.lock().fail_update.insert(port_id.to_string());
    }

    /// Makes every delete of `port_id` fail with a client error.
    pub fn fail_delete_for(&self, port_id: &str) {
        self.state.lock().fail_delete.insert(port_id.to_string());
    }

    /// Makes every detach of `port_id` fail with a client error.
    pub fn fail_detach_for(&self, port_id: &str) {
        self.state.lock().fail_detach.insert(port_id.to_string());
    }

    /// Makes the next bulk request fail.
    pub fn fail_next_batch(&self) {
        self.state.lock().fail_next_batch = true;
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fail_update.clear();
        state.fail_delete.clear();
        state.fail_detach.clear();
        state.fail_next_batch = false;
    }

    /// Gets the recorded calls (for testing).
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state.lock().calls.clone()
    }

    /// Counts the recorded calls matching `pred`.
    pub fn count_calls(&self, pred: impl Fn(&ProviderCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn create_port(
        &self,
        state: &mut MemoryState,
        consumer: &Consumer,
        security_groups: &[String],
    ) -> ProviderResult<Vif> {
        let port_id = state.new_port_id();
        let mut vif = Vif::new(port_id.clone()).with_security_groups(security_groups.to_vec());

        if self.nested {
            let host_addr = consumer.host_addr.as_deref().ok_or_else(|| {
                ProviderError::internal(format!("consumer '{}' has no host", consumer.name))
            })?;
            let vlan_id = state.allocate_vlan_id()?;
            vif.vlan_id = Some(vlan_id);
            state
                .subports
                .entry(trunk_for_host(host_addr))
                .or_default()
                .insert(port_id.clone());
        }

        state.ports.insert(port_id, vif.clone());
        Ok(vif)
    }
}

#[async_trait]
impl VifProvider for InMemoryProvider {
    async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        _subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> ProviderResult<Vif> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::RequestVif {
            project_id: project_id.to_string(),
        });
        let mut vif = self.create_port(&mut state, consumer, security_groups)?;
        PortUpdate::new()
            .name(&consumer.name)
            .device_id(&consumer.uid)
            .apply_to(&mut vif);
        state.ports.insert(vif.id.clone(), vif.clone());
        Ok(vif)
    }

    async fn request_vifs(
        &self,
        consumer: &Consumer,
        project_id: &str,
        _subnets: &SubnetSpec,
        security_groups: &[String],
        num_ports: usize,
    ) -> ProviderResult<Vec<Vif>> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::RequestVifs {
            project_id: project_id.to_string(),
            num_ports,
        });
        if std::mem::take(&mut state.fail_next_batch) {
            return Err(ProviderError::client("request_vifs", "bulk port create failed"));
        }

        let vifs = (0..num_ports)
            .map(|_| self.create_port(&mut state, consumer, security_groups))
            .collect::<ProviderResult<Vec<_>>>()?;
        debug!(count = vifs.len(), project_id, "Created ports");
        Ok(vifs)
    }

    async fn release_vif(&self, _consumer: &Consumer, vif: &Vif) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::ReleaseVif(vif.id.clone()));
        state
            .ports
            .remove(&vif.id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found("port", &vif.id))
    }

    async fn activate_vif(&self, _consumer: &Consumer, vif: &mut Vif) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::ActivateVif(vif.id.clone()));
        let port = state
            .ports
            .get_mut(&vif.id)
            .ok_or_else(|| ProviderError::not_found("port", &vif.id))?;
        port.active = true;
        vif.active = true;
        Ok(())
    }

    async fn update_port(&self, port_id: &str, update: &PortUpdate) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::UpdatePort {
            port_id: port_id.to_string(),
            update: update.clone(),
        });
        if state.fail_update.contains(port_id) {
            return Err(ProviderError::client("update_port", "injected failure"));
        }
        let port = state
            .ports
            .get_mut(port_id)
            .ok_or_else(|| ProviderError::not_found("port", port_id))?;
        update.apply_to(port);
        Ok(())
    }

    async fn delete_port(&self, port_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::DeletePort(port_id.to_string()));
        if state.fail_delete.contains(port_id) {
            return Err(ProviderError::client("delete_port", "injected failure"));
        }
        if state.subports.values().any(|ports| ports.contains(port_id)) {
            return Err(ProviderError::conflict(
                port_id,
                "port is still attached to a trunk",
            ));
        }
        state
            .ports
            .remove(port_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found("port", port_id))
    }
}

#[async_trait]
impl TrunkProvider for InMemoryProvider {
    async fn parent_port_by_host(&self, host_addr: &str) -> ProviderResult<ParentPort> {
        let mut state = self.state.lock();
        state
            .calls
            .push(ProviderCall::ParentPortByHost(host_addr.to_string()));
        Ok(ParentPort {
            id: format!("parent-{}", host_addr),
            host_addr: host_addr.to_string(),
            trunk_id: Some(trunk_for_host(host_addr)),
        })
    }

    async fn trunk_id(&self, parent: &ParentPort) -> ProviderResult<TrunkId> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::ResolveTrunk(parent.id.clone()));
        parent
            .trunk_id
            .clone()
            .ok_or_else(|| ProviderError::not_found("trunk", &parent.id))
    }

    async fn remove_subport(&self, trunk_id: &str, port_id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::RemoveSubport {
            trunk_id: trunk_id.to_string(),
            port_id: port_id.to_string(),
        });
        if state.fail_detach.contains(port_id) {
            return Err(ProviderError::client("remove_subport", "injected failure"));
        }
        let removed = state
            .subports
            .get_mut(trunk_id)
            .is_some_and(|ports| ports.remove(port_id));
        if removed {
            Ok(())
        } else {
            Err(ProviderError::not_found("subport", port_id))
        }
    }

    async fn release_vlan_id(&self, vlan_id: u16) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.calls.push(ProviderCall::ReleaseVlanId(vlan_id));
        if state.vlans_in_use.remove(&vlan_id) {
            Ok(())
        } else {
            Err(ProviderError::not_found("vlan", vlan_id.to_string()))
        }
    }
}
