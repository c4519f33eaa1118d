//! External VIF provider capability.
//!
//! The pool engine never talks to the network control plane directly. It
//! goes through these traits, which a deployment implements on top of its
//! networking API client.

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::types::{Consumer, ParentPort, PortUpdate, SubnetSpec, TrunkId, Vif};

/// Port allocation and update operations against the control plane.
///
/// # Example
///
/// ```ignore
/// use vifpool_common::{VifProvider, ProviderResult, PortUpdate};
///
/// struct MyProvider {
///     // ... API client
/// }
///
/// #[async_trait]
/// impl VifProvider for MyProvider {
///     async fn update_port(&self, port_id: &str, update: &PortUpdate) -> ProviderResult<()> {
///         // ... PUT /ports/{port_id}
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait VifProvider: Send + Sync {
    /// Allocates a single port bound to `consumer`.
    async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> ProviderResult<Vif>;

    /// Allocates `num_ports` unbound ports in one bulk request.
    async fn request_vifs(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
        num_ports: usize,
    ) -> ProviderResult<Vec<Vif>>;

    /// Releases a port previously returned by `request_vif`.
    async fn release_vif(&self, consumer: &Consumer, vif: &Vif) -> ProviderResult<()>;

    /// Waits for or marks the port as active.
    async fn activate_vif(&self, consumer: &Consumer, vif: &mut Vif) -> ProviderResult<()>;

    /// Updates mutable port attributes.
    async fn update_port(&self, port_id: &str, update: &PortUpdate) -> ProviderResult<()>;

    /// Deletes a port.
    ///
    /// Returns `ProviderError::NotFound` if the port is already gone.
    async fn delete_port(&self, port_id: &str) -> ProviderResult<()>;
}

/// Trunk, subport and VLAN primitives used by nested deployments.
#[async_trait]
pub trait TrunkProvider: Send + Sync {
    /// Finds the host's own port by its fixed address.
    async fn parent_port_by_host(&self, host_addr: &str) -> ProviderResult<ParentPort>;

    /// Resolves the trunk attached to a parent port.
    async fn trunk_id(&self, parent: &ParentPort) -> ProviderResult<TrunkId>;

    /// Detaches a subport from a trunk.
    ///
    /// Returns `ProviderError::NotFound` if the subport is not attached.
    async fn remove_subport(&self, trunk_id: &str, port_id: &str) -> ProviderResult<()>;

    /// Returns a VLAN tag to the allocator.
    async fn release_vlan_id(&self, vlan_id: u16) -> ProviderResult<()>;
}
