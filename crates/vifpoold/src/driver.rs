//! Common interface of the pool drivers.

use async_trait::async_trait;
use vifpool_common::{Consumer, PoolResult, SubnetSpec, Vif};

/// How consumers obtain, activate and give back ports.
///
/// Implemented by [`VifPool`](crate::VifPool), which serves ports from
/// pre-created pools, and by [`NoopVifPool`](crate::NoopVifPool), which
/// forwards every call to the provider.
///
/// # Example
///
/// ```ignore
/// use vifpoold::{VifPoolDriver, VifPool};
///
/// async fn attach(driver: &dyn VifPoolDriver, consumer: &Consumer) -> PoolResult<Vif> {
///     let mut vif = driver.request_vif(consumer, "project-a", &subnets, &sgs).await?;
///     driver.activate_vif(consumer, &mut vif).await?;
///     Ok(vif)
/// }
/// ```
#[async_trait]
pub trait VifPoolDriver: Send + Sync {
    /// Returns the driver name (for logging).
    fn name(&self) -> &str;

    /// Obtains a port for `consumer`.
    async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> PoolResult<Vif>;

    /// Gives back a port obtained through `request_vif`.
    async fn release_vif(
        &self,
        consumer: &Consumer,
        vif: &Vif,
        project_id: &str,
        security_groups: &[String],
    ) -> PoolResult<()>;

    /// Activates a port once the consumer is wired to it.
    async fn activate_vif(&self, consumer: &Consumer, vif: &mut Vif) -> PoolResult<()>;
}
