//! Pass-through driver for deployments that do not pool ports.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use vifpool_common::{Consumer, PoolResult, SubnetSpec, Vif, VifProvider};

use crate::driver::VifPoolDriver;

/// Creates and deletes a port per request.
pub struct NoopVifPool {
    provider: Arc<dyn VifProvider>,
}

impl NoopVifPool {
    pub fn new(provider: Arc<dyn VifProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl VifPoolDriver for NoopVifPool {
    fn name(&self) -> &str {
        "noop"
    }

    async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> PoolResult<Vif> {
        let vif = self
            .provider
            .request_vif(consumer, project_id, subnets, security_groups)
            .await?;
        debug!(consumer = %consumer.name, port_id = %vif.id, "Created port");
        Ok(vif)
    }

    async fn release_vif(
        &self,
        consumer: &Consumer,
        vif: &Vif,
        _project_id: &str,
        _security_groups: &[String],
    ) -> PoolResult<()> {
        self.provider.release_vif(consumer, vif).await?;
        Ok(())
    }

    async fn activate_vif(&self, consumer: &Consumer, vif: &mut Vif) -> PoolResult<()> {
        self.provider.activate_vif(consumer, vif).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryProvider, ProviderCall};

    #[tokio::test]
    async fn test_noop_passthrough() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = NoopVifPool::new(provider.clone());
        assert_eq!(driver.name(), "noop");

        let consumer = Consumer::new("nginx-1", "uid-1");
        let sgs = vec!["sgA".to_string()];
        let mut vif = driver
            .request_vif(&consumer, "p1", &SubnetSpec::default(), &sgs)
            .await
            .unwrap();
        assert_eq!(vif.name, "nginx-1");
        assert_eq!(vif.device_id, "uid-1");

        driver.activate_vif(&consumer, &mut vif).await.unwrap();
        assert!(vif.active);

        driver.release_vif(&consumer, &vif, "p1", &sgs).await.unwrap();
        assert_eq!(provider.port_count(), 0);
        assert_eq!(
            provider.calls(),
            vec![
                ProviderCall::RequestVif {
                    project_id: "p1".to_string()
                },
                ProviderCall::ActivateVif(vif.id.clone()),
                ProviderCall::ReleaseVif(vif.id.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn test_noop_does_not_require_scheduling() {
        let provider = Arc::new(InMemoryProvider::new());
        let driver = NoopVifPool::new(provider);
        let consumer = Consumer::new("nginx-1", "uid-1");
        assert!(driver
            .request_vif(&consumer, "p1", &SubnetSpec::default(), &[])
            .await
            .is_ok());
    }
}
