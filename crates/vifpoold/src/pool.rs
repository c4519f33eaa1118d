//! VifPool - pooled port allocation engine
//!
//! Request flow:
//! 1. The consumer's (host, project, security groups) selects a pool
//! 2. A ready port is popped and bound to the consumer
//! 3. An empty or short pool triggers a detached, debounced populate
//!
//! Release only queues the port; the reclamation loop cleans it and returns
//! it to its pool, or deletes it when the pool is full.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use vifpool_common::{
    Consumer, PoolError, PoolKey, PoolResult, PortId, RecycleFailurePolicy, SubnetSpec,
    TrunkProvider, Vif, VifPoolConfig, VifProvider,
};

use crate::driver::VifPoolDriver;
use crate::reclaim::ReclaimerHandle;
use crate::registry::{PoolRegistry, VifPoolStats};
use crate::variant::PoolVariant;

/// Result of reclaiming a single port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleOutcome {
    /// Cleaned and returned to its pool.
    Recycled,
    /// Pool was full; port destroyed.
    Deleted,
    /// Clean or teardown failed; handled per [`RecycleFailurePolicy`].
    Failed,
    /// Port unknown or already gone; dropped from the queue.
    Skipped,
}

/// Totals for one reclamation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecycleReport {
    pub recycled: usize,
    pub deleted: usize,
    /// Failed and kept queued for the next cycle.
    pub retained: usize,
    /// Failed and removed from the queue.
    pub dropped: usize,
    pub skipped: usize,
}

impl RecycleReport {
    /// Number of queue entries looked at.
    pub fn processed(&self) -> usize {
        self.recycled + self.deleted + self.retained + self.dropped + self.skipped
    }

    pub fn is_empty(&self) -> bool {
        self.processed() == 0
    }
}

struct PoolInner {
    config: VifPoolConfig,
    provider: Arc<dyn VifProvider>,
    variant: PoolVariant,
    registry: Mutex<PoolRegistry>,
    reclaimer_started: AtomicBool,
}

/// Pool of pre-created ports, partitioned by [`PoolKey`].
///
/// Cloning is cheap and every clone drives the same pools. Each instance owns
/// its registry; nothing is shared between separately constructed pools.
#[derive(Clone)]
pub struct VifPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for VifPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("VifPool")
            .field("variant", &self.inner.variant.name())
            .field("config", &self.inner.config)
            .field("existing", &registry.existing_count())
            .field("recyclable", &registry.recyclable_count())
            .finish()
    }
}

impl VifPool {
    /// Creates a pool. The reclamation loop is not running until [`start`](Self::start).
    pub fn new(
        provider: Arc<dyn VifProvider>,
        variant: PoolVariant,
        config: VifPoolConfig,
    ) -> PoolResult<Self> {
        config.validate()?;
        info!(
            variant = variant.name(),
            pool_min = config.ports_pool_min,
            pool_max = config.ports_pool_max,
            pool_batch = config.ports_pool_batch,
            recycle_failure_policy = config.recycle_failure_policy.as_str(),
            "Created VIF pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                provider,
                variant,
                registry: Mutex::new(PoolRegistry::new()),
                reclaimer_started: AtomicBool::new(false),
            }),
        })
    }

    /// Creates a pool of directly bound ports.
    pub fn flat(provider: Arc<dyn VifProvider>, config: VifPoolConfig) -> PoolResult<Self> {
        Self::new(provider, PoolVariant::flat(), config)
    }

    /// Creates a pool of trunk subports.
    pub fn nested<P>(provider: Arc<P>, config: VifPoolConfig) -> PoolResult<Self>
    where
        P: VifProvider + TrunkProvider + 'static,
    {
        let trunks: Arc<dyn TrunkProvider> = provider.clone();
        Self::new(provider, PoolVariant::nested(trunks), config)
    }

    pub fn config(&self) -> &VifPoolConfig {
        &self.inner.config
    }

    pub fn variant(&self) -> &PoolVariant {
        &self.inner.variant
    }

    /// Spawns the reclamation loop.
    ///
    /// Only one loop may run per pool. Dropping or shutting down the returned
    /// handle stops it; once the loop has exited the pool can be started
    /// again.
    pub fn start(&self) -> PoolResult<ReclaimerHandle> {
        if self.inner.reclaimer_started.swap(true, Ordering::SeqCst) {
            return Err(PoolError::reclaimer("reclamation loop already started"));
        }
        Ok(ReclaimerHandle::spawn(self.clone()))
    }

    pub(crate) fn reclaimer_stopped(&self) {
        self.inner.reclaimer_started.store(false, Ordering::SeqCst);
    }

    /// Derives the pool key for a consumer.
    pub fn pool_key(
        consumer: &Consumer,
        project_id: &str,
        security_groups: &[String],
    ) -> PoolResult<PoolKey> {
        let host_addr = consumer
            .host_addr
            .as_deref()
            .ok_or_else(|| PoolError::not_scheduled(&consumer.name))?;
        Ok(PoolKey::new(
            host_addr,
            project_id,
            security_groups.iter().cloned(),
        ))
    }

    /// Hands a ready port to `consumer`.
    ///
    /// Returns `ResourceNotReady` when the pool is empty; a populate has been
    /// triggered by then and the caller should retry later.
    #[instrument(skip_all, fields(consumer = %consumer.name))]
    pub async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> PoolResult<Vif> {
        let key = match Self::pool_key(consumer, project_id, security_groups) {
            Ok(key) => key,
            Err(e) => {
                warn!("Consumer has not been scheduled yet");
                return Err(e);
            }
        };

        match self.get_port_from_pool(&key, consumer, subnets).await {
            Err(e @ PoolError::ResourceNotReady { .. }) => {
                warn!(pool_key = %key, "Ports pool does not have available ports");
                self.spawn_populate(key, consumer.clone(), subnets.clone());
                Err(e)
            }
            other => other,
        }
    }

    async fn get_port_from_pool(
        &self,
        key: &PoolKey,
        consumer: &Consumer,
        subnets: &SubnetSpec,
    ) -> PoolResult<Vif> {
        let port_id = {
            let mut registry = self.inner.registry.lock();
            match registry.pop_available(key) {
                Some(port_id) => port_id,
                None => {
                    registry.stats_mut().not_ready += 1;
                    return Err(PoolError::not_ready(&consumer.name));
                }
            }
        };

        let update = self.inner.variant.bind_update(consumer);
        if let Err(e) = self.inner.provider.update_port(&port_id, &update).await {
            warn!(
                port_id = %port_id,
                error = %e,
                "Failed to bind pooled port, queueing it for recycling"
            );
            self.inner
                .registry
                .lock()
                .mark_recyclable(port_id, key.clone());
            return Err(e.into());
        }

        let (vif, pool_size) = {
            let mut registry = self.inner.registry.lock();
            registry.stats_mut().acquired += 1;
            let vif = match registry.get_mut(&port_id) {
                Some(vif) => {
                    update.apply_to(vif);
                    vif.clone()
                }
                None => {
                    let mut vif = Vif::new(port_id.clone());
                    update.apply_to(&mut vif);
                    registry.register(vif.clone());
                    vif
                }
            };
            (vif, registry.available_count(key))
        };
        debug!(port_id = %vif.id, pool_size, "Acquired port from pool");

        if pool_size < self.inner.config.ports_pool_min {
            self.spawn_populate(key.clone(), consumer.clone(), subnets.clone());
        }
        Ok(vif)
    }

    fn spawn_populate(&self, key: PoolKey, consumer: Consumer, subnets: SubnetSpec) {
        let pool = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pool.populate_pool(&key, &consumer, &subnets).await {
                error!(pool_key = %key, error = %e, "Failed to populate ports pool");
            }
        });
    }

    /// Tops up `key`'s pool with one bulk request.
    ///
    /// Skipped when another populate for the key happened within the update
    /// frequency, or when the pool already holds the minimum. Returns the
    /// number of ports added.
    #[instrument(skip(self, key, consumer, subnets), fields(pool_key = %key))]
    pub async fn populate_pool(
        &self,
        key: &PoolKey,
        consumer: &Consumer,
        subnets: &SubnetSpec,
    ) -> PoolResult<usize> {
        let config = &self.inner.config;
        let pool_size = {
            let mut registry = self.inner.registry.lock();
            if !registry.try_begin_update(key, Instant::now(), config.update_frequency()) {
                info!("Not enough time since the last pool update");
                return Ok(0);
            }
            registry.available_count(key)
        };

        if pool_size >= config.ports_pool_min {
            debug!(pool_size, "Pool already holds the minimum");
            return Ok(0);
        }

        let num_ports = config.batch_size_for(pool_size);
        let vifs = self
            .inner
            .provider
            .request_vifs(
                consumer,
                &key.project_id,
                subnets,
                &key.security_groups,
                num_ports,
            )
            .await?;

        let count = vifs.len();
        let mut registry = self.inner.registry.lock();
        for vif in vifs {
            let port_id = vif.id.clone();
            registry.register(vif);
            registry.push_available(key.clone(), port_id);
        }
        registry.stats_mut().populated += count as u64;
        info!(count, requested = num_ports, "Populated ports pool");
        Ok(count)
    }

    /// Queues a port for reclamation. No control plane call is made.
    ///
    /// Ports the pool has never seen are adopted. Releasing a port that is
    /// still ready in a pool is ignored.
    #[instrument(skip_all, fields(consumer = %consumer.name, port_id = %vif.id))]
    pub fn release_vif(
        &self,
        consumer: &Consumer,
        vif: &Vif,
        project_id: &str,
        security_groups: &[String],
    ) -> PoolResult<()> {
        let key = Self::pool_key(consumer, project_id, security_groups)?;

        let mut registry = self.inner.registry.lock();
        if !registry.contains(&vif.id) {
            debug!("Adopting port unknown to the pool");
            registry.register(vif.clone());
        }
        if !registry.mark_recyclable(vif.id.clone(), key) {
            warn!("Released port is already available, ignoring");
        }
        Ok(())
    }

    /// Activates a port through the provider.
    pub async fn activate_vif(&self, consumer: &Consumer, vif: &mut Vif) -> PoolResult<()> {
        self.inner.provider.activate_vif(consumer, vif).await?;
        if let Some(known) = self.inner.registry.lock().get_mut(&vif.id) {
            known.active = true;
        }
        Ok(())
    }

    /// Runs one sweep over the ports waiting for reclamation.
    ///
    /// No single port's failure stops the sweep.
    pub async fn run_recycle_cycle(&self) -> RecycleReport {
        let snapshot = self.inner.registry.lock().snapshot_recyclable();
        let mut report = RecycleReport::default();

        for (port_id, key) in snapshot {
            match self.recycle_port(&port_id, &key).await {
                RecycleOutcome::Recycled => report.recycled += 1,
                RecycleOutcome::Deleted => report.deleted += 1,
                RecycleOutcome::Skipped => {
                    self.inner.registry.lock().delete_recyclable_entry(&port_id);
                    report.skipped += 1;
                }
                RecycleOutcome::Failed => {
                    let mut registry = self.inner.registry.lock();
                    registry.stats_mut().recycle_failures += 1;
                    match self.inner.config.recycle_failure_policy {
                        RecycleFailurePolicy::Retain => report.retained += 1,
                        RecycleFailurePolicy::Drop => {
                            warn!(port_id = %port_id, "Dropping port from the recycle queue");
                            registry.delete_recyclable_entry(&port_id);
                            report.dropped += 1;
                        }
                    }
                }
            }
        }
        report
    }

    /// Reclaims one queued port: back into its pool if there is room,
    /// destroyed otherwise. A port whose deletion was attempted before is
    /// always destroyed.
    pub async fn recycle_port(&self, port_id: &PortId, key: &PoolKey) -> RecycleOutcome {
        let has_room = {
            let registry = self.inner.registry.lock();
            if !registry.contains(port_id) {
                debug!(port_id = %port_id, "Port is not in the ports list");
                return RecycleOutcome::Skipped;
            }
            // a port whose deletion already started is finished off
            !registry.is_retiring(port_id)
                && (!self.inner.config.is_bounded()
                    || registry.available_count(key) < self.inner.config.ports_pool_max)
        };

        if has_room {
            self.return_port_to_pool(port_id, key).await
        } else {
            self.destroy_port(port_id, key).await
        }
    }

    async fn return_port_to_pool(&self, port_id: &PortId, key: &PoolKey) -> RecycleOutcome {
        let update = self.inner.variant.clean_update(key);
        match self.inner.provider.update_port(port_id, &update).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                warn!(port_id = %port_id, "Port vanished before it could be reused");
                let mut registry = self.inner.registry.lock();
                registry.delete_recyclable_entry(port_id);
                registry.remove_existing(port_id);
                return RecycleOutcome::Skipped;
            }
            Err(e) => {
                warn!(
                    port_id = %port_id,
                    error = %e,
                    "Error preparing port to be reused"
                );
                return RecycleOutcome::Failed;
            }
        }

        let mut registry = self.inner.registry.lock();
        let Some(vif) = registry.get_mut(port_id) else {
            return RecycleOutcome::Skipped;
        };
        update.apply_to(vif);
        vif.active = false;
        registry.delete_recyclable_entry(port_id);
        registry.push_available(key.clone(), port_id.clone());
        registry.stats_mut().recycled += 1;
        debug!(port_id = %port_id, pool_key = %key, "Returned port to pool");
        RecycleOutcome::Recycled
    }

    async fn destroy_port(&self, port_id: &PortId, key: &PoolKey) -> RecycleOutcome {
        let vlan_id = {
            let mut registry = self.inner.registry.lock();
            let Some(vlan_id) = registry.get(port_id).map(|vif| vif.vlan_id) else {
                return RecycleOutcome::Skipped;
            };
            registry.mark_retiring(port_id);
            vlan_id
        };

        // Teardown is repeatable: an already detached subport counts as
        // detached, and the VLAN tag is forgotten once released.
        if let Err(e) = self.inner.variant.teardown(port_id, key, vlan_id).await {
            warn!(port_id = %port_id, error = %e, "Error removing the subport");
            return RecycleOutcome::Failed;
        }
        if vlan_id.is_some() {
            let mut registry = self.inner.registry.lock();
            if let Some(vif) = registry.get_mut(port_id) {
                vif.vlan_id = None;
            }
        }

        match self.inner.provider.delete_port(port_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(port_id = %port_id, "Unable to release port as it no longer exists");
            }
            Err(e) => {
                warn!(port_id = %port_id, error = %e, "Error deleting port");
                return RecycleOutcome::Failed;
            }
        }

        let mut registry = self.inner.registry.lock();
        registry.delete_recyclable_entry(port_id);
        registry.remove_existing(port_id);
        registry.stats_mut().deleted += 1;
        debug!(port_id = %port_id, pool_key = %key, "Deleted port from full pool");
        RecycleOutcome::Deleted
    }

    /// Number of ready ports for `key`.
    pub fn available_count(&self, key: &PoolKey) -> usize {
        self.inner.registry.lock().available_count(key)
    }

    /// Ready port ids for `key`, next to be handed out last.
    pub fn available_ports(&self, key: &PoolKey) -> Vec<PortId> {
        self.inner.registry.lock().available_ports(key).to_vec()
    }

    pub fn recyclable_count(&self) -> usize {
        self.inner.registry.lock().recyclable_count()
    }

    pub fn is_recyclable(&self, port_id: &str) -> bool {
        self.inner.registry.lock().is_recyclable(port_id)
    }

    /// Gets the pool's record of a port.
    pub fn known_vif(&self, port_id: &str) -> Option<Vif> {
        self.inner.registry.lock().get(port_id).cloned()
    }

    pub fn existing_count(&self) -> usize {
        self.inner.registry.lock().existing_count()
    }

    pub fn stats(&self) -> VifPoolStats {
        self.inner.registry.lock().stats().clone()
    }

    /// Checks the registry membership invariants.
    pub fn is_consistent(&self) -> bool {
        self.inner.registry.lock().is_consistent()
    }
}

#[async_trait]
impl VifPoolDriver for VifPool {
    fn name(&self) -> &str {
        self.inner.variant.name()
    }

    async fn request_vif(
        &self,
        consumer: &Consumer,
        project_id: &str,
        subnets: &SubnetSpec,
        security_groups: &[String],
    ) -> PoolResult<Vif> {
        VifPool::request_vif(self, consumer, project_id, subnets, security_groups).await
    }

    async fn release_vif(
        &self,
        consumer: &Consumer,
        vif: &Vif,
        project_id: &str,
        security_groups: &[String],
    ) -> PoolResult<()> {
        VifPool::release_vif(self, consumer, vif, project_id, security_groups)
    }

    async fn activate_vif(&self, consumer: &Consumer, vif: &mut Vif) -> PoolResult<()> {
        VifPool::activate_vif(self, consumer, vif).await
    }
}
