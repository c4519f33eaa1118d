//! Background reclamation loop.
//!
//! One loop per pool sweeps the recycle queue, then sleeps for the update
//! frequency. The loop runs until its [`ReclaimerHandle`] is shut down or
//! dropped.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vifpool_common::{PoolError, PoolResult};

use crate::pool::VifPool;

/// Supervises a running reclamation loop.
#[derive(Debug)]
pub struct ReclaimerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ReclaimerHandle {
    pub(crate) fn spawn(pool: VifPool) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recycle_loop(pool, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Returns true once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops the loop and waits for it to exit.
    ///
    /// A cycle in progress is abandoned at its next provider call; the port
    /// being handled stays queued.
    pub async fn shutdown(mut self) -> PoolResult<()> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| PoolError::reclaimer(format!("join failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for ReclaimerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn recycle_loop(pool: VifPool, cancel: CancellationToken) {
    let period = pool.config().update_frequency();
    info!(
        variant = pool.variant().name(),
        period_secs = period.as_secs(),
        "Starting port recycling loop"
    );

    loop {
        let report = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            report = pool.run_recycle_cycle() => report,
        };

        if report.retained > 0 || report.dropped > 0 {
            warn!(
                recycled = report.recycled,
                deleted = report.deleted,
                retained = report.retained,
                dropped = report.dropped,
                skipped = report.skipped,
                "Recycling cycle finished with failures"
            );
        } else if !report.is_empty() {
            info!(
                recycled = report.recycled,
                deleted = report.deleted,
                skipped = report.skipped,
                "Recycling cycle finished"
            );
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(period) => {}
        }
    }

    pool.reclaimer_stopped();
    info!("Port recycling loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryProvider;
    use std::sync::Arc;
    use std::time::Duration;
    use vifpool_common::{Consumer, PoolKey, Vif, VifPoolConfig};

    fn config() -> VifPoolConfig {
        VifPoolConfig {
            ports_pool_min: 0,
            ports_pool_update_frequency: 1,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_recycles_released_ports() {
        let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config()).unwrap();
        let handle = pool.start().unwrap();

        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("h1");
        let sgs = vec!["sgA".to_string()];
        pool.release_vif(&consumer, &Vif::new("out-of-band"), "p1", &sgs)
            .unwrap();
        assert_eq!(pool.recyclable_count(), 1);

        // the port is unknown to the provider, so the clean finds nothing
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(pool.recyclable_count(), 0);
        assert!(pool.is_consistent());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config()).unwrap();
        let handle = pool.start().unwrap();
        assert!(!handle.is_finished());
        handle.shutdown().await.unwrap();

        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("h1");
        pool.release_vif(&consumer, &Vif::new("r1"), "p1", &[]).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.recyclable_count(), 1);
        assert_eq!(pool.available_count(&PoolKey::new("h1", "p1", Vec::<String>::new())), 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config()).unwrap();
        let _handle = pool.start().unwrap();
        let err = pool.start().unwrap_err();
        assert!(matches!(err, PoolError::Reclaimer { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_shutdown() {
        let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config()).unwrap();
        pool.start().unwrap().shutdown().await.unwrap();

        let handle = pool.start().unwrap();
        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("h1");
        pool.release_vif(&consumer, &Vif::new("r1"), "p1", &[]).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(pool.recyclable_count(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_loop() {
        let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config()).unwrap();
        drop(pool.start().unwrap());
        tokio::task::yield_now().await;

        let consumer = Consumer::new("nginx-1", "uid-1").scheduled_on("h1");
        pool.release_vif(&consumer, &Vif::new("r1"), "p1", &[]).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.recyclable_count(), 1);
    }
}
