//! vifpoold - VIF Pool Daemon
//!
//! Entry point for the vifpoold daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vifpool_common::{PoolDaemonConfig, DEFAULT_CONFIG_PATH};
use vifpoold::{InMemoryProvider, NoopVifPool, ReclaimerHandle, VifPool, VifPoolDriver};

/// Pool flavour to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DriverKind {
    /// No pooling, one port per request
    Noop,
    /// Ports bound directly to consumers
    Flat,
    /// Trunk subports for consumers inside VMs
    Nested,
}

/// Pre-created network port pool daemon
#[derive(Parser, Debug)]
#[command(name = "vifpoold")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Pool driver
    #[arg(short = 'd', long, value_enum, default_value_t = DriverKind::Flat)]
    driver: DriverKind,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

/// Initializes tracing/logging subsystem
fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log level")?;
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = PoolDaemonConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    // No control plane client is linked in; ports live in process memory.
    let (driver, reclaimer): (Box<dyn VifPoolDriver>, Option<ReclaimerHandle>) = match args.driver
    {
        DriverKind::Noop => (
            Box::new(NoopVifPool::new(Arc::new(InMemoryProvider::new()))),
            None,
        ),
        DriverKind::Flat => {
            let pool = VifPool::flat(Arc::new(InMemoryProvider::new()), config.vif_pool)?;
            let handle = pool.start()?;
            (Box::new(pool), Some(handle))
        }
        DriverKind::Nested => {
            let pool = VifPool::nested(Arc::new(InMemoryProvider::nested()), config.vif_pool)?;
            let handle = pool.start()?;
            (Box::new(pool), Some(handle))
        }
    };
    info!(driver = driver.name(), "vifpoold initialization complete");

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received SIGINT, shutting down");

    if let Some(handle) = reclaimer {
        handle.shutdown().await?;
    }
    info!("Graceful shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level) {
        eprintln!("vifpoold: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("--- Starting vifpoold ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("vifpoold exiting with error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["vifpoold"]);
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(args.driver, DriverKind::Flat);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_driver() {
        let args = Args::parse_from(["vifpoold", "--driver", "nested", "-c", "/tmp/pool.conf"]);
        assert_eq!(args.driver, DriverKind::Nested);
        assert_eq!(args.config, PathBuf::from("/tmp/pool.conf"));
    }
}
