//! Distributed accessibility-scanning worker.
//!
//! Reads configuration from the environment (spec §6), then runs the
//! worker loop until SIGINT/SIGTERM, draining in-flight jobs cooperatively
//! via the shared [`scanworker::crawler::StopFlag`].

use scanworker::crawler::StopFlag;
use scanworker::WorkerConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::from_env()?;
    let stop = StopFlag::new();

    let shutdown_stop = stop.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight jobs");
        shutdown_stop.stop();
    });

    scanworker::run_worker(config, stop).await
}
