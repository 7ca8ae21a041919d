//! Library crate for the distributed accessibility-scanning worker.
//!
//! Wires together the browser pool, crawler, rule engine runner, finding
//! normalizer, screenshot capturer, persistence gateway, job queue adapter,
//! and scan orchestrator described across spec §4. `main.rs` is a thin
//! binary entry point over [`run_worker`].

pub mod browser_pool;
pub mod browser_profile;
pub mod browser_setup;
pub mod config;
pub mod crawler;
pub mod errors;
pub mod findings;
pub mod health;
pub mod orchestrator;
pub mod persistence;
pub mod queue;
pub mod robots;
pub mod rule_engine;
pub mod screenshots;
pub mod url_guard;

pub use browser_pool::{BrowserPool, BrowserPoolConfig};
pub use config::WorkerConfig;
pub use errors::WorkerError;
pub use orchestrator::OrchestratorContext;

use std::sync::Arc;

use tracing::info;

use crate::crawler::StopFlag;
use crate::findings::TranslationTable;
use crate::health::HealthState;
use crate::persistence::PersistenceGateway;
use crate::queue::QueueAdapter;
use crate::robots::RobotsPolicy;

/// Builds every long-lived component described in spec §5 and spawns
/// `config.worker_concurrency()` worker loops plus the health server, then
/// blocks until `stop` is triggered (typically by a SIGTERM/SIGINT handler
/// in `main.rs`).
///
/// This is the single place that owns process-wide singletons: one browser
/// (spec §4.3: "one per process, shared across workers"), one persistence
/// pool, one queue connection per worker (Redis connections are cheap;
/// consumer identity is per-worker), and one robots cache.
pub async fn run_worker(config: WorkerConfig, stop: StopFlag) -> anyhow::Result<()> {
    let pool = BrowserPool::new(BrowserPoolConfig {
        headless: config.headless(),
        ..BrowserPoolConfig::default()
    });

    let http_client = reqwest::Client::builder()
        .user_agent(config.user_agent().to_string())
        .timeout(config.robots_fetch_timeout())
        .build()?;
    let robots = Arc::new(RobotsPolicy::new(http_client));

    let persistence = Arc::new(PersistenceGateway::connect(config.database_url()).await?);

    let translations = Arc::new(TranslationTable::load(config.rule_translation_path()));
    let worker_concurrency = config.worker_concurrency();
    let config = Arc::new(config);

    let mut worker_handles = Vec::with_capacity(worker_concurrency);
    let mut queues = Vec::with_capacity(worker_concurrency);

    for worker_id in 0..worker_concurrency {
        let consumer_name = format!("worker-{worker_id}");
        let queue = Arc::new(
            QueueAdapter::connect(config.redis_url(), config.queue_name(), &consumer_name).await?,
        );
        queues.push(queue.clone());

        let ctx = OrchestratorContext {
            pool: pool.clone(),
            robots: robots.clone(),
            persistence: persistence.clone(),
            queue,
            translations: translations.clone(),
            config: config.clone(),
            user_agent: config.user_agent().to_string(),
            screenshot_root: config.screenshot_root().clone(),
            stop: stop.clone(),
        };

        worker_handles.push(tokio::spawn(orchestrator::worker_loop(ctx, worker_id)));
    }

    let health_queue =
        queues.first().cloned().expect("worker_concurrency must be at least 1");
    let health_state = HealthState::new(config.app_version().to_string(), pool.clone(), health_queue);
    let health_port = config.health_port();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health::serve(health_state, health_port).await {
            tracing::error!("health server exited: {e}");
        }
    });

    for handle in worker_handles {
        let _ = handle.await;
    }
    health_handle.abort();

    pool.shutdown().await;
    info!("worker shut down cleanly");

    Ok(())
}
