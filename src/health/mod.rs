//! Health Endpoint (spec §6): `/health`, `/health/live`, `/health/ready`,
//! `/metrics` over HTTP, default port 8080.
//!
//! Grounded on `other_examples/manifests/Govcraft-acton-service/Cargo.toml`'s
//! `axum` dependency (the teacher has no HTTP server of its own); route
//! handler shape follows axum's standard `Router::new().route(...)` idiom.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::browser_pool::BrowserPool;
use crate::queue::QueueAdapter;

pub struct HealthState {
    pub started_at: Instant,
    pub version: String,
    pub pool: Arc<BrowserPool>,
    pub queue: Arc<QueueAdapter>,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
}

impl HealthState {
    pub fn new(version: String, pool: Arc<BrowserPool>, queue: Arc<QueueAdapter>) -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            version,
            pool,
            queue,
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
        })
    }

    pub fn record_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: String,
    uptime: u64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct ComponentStatus {
    name: &'static str,
    healthy: bool,
    latency_ms: u128,
}

#[derive(Serialize)]
struct ReadyBody {
    status: &'static str,
    components: Vec<ComponentStatus>,
}

#[derive(Serialize)]
struct MetricsBody {
    uptime_seconds: u64,
    queue_waiting: u64,
    queue_active: u64,
    queue_completed: u64,
    queue_failed: u64,
}

async fn health(State(state): State<Arc<HealthState>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        version: state.version.clone(),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now(),
    })
}

async fn ready(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let queue_started = Instant::now();
    let queue_ok = state.queue.queue_depth().await.is_ok();
    let queue_latency = queue_started.elapsed().as_millis();

    let browser_started = Instant::now();
    let browser_ok = match state.pool.acquire_page().await {
        Ok(page) => {
            state.pool.release_page(page).await;
            true
        }
        Err(_) => false,
    };
    let browser_latency = browser_started.elapsed().as_millis();

    let components = vec![
        ComponentStatus { name: "queue", healthy: queue_ok, latency_ms: queue_latency },
        ComponentStatus { name: "browser", healthy: browser_ok, latency_ms: browser_latency },
    ];

    let status_code = if queue_ok && browser_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(ReadyBody {
            status: if queue_ok && browser_ok { "ready" } else { "not_ready" },
            components,
        }),
    )
}

async fn metrics(State(state): State<Arc<HealthState>>) -> Json<MetricsBody> {
    let queue_waiting = state.queue.queue_depth().await.unwrap_or(0);
    Json(MetricsBody {
        uptime_seconds: state.started_at.elapsed().as_secs(),
        queue_waiting,
        queue_active: 0,
        queue_completed: state.jobs_completed.load(Ordering::Relaxed),
        queue_failed: state.jobs_failed.load(Ordering::Relaxed),
    })
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(health))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(state: Arc<HealthState>, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("health endpoint listening on :{port}");
    axum::serve(listener, app).await
}
