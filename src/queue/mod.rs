//! Job Queue Adapter (spec §4.9): Redis Streams + consumer groups, with
//! at-least-once delivery, exponential-backoff retry, and a DLQ for
//! permanently failed jobs.
//!
//! Grounded on `other_examples/manifests/Govcraft-acton-service/Cargo.toml`'s
//! `redis` + `deadpool-redis` stack (the teacher itself has no queue
//! dependency) — Redis Streams' consumer-group primitives (`XADD`,
//! `XREADGROUP`, `XACK`, `XCLAIM`, `XPENDING`) map directly onto the spec's
//! at-least-once-delivery-plus-DLQ contract. Payload (de)serialization
//! follows the teacher's `serde_json`-everywhere convention, matching spec
//! §9's "define concrete records ... decode queue payloads with a strict
//! schema validator and reject malformed messages to the DLQ immediately."

use std::time::Duration;

use chrono::{DateTime, Utc};
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::errors::WorkerError;

const MAIN_GROUP: &str = "scanworker-workers";
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(5);
const RETAIN_COMPLETED: Duration = Duration::from_secs(24 * 3600);
const RETAIN_FAILED: Duration = Duration::from_secs(7 * 24 * 3600);

/// Queue message (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJobOptions {
    #[serde(default)]
    pub wait_time_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,
    #[serde(default = "default_true")]
    pub capture_screenshots: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ScanJobOptions {
    fn default() -> Self {
        Self { wait_time_ms: None, respect_robots_txt: true, capture_screenshots: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub scan_id: Uuid,
    pub url: String,
    pub crawl: bool,
    pub max_pages: u32,
    pub user_id: String,
    #[serde(default)]
    pub options: ScanJobOptions,
}

/// A job as delivered off the stream, carrying the entry id needed to ack,
/// retry-count, and which consumer-group claim it arrived under.
#[derive(Debug, Clone)]
pub struct DeliveredJob {
    pub entry_id: String,
    pub job: ScanJob,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub stage: String,
    pub pages_scanned: u32,
    pub total_pages: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    pub issues_found: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DlqEnvelope {
    job: ScanJob,
    original_error: String,
    failed_at: DateTime<Utc>,
    attempts: u32,
}

pub struct QueueAdapter {
    pool: Pool,
    queue_name: String,
    consumer_name: String,
}

impl QueueAdapter {
    pub fn dlq_name(queue_name: &str) -> String {
        format!("{queue_name}-dlq")
    }

    pub async fn connect(redis_url: &str, queue_name: &str, consumer_name: &str) -> Result<Self, WorkerError> {
        let pool = PoolConfig::from_url(redis_url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| WorkerError::Network(format!("redis pool creation failed: {e}")))?;

        let adapter = Self {
            pool,
            queue_name: queue_name.to_string(),
            consumer_name: consumer_name.to_string(),
        };
        adapter.ensure_group(&adapter.queue_name).await?;
        Ok(adapter)
    }

    async fn ensure_group(&self, stream: &str) -> Result<(), WorkerError> {
        let mut conn = self.conn().await?;
        let result: redis::RedisResult<()> = conn
            .xgroup_create_mkstream(stream, MAIN_GROUP, "$")
            .await;
        if let Err(e) = result {
            if !e.to_string().contains("BUSYGROUP") {
                return Err(WorkerError::Network(format!("xgroup create failed: {e}")));
            }
        }
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, WorkerError> {
        self.pool
            .get()
            .await
            .map_err(|e| WorkerError::Network(format!("redis pool exhausted: {e}")))
    }

    /// Enqueue a scan job, used by tests and the producer side of the
    /// system (not exercised by the worker's own main loop, which only
    /// consumes).
    pub async fn enqueue(&self, job: &ScanJob) -> Result<String, WorkerError> {
        let payload = serde_json::to_string(job)
            .map_err(|e| WorkerError::Input(format!("job serialization failed: {e}")))?;
        let mut conn = self.conn().await?;
        let id: String = conn
            .xadd(&self.queue_name, "*", &[("payload", payload.as_str())])
            .await
            .map_err(|e| WorkerError::Network(format!("xadd failed: {e}")))?;
        Ok(id)
    }

    /// Blocking-read the next job for this consumer, decoding strictly;
    /// malformed messages are routed directly to the DLQ per spec §9.
    pub async fn next_job(&self, block: Duration) -> Result<Option<DeliveredJob>, WorkerError> {
        let mut conn = self.conn().await?;

        let opts = redis::streams::StreamReadOptions::default()
            .group(MAIN_GROUP, &self.consumer_name)
            .count(1)
            .block(block.as_millis() as usize);

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(&[&self.queue_name], &[">"], &opts)
            .await
            .map_err(|e| WorkerError::Network(format!("xreadgroup failed: {e}")))?;

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                let payload: String = entry
                    .map
                    .get("payload")
                    .and_then(|v| match v {
                        redis::Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
                        redis::Value::SimpleString(s) => Some(s.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();

                match serde_json::from_str::<ScanJob>(&payload) {
                    Ok(job) => {
                        let attempts = self.pending_delivery_count(&entry.id).await.unwrap_or(1);
                        return Ok(Some(DeliveredJob { entry_id: entry.id, job, attempts }));
                    }
                    Err(e) => {
                        warn!("malformed queue message {}: {e}", entry.id);
                        self.route_malformed_to_dlq(&entry.id, &payload, &e.to_string()).await?;
                        self.ack(&entry.id).await?;
                    }
                }
            }
        }

        Ok(None)
    }

    async fn pending_delivery_count(&self, entry_id: &str) -> Result<u32, WorkerError> {
        let mut conn = self.conn().await?;
        let pending: redis::streams::StreamPendingCountReply = conn
            .xpending_consumer_count(&self.queue_name, MAIN_GROUP, "-", "+", 1, &self.consumer_name)
            .await
            .map_err(|e| WorkerError::Network(format!("xpending failed: {e}")))?;
        Ok(pending
            .ids
            .iter()
            .find(|p| p.id == entry_id)
            .map(|p| p.times_delivered as u32)
            .unwrap_or(1))
    }

    pub async fn ack(&self, entry_id: &str) -> Result<(), WorkerError> {
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .xack(&self.queue_name, MAIN_GROUP, &[entry_id])
            .await
            .map_err(|e| WorkerError::Network(format!("xack failed: {e}")))?;
        Ok(())
    }

    pub async fn emit_progress(&self, job_id: Uuid, progress: &JobProgress) -> Result<(), WorkerError> {
        let channel = format!("{}:progress:{job_id}", self.queue_name);
        let payload = serde_json::to_string(progress)
            .map_err(|e| WorkerError::Input(format!("progress serialization failed: {e}")))?;
        let mut conn = self.conn().await?;
        let _: i64 = conn
            .publish(&channel, payload)
            .await
            .map_err(|e| WorkerError::Network(format!("progress publish failed: {e}")))?;
        Ok(())
    }

    /// Backoff for the given 1-based attempt number, per spec §4.9:
    /// "retry attempts = 3, exponential backoff starting 5 s".
    pub fn backoff_for_attempt(attempt: u32) -> Duration {
        BACKOFF_BASE * 2u32.pow(attempt.saturating_sub(1))
    }

    pub fn max_attempts() -> u32 {
        MAX_ATTEMPTS
    }

    /// Route a job to the DLQ after retry exhaustion, per spec §4.9: the
    /// DLQ entry carries the original payload plus
    /// `{originalError, failedAt, attempts}`, retained indefinitely.
    pub async fn route_to_dlq(
        &self,
        delivered: &DeliveredJob,
        error: &str,
    ) -> Result<(), WorkerError> {
        let envelope = DlqEnvelope {
            job: delivered.job.clone(),
            original_error: error.to_string(),
            failed_at: Utc::now(),
            attempts: delivered.attempts,
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| WorkerError::Input(format!("dlq serialization failed: {e}")))?;

        let dlq = Self::dlq_name(&self.queue_name);
        let mut conn = self.conn().await?;
        let _: String = conn
            .xadd(&dlq, "*", &[("payload", payload.as_str())])
            .await
            .map_err(|e| WorkerError::Network(format!("dlq xadd failed: {e}")))?;

        self.ack(&delivered.entry_id).await?;
        Ok(())
    }

    async fn route_malformed_to_dlq(&self, entry_id: &str, raw_payload: &str, error: &str) -> Result<(), WorkerError> {
        let dlq = Self::dlq_name(&self.queue_name);
        let envelope = serde_json::json!({
            "rawPayload": raw_payload,
            "originalError": error,
            "failedAt": Utc::now(),
            "attempts": 1,
            "entryId": entry_id,
        });
        let mut conn = self.conn().await?;
        let _: String = conn
            .xadd(&dlq, "*", &[("payload", envelope.to_string().as_str())])
            .await
            .map_err(|e| WorkerError::Network(format!("dlq xadd failed: {e}")))?;
        Ok(())
    }

    /// `retryFromDLQ(dlqJobId)`: reinsert the original job into the main
    /// queue and remove the DLQ entry.
    pub async fn retry_from_dlq(&self, dlq_entry_id: &str) -> Result<(), WorkerError> {
        let dlq = Self::dlq_name(&self.queue_name);
        let mut conn = self.conn().await?;

        let entries: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
            .arg(&dlq)
            .arg(dlq_entry_id)
            .arg(dlq_entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkerError::Network(format!("xrange failed: {e}")))?;

        let Some((_, fields)) = entries.into_iter().next() else {
            return Err(WorkerError::Input(format!("no DLQ entry {dlq_entry_id}")));
        };
        let payload = fields
            .into_iter()
            .find(|(k, _)| k == "payload")
            .map(|(_, v)| v)
            .ok_or_else(|| WorkerError::Input("DLQ entry missing payload".to_string()))?;

        let envelope: DlqEnvelope = serde_json::from_str(&payload)
            .map_err(|e| WorkerError::Input(format!("malformed DLQ payload: {e}")))?;

        self.enqueue(&envelope.job).await?;

        let _: i64 = conn
            .xdel(&dlq, &[dlq_entry_id])
            .await
            .map_err(|e| WorkerError::Network(format!("xdel failed: {e}")))?;

        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<u64, WorkerError> {
        let mut conn = self.conn().await?;
        let len: u64 = conn
            .xlen(&self.queue_name)
            .await
            .map_err(|e| WorkerError::Network(format!("xlen failed: {e}")))?;
        Ok(len)
    }

    pub fn retention_completed() -> Duration {
        RETAIN_COMPLETED
    }

    pub fn retention_failed() -> Duration {
        RETAIN_FAILED
    }

    /// Trims the main stream down to entries younger than `max_age`, per
    /// spec §4.9's "retain completed 24 h, retain failed 7 d". Streams have
    /// no native per-entry TTL, so this approximates retention the way
    /// `XTRIM MINID ~` is meant to be used: called after a job reaches a
    /// terminal state, bounding the stream to the relevant window.
    pub async fn trim_retained(&self, max_age: Duration) -> Result<(), WorkerError> {
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let min_id = now_ms.saturating_sub(max_age.as_millis() as u64);

        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("XTRIM")
            .arg(&self.queue_name)
            .arg("MINID")
            .arg("~")
            .arg(min_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| WorkerError::Network(format!("xtrim failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_name_appends_suffix() {
        assert_eq!(QueueAdapter::dlq_name("scans"), "scans-dlq");
    }

    #[test]
    fn backoff_grows_exponentially_from_5s() {
        assert_eq!(QueueAdapter::backoff_for_attempt(1), Duration::from_secs(5));
        assert_eq!(QueueAdapter::backoff_for_attempt(2), Duration::from_secs(10));
        assert_eq!(QueueAdapter::backoff_for_attempt(3), Duration::from_secs(20));
    }

    #[test]
    fn max_attempts_is_three() {
        assert_eq!(QueueAdapter::max_attempts(), 3);
    }
}
