//! Scan Orchestrator (spec §4.10): the central per-job state machine —
//! `queued → crawling → scanning → processing → (completed|failed|cancelled)`.
//!
//! Grounded on the teacher's `crawl_engine::orchestrator`/`page_processor`
//! for the per-page pipeline shape (acquire a page, navigate, extract,
//! release, emit progress) and on `crawl_engine::circuit_breaker` for the
//! "transient vs permanent" failure classification idiom, generalized here
//! to drive the Rule Engine Runner and Screenshot Capturer instead of
//! content saving.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::browser_pool::BrowserPool;
use crate::config::WorkerConfig;
use crate::crawler::{self, CrawlerConfig, StopFlag};
use crate::errors::WorkerError;
use crate::findings::{self, TranslationTable};
use crate::persistence::{ImpactCounts, PageRecord, PersistenceGateway, ScanStatus, ScanSummary};
use crate::queue::{DeliveredJob, JobProgress, QueueAdapter};
use crate::robots::RobotsPolicy;
use crate::rule_engine::{self, RunnerConfig};
use crate::screenshots::{self, CaptureOptions};
use crate::url_guard;

/// Findings beyond this many per page do not get a screenshot captured,
/// per spec §4.10's "optionally capture screenshots for up to K findings
/// per page".
const MAX_SCREENSHOTS_PER_PAGE: usize = 5;

#[derive(Clone)]
pub struct OrchestratorContext {
    pub pool: Arc<BrowserPool>,
    pub robots: Arc<RobotsPolicy>,
    pub persistence: Arc<PersistenceGateway>,
    pub queue: Arc<QueueAdapter>,
    pub translations: Arc<TranslationTable>,
    pub config: Arc<WorkerConfig>,
    pub user_agent: String,
    pub screenshot_root: std::path::PathBuf,
    pub stop: StopFlag,
}

/// How a job that did not need a retry ended, so the caller can apply the
/// right stream retention window (spec §4.9: 24 h for completed, 7 d for
/// failed/cancelled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Runs one job end-to-end. Never returns an `Err` for scan-domain
/// failures — those are recorded via `markFailed`/DLQ per spec §7; an `Err`
/// here means the job must be retried by the caller without having been
/// acked (a transient infrastructure error reaching the adapter itself).
pub async fn run_job(
    ctx: &OrchestratorContext,
    delivered: &DeliveredJob,
) -> Result<JobOutcome, WorkerError> {
    let job = &delivered.job;
    let scan_id = job.scan_id;

    ctx.persistence
        .insert_queued_scan(scan_id, &job.user_id, &job.url, job.crawl, job.max_pages as i64)
        .await?;

    ctx.persistence.set_status(scan_id, ScanStatus::Crawling, None).await?;

    let start_url = match url_guard::validate_with_dns(&job.url).await {
        Ok(u) => u,
        Err(e) => {
            return permanent_failure(ctx, delivered, scan_id, e.reason_code()).await;
        }
    };

    // `max_pages_default` is the operator-configured ceiling on crawl size;
    // a job may ask for fewer pages but never more.
    let crawler_config = CrawlerConfig {
        max_pages: (job.max_pages as usize).min(ctx.config.max_pages_default()),
        max_depth: if job.crawl { 3 } else { 0 },
        crawl_delay: ctx.config.default_crawl_delay(),
        respect_robots_txt: job.options.respect_robots_txt,
        navigation_timeout: ctx.config.navigation_timeout(),
        ..CrawlerConfig::default()
    };

    let crawl_result = crawler::crawl(
        start_url,
        &crawler_config,
        &ctx.pool,
        &ctx.robots,
        &ctx.user_agent,
        &ctx.stop,
    )
    .await;

    ctx.queue
        .emit_progress(
            scan_id,
            &JobProgress {
                stage: "crawling".to_string(),
                pages_scanned: crawl_result.pages.len() as u32,
                total_pages: job.max_pages,
                current_url: None,
                issues_found: 0,
            },
        )
        .await
        .ok();

    if crawl_result.pages.is_empty() {
        return permanent_failure(ctx, delivered, scan_id, "no-pages").await;
    }

    if ctx.stop.is_stopped() {
        ctx.persistence.mark_cancelled(scan_id).await?;
        ctx.queue.ack(&delivered.entry_id).await?;
        return Ok(JobOutcome::Cancelled);
    }

    ctx.persistence.set_status(scan_id, ScanStatus::Scanning, None).await?;

    let mut page_records = Vec::with_capacity(crawl_result.pages.len());
    let mut total_issues_found = 0u32;

    for (index, crawled) in crawl_result.pages.iter().enumerate() {
        if ctx.stop.is_stopped() {
            break;
        }

        let page_id = Uuid::new_v4();
        let record = scan_one_page(ctx, scan_id, page_id, crawled, job.options.capture_screenshots)
            .await;

        total_issues_found += record.findings.len() as u32;
        page_records.push(record);

        ctx.queue
            .emit_progress(
                scan_id,
                &JobProgress {
                    stage: "scanning".to_string(),
                    pages_scanned: (index + 1) as u32,
                    total_pages: crawl_result.pages.len() as u32,
                    current_url: Some(crawled.url.clone()),
                    issues_found: total_issues_found,
                },
            )
            .await
            .ok();
    }

    if ctx.stop.is_stopped() {
        ctx.persistence.mark_cancelled(scan_id).await?;
        ctx.queue.ack(&delivered.entry_id).await?;
        return Ok(JobOutcome::Cancelled);
    }

    ctx.persistence.set_status(scan_id, ScanStatus::Processing, None).await?;

    let summary = compute_summary(&page_records);

    if summary.pages_scanned == 0 {
        return permanent_failure(ctx, delivered, scan_id, "no-pages").await;
    }

    match ctx.persistence.commit_scan(scan_id, &page_records, &summary).await {
        Ok(()) => {
            ctx.queue.ack(&delivered.entry_id).await?;
            Ok(JobOutcome::Completed)
        }
        Err(e) => {
            warn!("commitScan failed for {scan_id}: {e}");
            Err(e)
        }
    }
}

async fn scan_one_page(
    ctx: &OrchestratorContext,
    scan_id: Uuid,
    page_id: Uuid,
    crawled: &crawler::CrawledPage,
    capture_screenshots: bool,
) -> PageRecord {
    let hardened = match ctx.pool.acquire_page().await {
        Ok(p) => p,
        Err(e) => {
            return errored_page_record(page_id, crawled, format!("failed to acquire page: {e}"));
        }
    };
    let page = hardened.page();

    if let Err(e) = page.goto(&crawled.url).await {
        ctx.pool.release_page(hardened).await;
        return errored_page_record(page_id, crawled, format!("navigation failed: {e}"));
    }

    let scan_result = rule_engine::run(page, &crawled.url, &RunnerConfig::default()).await;

    if let Some(error) = &scan_result.error {
        ctx.pool.release_page(hardened).await;
        return PageRecord {
            id: page_id,
            url: crawled.url.clone(),
            title: scan_result.title,
            depth: crawled.depth as i64,
            score: 0.0,
            passed_rules: 0,
            failed_rules: 0,
            incomplete_rules: 0,
            load_time_ms: Some(crawled.load_time_ms as i64),
            scan_time_ms: Some(scan_result.scan_time_ms as i64),
            error: Some(error.clone()),
            findings: Vec::new(),
        };
    }

    let mut findings = findings::normalize_violations(page_id, &scan_result.findings, &ctx.translations);

    if capture_screenshots {
        let opts = CaptureOptions { padding_px: 8.0, quality: Some(85) };
        for (index, finding) in findings.iter_mut().enumerate().take(MAX_SCREENSHOTS_PER_PAGE) {
            let Some(selector) = finding.element_selector.clone() else { continue };
            let result = screenshots::capture_element(
                page,
                &selector,
                &ctx.screenshot_root,
                &scan_id.to_string(),
                &finding.rule_id,
                index,
                &opts,
            )
            .await;
            if let Some(path) = result.path {
                finding.screenshot_path = Some(path.to_string_lossy().to_string());
            }
        }
    }

    ctx.pool.release_page(hardened).await;

    PageRecord {
        id: page_id,
        url: crawled.url.clone(),
        title: scan_result.title,
        depth: crawled.depth as i64,
        score: scan_result.score,
        passed_rules: scan_result.passed_rules as i64,
        failed_rules: scan_result.failed_rules as i64,
        incomplete_rules: scan_result.incomplete_rules as i64,
        load_time_ms: Some(crawled.load_time_ms as i64),
        scan_time_ms: Some(scan_result.scan_time_ms as i64),
        error: None,
        findings: findings.into_iter().map(Into::into).collect(),
    }
}

fn errored_page_record(page_id: Uuid, crawled: &crawler::CrawledPage, error: String) -> PageRecord {
    PageRecord {
        id: page_id,
        url: crawled.url.clone(),
        title: crawled.title.clone(),
        depth: crawled.depth as i64,
        score: 0.0,
        passed_rules: 0,
        failed_rules: 0,
        incomplete_rules: 0,
        load_time_ms: Some(crawled.load_time_ms as i64),
        scan_time_ms: None,
        error: Some(error),
        findings: Vec::new(),
    }
}

/// Scan-level score (spec's Decided Open Question #1): arithmetic mean of
/// successful pages' scores, rounded to one decimal; pages with `error` are
/// excluded from both numerator and denominator. Zero successful pages →
/// score 0 (caller treats that as a `ValidationExhausted` failure).
fn compute_summary(pages: &[PageRecord]) -> ScanSummary {
    let successful: Vec<&PageRecord> = pages.iter().filter(|p| p.error.is_none()).collect();

    let score = if successful.is_empty() {
        0.0
    } else {
        let sum: f64 = successful.iter().map(|p| p.score).sum();
        (sum / successful.len() as f64 * 10.0).round() / 10.0
    };

    let mut counts = ImpactCounts::default();
    for page in &successful {
        for finding in &page.findings {
            match finding.impact.as_str() {
                "critical" => counts.critical += 1,
                "serious" => counts.serious += 1,
                "minor" => counts.minor += 1,
                _ => counts.moderate += 1,
            }
        }
    }

    ScanSummary { score, pages_scanned: successful.len() as i64, issues: counts }
}

async fn permanent_failure(
    ctx: &OrchestratorContext,
    delivered: &DeliveredJob,
    scan_id: Uuid,
    reason: &str,
) -> Result<JobOutcome, WorkerError> {
    ctx.persistence.mark_failed(scan_id, reason).await?;
    ctx.queue.ack(&delivered.entry_id).await?;
    Ok(JobOutcome::Failed)
}

/// Drives the worker loop for one configured worker: pulls jobs off the
/// queue at concurrency 1 (spec §5: "each worker single-scan at a time"),
/// running the orchestrator sequentially and classifying failures per
/// spec §7/§4.10's retry table.
pub async fn worker_loop(ctx: OrchestratorContext, worker_id: usize) {
    info!("worker {worker_id} starting");
    loop {
        if ctx.stop.is_stopped() {
            break;
        }

        let delivered = match ctx.queue.next_job(Duration::from_secs(5)).await {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(e) => {
                warn!("worker {worker_id} failed to read from queue: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let scan_id = delivered.job.scan_id;
        match run_job(&ctx, &delivered).await {
            Ok(JobOutcome::Completed) => {
                ctx.queue.trim_retained(QueueAdapter::retention_completed()).await.ok();
            }
            Ok(JobOutcome::Failed | JobOutcome::Cancelled) => {
                ctx.queue.trim_retained(QueueAdapter::retention_failed()).await.ok();
            }
            Err(e) if delivered.attempts >= QueueAdapter::max_attempts() => {
                warn!("scan {scan_id} exhausted retries: {e}");
                ctx.queue.route_to_dlq(&delivered, &e.to_string()).await.ok();
                ctx.persistence.mark_failed(scan_id, e.reason_code()).await.ok();
                ctx.queue.trim_retained(QueueAdapter::retention_failed()).await.ok();
            }
            Err(e) => {
                let backoff = QueueAdapter::backoff_for_attempt(delivered.attempts);
                warn!("scan {scan_id} failed transiently (attempt {}), backing off {backoff:?}: {e}", delivered.attempts);
                tokio::time::sleep(backoff).await;
            }
        }
    }
    info!("worker {worker_id} shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::FindingRow;

    fn page_with_score(score: f64, error: Option<&str>) -> PageRecord {
        PageRecord {
            id: Uuid::new_v4(),
            url: "https://example.com".into(),
            title: String::new(),
            depth: 0,
            score,
            passed_rules: 0,
            failed_rules: 0,
            incomplete_rules: 0,
            load_time_ms: None,
            scan_time_ms: None,
            error: error.map(String::from),
            findings: Vec::new(),
        }
    }

    #[test]
    fn summary_excludes_errored_pages_from_score_average() {
        let pages = vec![page_with_score(100.0, None), page_with_score(0.0, Some("boom"))];
        let summary = compute_summary(&pages);
        assert_eq!(summary.score, 100.0);
        assert_eq!(summary.pages_scanned, 1);
    }

    #[test]
    fn summary_is_zero_with_no_successful_pages() {
        let pages = vec![page_with_score(0.0, Some("boom"))];
        let summary = compute_summary(&pages);
        assert_eq!(summary.score, 0.0);
        assert_eq!(summary.pages_scanned, 0);
    }

    #[test]
    fn summary_counts_issues_by_impact() {
        let mut page = page_with_score(50.0, None);
        page.findings.push(FindingRow {
            id: Uuid::new_v4(),
            page_id: page.id,
            rule_id: "x".into(),
            impact: "critical".into(),
            wcag_criteria: vec![],
            wcag_level: "A".into(),
            regulatory_reference: None,
            title_localized: String::new(),
            description_localized: String::new(),
            fix_localized: String::new(),
            element_selector: None,
            element_html: None,
            help_url: None,
            screenshot_path: None,
        });
        let summary = compute_summary(&[page]);
        assert_eq!(summary.issues.critical, 1);
        assert_eq!(summary.issues.total(), 1);
    }
}
