//! `WorkerConfig`: process-wide configuration for the worker, loaded from
//! environment variables per spec §6, with scan-tunable defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Fully resolved, immutable worker configuration: spec §6's environment
/// contract plus the scan-tunable defaults referenced across §4.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub(crate) redis_url: String,
    pub(crate) database_url: String,
    pub(crate) worker_concurrency: usize,
    pub(crate) health_port: u16,
    pub(crate) app_version: String,
    pub(crate) queue_name: String,
    pub(crate) screenshot_root: PathBuf,
    pub(crate) rule_translation_path: Option<PathBuf>,
    pub(crate) user_agent: String,
    pub(crate) navigation_timeout: Duration,
    pub(crate) robots_fetch_timeout: Duration,
    pub(crate) default_crawl_delay: Duration,
    pub(crate) max_pages_default: usize,
    pub(crate) headless: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            database_url: "sqlite://scanworker.sqlite?mode=rwc".to_string(),
            worker_concurrency: 2,
            health_port: 8080,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            queue_name: "scanworker:scans".to_string(),
            screenshot_root: std::env::temp_dir().join("scanworker_screenshots"),
            rule_translation_path: None,
            user_agent: crate::browser_setup::CHROME_USER_AGENT.to_string(),
            navigation_timeout: Duration::from_secs(30),
            robots_fetch_timeout: Duration::from_secs(10),
            default_crawl_delay: Duration::from_millis(500),
            max_pages_default: 10,
            headless: true,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn builder() -> super::builder::WorkerConfigBuilder<super::builder::Incomplete> {
        super::builder::WorkerConfigBuilder::new()
    }

    /// Builds a `WorkerConfig` straight from the environment, per spec §6
    /// and §13: `REDIS_URL`, `DATABASE_URL`, `WORKER_CONCURRENCY`,
    /// `HEALTH_PORT`, `APP_VERSION`, `RULE_TRANSLATION_PATH`,
    /// `SCREENSHOT_ROOT`, `MAX_PAGES_DEFAULT`, `CRAWL_DELAY_MS_DEFAULT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let redis_url = std::env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let worker_concurrency = std::env::var("WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.worker_concurrency);
        let health_port = std::env::var("HEALTH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.health_port);
        let app_version = std::env::var("APP_VERSION").unwrap_or(defaults.app_version);
        let rule_translation_path =
            std::env::var("RULE_TRANSLATION_PATH").ok().map(PathBuf::from).or(defaults.rule_translation_path);
        let screenshot_root =
            std::env::var("SCREENSHOT_ROOT").map(PathBuf::from).unwrap_or(defaults.screenshot_root);
        let max_pages_default = std::env::var("MAX_PAGES_DEFAULT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_pages_default);
        let default_crawl_delay = std::env::var("CRAWL_DELAY_MS_DEFAULT")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.default_crawl_delay);

        Ok(Self {
            redis_url,
            database_url,
            worker_concurrency,
            health_port,
            app_version,
            rule_translation_path,
            screenshot_root,
            max_pages_default,
            default_crawl_delay,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn redis_url(&self) -> &str {
        &self.redis_url
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    #[must_use]
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
    }

    #[must_use]
    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    #[must_use]
    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    #[must_use]
    pub fn screenshot_root(&self) -> &PathBuf {
        &self.screenshot_root
    }

    #[must_use]
    pub fn rule_translation_path(&self) -> Option<&PathBuf> {
        self.rule_translation_path.as_ref()
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    #[must_use]
    pub fn robots_fetch_timeout(&self) -> Duration {
        self.robots_fetch_timeout
    }

    #[must_use]
    pub fn default_crawl_delay(&self) -> Duration {
        self.default_crawl_delay
    }

    #[must_use]
    pub fn max_pages_default(&self) -> usize {
        self.max_pages_default
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.worker_concurrency, 2);
        assert_eq!(config.health_port, 8080);
        assert!(config.headless);
    }
}
