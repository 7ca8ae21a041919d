//! Type-safe builder for `WorkerConfig` using the typestate pattern
//!
//! Generalizes the teacher's two-required-field typestate shape
//! (`storage_dir` then `start_url`) to the worker's two required
//! connection strings: `redis_url` then `database_url`.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use super::types::WorkerConfig;

// Type states for the builder
pub struct WithRedisUrl;
pub struct Incomplete;
pub struct Complete;

pub struct WorkerConfigBuilder<State = Incomplete> {
    pub(crate) redis_url: Option<String>,
    pub(crate) database_url: Option<String>,
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
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for WorkerConfigBuilder<Incomplete> {
    fn default() -> Self {
        let defaults = WorkerConfig::default();
        Self {
            redis_url: None,
            database_url: None,
            worker_concurrency: defaults.worker_concurrency,
            health_port: defaults.health_port,
            app_version: defaults.app_version,
            queue_name: defaults.queue_name,
            screenshot_root: defaults.screenshot_root,
            rule_translation_path: defaults.rule_translation_path,
            user_agent: defaults.user_agent,
            navigation_timeout: defaults.navigation_timeout,
            robots_fetch_timeout: defaults.robots_fetch_timeout,
            default_crawl_delay: defaults.default_crawl_delay,
            max_pages_default: defaults.max_pages_default,
            headless: defaults.headless,
            _phantom: PhantomData,
        }
    }
}

impl WorkerConfigBuilder<Incomplete> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redis_url(self, url: impl Into<String>) -> WorkerConfigBuilder<WithRedisUrl> {
        WorkerConfigBuilder {
            redis_url: Some(url.into()),
            database_url: self.database_url,
            worker_concurrency: self.worker_concurrency,
            health_port: self.health_port,
            app_version: self.app_version,
            queue_name: self.queue_name,
            screenshot_root: self.screenshot_root,
            rule_translation_path: self.rule_translation_path,
            user_agent: self.user_agent,
            navigation_timeout: self.navigation_timeout,
            robots_fetch_timeout: self.robots_fetch_timeout,
            default_crawl_delay: self.default_crawl_delay,
            max_pages_default: self.max_pages_default,
            headless: self.headless,
            _phantom: PhantomData,
        }
    }
}

impl WorkerConfigBuilder<WithRedisUrl> {
    pub fn database_url(self, url: impl Into<String>) -> WorkerConfigBuilder<Complete> {
        WorkerConfigBuilder {
            redis_url: self.redis_url,
            database_url: Some(url.into()),
            worker_concurrency: self.worker_concurrency,
            health_port: self.health_port,
            app_version: self.app_version,
            queue_name: self.queue_name,
            screenshot_root: self.screenshot_root,
            rule_translation_path: self.rule_translation_path,
            user_agent: self.user_agent,
            navigation_timeout: self.navigation_timeout,
            robots_fetch_timeout: self.robots_fetch_timeout,
            default_crawl_delay: self.default_crawl_delay,
            max_pages_default: self.max_pages_default,
            headless: self.headless,
            _phantom: PhantomData,
        }
    }
}

impl WorkerConfigBuilder<Complete> {
    pub fn build(self) -> anyhow::Result<WorkerConfig> {
        Ok(WorkerConfig {
            redis_url: self.redis_url.ok_or_else(|| anyhow::anyhow!("redis_url is required"))?,
            database_url: self.database_url.ok_or_else(|| anyhow::anyhow!("database_url is required"))?,
            worker_concurrency: self.worker_concurrency,
            health_port: self.health_port,
            app_version: self.app_version,
            queue_name: self.queue_name,
            screenshot_root: self.screenshot_root,
            rule_translation_path: self.rule_translation_path,
            user_agent: self.user_agent,
            navigation_timeout: self.navigation_timeout,
            robots_fetch_timeout: self.robots_fetch_timeout,
            default_crawl_delay: self.default_crawl_delay,
            max_pages_default: self.max_pages_default,
            headless: self.headless,
        })
    }
}

// Methods available at any builder state.
impl<State> WorkerConfigBuilder<State> {
    #[must_use]
    pub fn worker_concurrency(mut self, n: usize) -> Self {
        self.worker_concurrency = n;
        self
    }

    #[must_use]
    pub fn health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    pub fn screenshot_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_root = dir.into();
        self
    }

    pub fn rule_translation_path(mut self, path: Option<impl Into<PathBuf>>) -> Self {
        self.rule_translation_path = path.map(Into::into);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    #[must_use]
    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn robots_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.robots_fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn default_crawl_delay(mut self, delay: Duration) -> Self {
        self.default_crawl_delay = delay;
        self
    }

    #[must_use]
    pub fn max_pages_default(mut self, max_pages: usize) -> Self {
        self.max_pages_default = max_pages;
        self
    }

    /// Headless is enforced in release builds, matching the teacher's
    /// production-safety override for browser visibility.
    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        #[cfg(not(debug_assertions))]
        let headless = {
            if !headless {
                tracing::warn!("forcing headless mode in release build");
            }
            true
        };
        self.headless = headless;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_redis_then_database_url() {
        let config = WorkerConfigBuilder::new()
            .redis_url("redis://localhost:6379")
            .database_url("sqlite://test.db")
            .build()
            .unwrap();
        assert_eq!(config.redis_url(), "redis://localhost:6379");
        assert_eq!(config.database_url(), "sqlite://test.db");
    }

    #[test]
    fn builder_carries_defaults_for_unset_fields() {
        let config = WorkerConfigBuilder::new()
            .redis_url("redis://localhost:6379")
            .database_url("sqlite://test.db")
            .build()
            .unwrap();
        assert_eq!(config.worker_concurrency(), 2);
        assert_eq!(config.health_port(), 8080);
    }
}
