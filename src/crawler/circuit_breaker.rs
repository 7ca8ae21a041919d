//! Per-domain circuit breaker for the crawler's page-fetch loop.
//!
//! Spec §4.7 doesn't name this mechanism explicitly, but §9's retry
//! classification and the teacher's own crawler both assume per-domain
//! failure isolation on top of the job-level retry/DLQ discipline (see
//! SPEC_FULL.md's supplemental features). Carried directly from
//! `crawl_engine/circuit_breaker.rs`, with `log` calls rewritten to
//! `tracing`.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

#[derive(Debug, Clone)]
struct DomainHealth {
    consecutive_failures: u32,
    last_opened: Option<Instant>,
    consecutive_successes_in_halfopen: u32,
    state: CircuitState,
}

impl DomainHealth {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_opened: None,
            consecutive_successes_in_halfopen: 0,
            state: CircuitState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    domains: DashMap<String, DomainHealth>,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, success_threshold: u32, half_open_timeout: Duration) -> Self {
        Self { domains: DashMap::new(), failure_threshold, success_threshold, half_open_timeout }
    }

    pub fn should_attempt(&self, host: &str) -> bool {
        let mut health = self.domains.entry(host.to_string()).or_insert_with(DomainHealth::new);

        match health.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if let Some(opened) = health.last_opened {
                    if opened.elapsed() >= self.half_open_timeout {
                        health.state = CircuitState::HalfOpen;
                        health.consecutive_successes_in_halfopen = 0;
                        info!("circuit breaker transitioning to half-open for {host}");
                        return true;
                    }
                }
                false
            }
            CircuitState::HalfOpen => true,
        }
    }

    pub fn record_success(&self, host: &str) {
        if let Some(mut health) = self.domains.get_mut(host) {
            health.consecutive_failures = 0;

            if health.state == CircuitState::HalfOpen {
                health.consecutive_successes_in_halfopen += 1;
                if health.consecutive_successes_in_halfopen >= self.success_threshold {
                    health.state = CircuitState::Closed;
                    info!("circuit breaker closed for {host}");
                } else {
                    debug!(
                        "circuit breaker half-open success for {host} ({}/{})",
                        health.consecutive_successes_in_halfopen, self.success_threshold
                    );
                }
            }
        }
    }

    pub fn record_failure(&self, host: &str, error: &str) {
        let mut health = self.domains.entry(host.to_string()).or_insert_with(DomainHealth::new);
        health.consecutive_failures += 1;

        if health.consecutive_failures >= self.failure_threshold && health.state != CircuitState::Open {
            health.state = CircuitState::Open;
            health.last_opened = Some(Instant::now());
            health.consecutive_successes_in_halfopen = 0;
            warn!("circuit breaker open for {host} after {} consecutive failures: {error}", health.consecutive_failures);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new(3, 1, Duration::from_secs(60));
        assert!(cb.should_attempt("example.com"));
        cb.record_failure("example.com", "timeout");
        cb.record_failure("example.com", "timeout");
        cb.record_failure("example.com", "timeout");
        assert!(!cb.should_attempt("example.com"));
    }

    #[test]
    fn half_opens_after_timeout() {
        let cb = CircuitBreaker::new(1, 1, Duration::from_millis(50));
        cb.record_failure("example.com", "timeout");
        assert!(!cb.should_attempt("example.com"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(cb.should_attempt("example.com"));
    }
}
