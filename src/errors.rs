//! Typed error taxonomy for the scan worker.
//!
//! Spec §7 requires surfaced errors to be typed categories, not strings, so
//! that the orchestrator can decide retry classification without matching on
//! error text. Grounded on `other_examples`' `accessibility-scanner` crate's
//! `ScannerError` (a `thiserror` enum with `#[from]` conversions), generalized
//! to the six categories this spec names, and on the teacher's
//! `FailureKind`/`calculate_retry_backoff` split in
//! `crawl_engine/orchestrator.rs` for the transient/permanent distinction.

use thiserror::Error;

/// The six error categories named in spec §7, each carrying enough context
/// to decide retry classification without string matching.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Invalid or disallowed URL, invalid scanId format. Permanent.
    #[error("input error: {0}")]
    Input(String),

    /// DNS, TCP, HTTP >= 400 on the seed URL. Transient.
    #[error("network error: {0}")]
    Network(String),

    /// Browser launch, disconnect, or navigation timeout. Transient within
    /// the job (one re-acquire attempted before escalating).
    #[error("browser error: {0}")]
    Browser(String),

    /// Rule engine injection/evaluation failure on a single page. Never
    /// escalated to the job level; recorded on that page's `error` field.
    #[error("rule engine error: {0}")]
    RuleEngine(String),

    /// Transaction failure in the persistence gateway. Transient.
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Zero pages crawled. Permanent, reason `no-pages`.
    #[error("validation exhausted: no pages crawled")]
    ValidationExhausted,
}

impl WorkerError {
    /// Whether the queue adapter should retry the job after this error, per
    /// spec §4.10's retry classification table.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WorkerError::Network(_) | WorkerError::Browser(_) | WorkerError::Persistence(_)
        )
    }

    /// The short, typed reason stored in `scans.error_message`. Never a raw
    /// exception string — spec §7 forbids leaking those into persisted
    /// fields.
    pub fn reason_code(&self) -> &'static str {
        match self {
            WorkerError::Input(_) => "InputError",
            WorkerError::Network(_) => "NetworkError",
            WorkerError::Browser(_) => "BrowserError",
            WorkerError::RuleEngine(_) => "RuleEngineError",
            WorkerError::Persistence(_) => "PersistenceError",
            WorkerError::ValidationExhausted => "no-pages",
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkerError>;
