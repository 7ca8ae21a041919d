//! Persistence Gateway (spec §4.8): transactional SQLite store for scan
//! lifecycle, pages, and findings.
//!
//! Grounded directly on the teacher's `link_index/mod.rs` — same
//! `SqlitePoolOptions`/WAL/`busy_timeout` connection setup, the same
//! `pool.begin()` / `tx.commit()` single-transaction-commit shape, and the
//! same `ON CONFLICT DO UPDATE` upsert idiom. The idempotence strategy
//! (decided in SPEC_FULL.md §"Decided Open Questions") uses unique
//! constraints + upserts rather than read-before-commit, mirroring
//! `register_page`'s own `ON CONFLICT(url) DO UPDATE`.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::errors::WorkerError;
use crate::findings::FindingRow;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    url TEXT NOT NULL,
    crawl INTEGER NOT NULL,
    max_pages INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    score REAL,
    pages_scanned INTEGER NOT NULL DEFAULT 0,
    issues_count INTEGER NOT NULL DEFAULT 0,
    issues_critical INTEGER NOT NULL DEFAULT 0,
    issues_serious INTEGER NOT NULL DEFAULT 0,
    issues_moderate INTEGER NOT NULL DEFAULT 0,
    issues_minor INTEGER NOT NULL DEFAULT 0,
    progress_stage TEXT,
    progress_current INTEGER NOT NULL DEFAULT 0,
    progress_total INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS pages (
    id TEXT PRIMARY KEY,
    scan_id TEXT NOT NULL REFERENCES scans(id),
    url TEXT NOT NULL,
    title TEXT,
    depth INTEGER NOT NULL DEFAULT 0,
    score REAL,
    issues_count INTEGER NOT NULL DEFAULT 0,
    passed_rules INTEGER NOT NULL DEFAULT 0,
    failed_rules INTEGER NOT NULL DEFAULT 0,
    incomplete_rules INTEGER NOT NULL DEFAULT 0,
    load_time_ms INTEGER,
    scan_time_ms INTEGER,
    error TEXT,
    scanned_at TEXT NOT NULL,
    UNIQUE(scan_id, url)
);

CREATE TABLE IF NOT EXISTS issues (
    id TEXT PRIMARY KEY,
    page_id TEXT NOT NULL REFERENCES pages(id),
    rule_id TEXT NOT NULL,
    impact TEXT NOT NULL,
    wcag_criteria TEXT NOT NULL,
    wcag_level TEXT NOT NULL,
    regulatory_reference TEXT,
    title_localized TEXT NOT NULL,
    description_localized TEXT NOT NULL,
    fix_localized TEXT NOT NULL,
    element_selector TEXT,
    element_html TEXT,
    help_url TEXT,
    screenshot_path TEXT,
    UNIQUE(page_id, rule_id, element_selector)
);

CREATE INDEX IF NOT EXISTS idx_pages_scan ON pages(scan_id);
CREATE INDEX IF NOT EXISTS idx_issues_page ON issues(page_id);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Queued,
    Crawling,
    Scanning,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Crawling => "crawling",
            Self::Scanning => "scanning",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImpactCounts {
    pub critical: usize,
    pub serious: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl ImpactCounts {
    pub fn total(&self) -> usize {
        self.critical + self.serious + self.moderate + self.minor
    }
}

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub depth: i64,
    pub score: f64,
    pub passed_rules: i64,
    pub failed_rules: i64,
    pub incomplete_rules: i64,
    pub load_time_ms: Option<i64>,
    pub scan_time_ms: Option<i64>,
    pub error: Option<String>,
    pub findings: Vec<FindingRow>,
}

#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub score: f64,
    pub pages_scanned: i64,
    pub issues: ImpactCounts,
}

#[derive(Clone)]
pub struct PersistenceGateway {
    pool: SqlitePool,
}

impl PersistenceGateway {
    pub async fn connect(database_url: &str) -> Result<Self, WorkerError> {
        let options: SqliteConnectOptions = database_url
            .parse()
            .map_err(|e| WorkerError::Persistence(sqlx::Error::Configuration(Box::new(e))))?;

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, WorkerError> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn insert_queued_scan(
        &self,
        scan_id: Uuid,
        user_id: &str,
        url: &str,
        crawl: bool,
        max_pages: i64,
    ) -> Result<(), WorkerError> {
        sqlx::query(
            r#"
            INSERT INTO scans (id, user_id, url, crawl, max_pages, status, pages_scanned)
            VALUES (?, ?, ?, ?, ?, 'queued', 0)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(scan_id.to_string())
        .bind(user_id)
        .bind(url)
        .bind(crawl)
        .bind(max_pages)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `setStatus(scanId, status, errorMessage?)`.
    pub async fn set_status(
        &self,
        scan_id: Uuid,
        status: ScanStatus,
        error_message: Option<&str>,
    ) -> Result<(), WorkerError> {
        let now = Utc::now().to_rfc3339();

        let current: Option<(String,)> = sqlx::query_as("SELECT status FROM scans WHERE id = ?")
            .bind(scan_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let started_transition = matches!(current, Some((ref s,)) if s == "queued") && status != ScanStatus::Queued;

        if status.is_terminal() {
            sqlx::query(
                "UPDATE scans SET status = ?, error_message = ?, completed_at = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(error_message)
            .bind(&now)
            .bind(scan_id.to_string())
            .execute(&self.pool)
            .await?;
        } else if started_transition {
            sqlx::query(
                "UPDATE scans SET status = ?, error_message = ?, started_at = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(error_message)
            .bind(&now)
            .bind(scan_id.to_string())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE scans SET status = ?, error_message = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(error_message)
                .bind(scan_id.to_string())
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// `setProgress(scanId, stage, current, total)`. Last-writer-wins: a
    /// plain `UPDATE` with no read-modify-write race, matching the spec's
    /// tolerance for concurrent, out-of-order progress messages.
    pub async fn set_progress(
        &self,
        scan_id: Uuid,
        stage: &str,
        current: i64,
        total: i64,
    ) -> Result<(), WorkerError> {
        sqlx::query(
            "UPDATE scans SET progress_stage = ?, progress_current = ?, progress_total = ? WHERE id = ?",
        )
        .bind(stage)
        .bind(current)
        .bind(total)
        .bind(scan_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `commitScan(scanId, pages, summary)`: single transaction updating the
    /// scan summary row, then upserting every page and its findings.
    /// Idempotent under redelivery via `UNIQUE(scan_id, url)` on pages and
    /// `UNIQUE(page_id, rule_id, element_selector)` on issues.
    pub async fn commit_scan(
        &self,
        scan_id: Uuid,
        pages: &[PageRecord],
        summary: &ScanSummary,
    ) -> Result<(), WorkerError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE scans SET
                status = 'completed',
                completed_at = ?,
                score = ?,
                pages_scanned = ?,
                issues_count = ?,
                issues_critical = ?,
                issues_serious = ?,
                issues_moderate = ?,
                issues_minor = ?,
                progress_stage = 'complete',
                progress_current = progress_total
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(summary.score)
        .bind(summary.pages_scanned)
        .bind(summary.issues.total() as i64)
        .bind(summary.issues.critical as i64)
        .bind(summary.issues.serious as i64)
        .bind(summary.issues.moderate as i64)
        .bind(summary.issues.minor as i64)
        .bind(scan_id.to_string())
        .execute(&mut *tx)
        .await?;

        for page in pages {
            sqlx::query(
                r#"
                INSERT INTO pages (
                    id, scan_id, url, title, depth, score, issues_count,
                    passed_rules, failed_rules, incomplete_rules,
                    load_time_ms, scan_time_ms, error, scanned_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(scan_id, url) DO UPDATE SET
                    title = excluded.title,
                    depth = excluded.depth,
                    score = excluded.score,
                    issues_count = excluded.issues_count,
                    passed_rules = excluded.passed_rules,
                    failed_rules = excluded.failed_rules,
                    incomplete_rules = excluded.incomplete_rules,
                    load_time_ms = excluded.load_time_ms,
                    scan_time_ms = excluded.scan_time_ms,
                    error = excluded.error,
                    scanned_at = excluded.scanned_at
                "#,
            )
            .bind(page.id.to_string())
            .bind(scan_id.to_string())
            .bind(&page.url)
            .bind(&page.title)
            .bind(page.depth)
            .bind(page.score)
            .bind(page.findings.len() as i64)
            .bind(page.passed_rules)
            .bind(page.failed_rules)
            .bind(page.incomplete_rules)
            .bind(page.load_time_ms)
            .bind(page.scan_time_ms)
            .bind(&page.error)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            for finding in &page.findings {
                sqlx::query(
                    r#"
                    INSERT INTO issues (
                        id, page_id, rule_id, impact, wcag_criteria, wcag_level,
                        regulatory_reference, title_localized, description_localized,
                        fix_localized, element_selector, element_html, help_url,
                        screenshot_path
                    )
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(page_id, rule_id, element_selector) DO UPDATE SET
                        impact = excluded.impact,
                        screenshot_path = excluded.screenshot_path
                    "#,
                )
                .bind(finding.id.to_string())
                .bind(page.id.to_string())
                .bind(&finding.rule_id)
                .bind(&finding.impact)
                .bind(finding.wcag_criteria.join(","))
                .bind(&finding.wcag_level)
                .bind(&finding.regulatory_reference)
                .bind(&finding.title_localized)
                .bind(&finding.description_localized)
                .bind(&finding.fix_localized)
                .bind(&finding.element_selector)
                .bind(&finding.element_html)
                .bind(&finding.help_url)
                .bind(&finding.screenshot_path)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// `markFailed(scanId, errorMessage)`: terminal failure, no partial
    /// inserts — a single status update, never touching pages/issues.
    pub async fn mark_failed(&self, scan_id: Uuid, error_message: &str) -> Result<(), WorkerError> {
        self.set_status(scan_id, ScanStatus::Failed, Some(error_message)).await
    }

    pub async fn mark_cancelled(&self, scan_id: Uuid) -> Result<(), WorkerError> {
        self.set_status(scan_id, ScanStatus::Cancelled, None).await
    }

    pub async fn scan_status(&self, scan_id: Uuid) -> Result<Option<String>, WorkerError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM scans WHERE id = ?")
            .bind(scan_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(s,)| s))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub fn database_url_from_path(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::FindingRow;

    fn sample_finding(selector: &str) -> FindingRow {
        FindingRow {
            id: Uuid::new_v4(),
            page_id: Uuid::new_v4(),
            rule_id: "color-contrast".into(),
            impact: "serious".into(),
            wcag_criteria: vec!["1.4.3".into()],
            wcag_level: "AA".into(),
            regulatory_reference: None,
            title_localized: "title".into(),
            description_localized: "desc".into(),
            fix_localized: "fix".into(),
            element_selector: Some(selector.into()),
            element_html: None,
            help_url: None,
            screenshot_path: None,
        }
    }

    #[tokio::test]
    async fn commit_scan_is_idempotent_under_redelivery() {
        let gw = PersistenceGateway::open_in_memory().await.unwrap();
        let scan_id = Uuid::new_v4();
        gw.insert_queued_scan(scan_id, "user-1", "https://example.com", false, 1)
            .await
            .unwrap();

        let page_id = Uuid::new_v4();
        let page = PageRecord {
            id: page_id,
            url: "https://example.com".into(),
            title: "Example".into(),
            depth: 0,
            score: 50.0,
            passed_rules: 1,
            failed_rules: 1,
            incomplete_rules: 0,
            load_time_ms: Some(100),
            scan_time_ms: Some(200),
            error: None,
            findings: vec![sample_finding("body > div")],
        };
        let summary = ScanSummary {
            score: 50.0,
            pages_scanned: 1,
            issues: ImpactCounts { critical: 0, serious: 1, moderate: 0, minor: 0 },
        };

        gw.commit_scan(scan_id, &[page.clone()], &summary).await.unwrap();
        gw.commit_scan(scan_id, &[page], &summary).await.unwrap();

        let pages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE scan_id = ?")
            .bind(scan_id.to_string())
            .fetch_one(gw.pool())
            .await
            .unwrap();
        assert_eq!(pages.0, 1);

        let issues: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM issues WHERE page_id = ?")
            .bind(page_id.to_string())
            .fetch_one(gw.pool())
            .await
            .unwrap();
        assert_eq!(issues.0, 1);
    }

    #[tokio::test]
    async fn mark_failed_leaves_no_page_rows() {
        let gw = PersistenceGateway::open_in_memory().await.unwrap();
        let scan_id = Uuid::new_v4();
        gw.insert_queued_scan(scan_id, "user-1", "http://169.254.169.254", false, 1)
            .await
            .unwrap();

        gw.mark_failed(scan_id, "BlockedHost").await.unwrap();

        let status = gw.scan_status(scan_id).await.unwrap();
        assert_eq!(status.as_deref(), Some("failed"));

        let pages: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages WHERE scan_id = ?")
            .bind(scan_id.to_string())
            .fetch_one(gw.pool())
            .await
            .unwrap();
        assert_eq!(pages.0, 0);
    }
}
