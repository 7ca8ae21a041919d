//! Finding Normalizer/Translator (spec §4.5): converts the rule engine's raw
//! violation structure into normalized `Finding`s, attaching severity, WCAG
//! criterion/level, regulatory references, and localized text via a
//! rule-translation table.
//!
//! The `Finding`/`Impact`/`WcagLevel` shape is grounded on `other_examples`'
//! `accessibility-scanner` crate's `Issue`/`Severity`/`WCAGLevel` (same
//! domain, richer data model per spec §3's `Finding` entity — this adds
//! `wcagCriteria` as an ordered sequence, `regulatoryRef`, and three
//! separately localized text fields where the example file had one message).

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod translation;
pub use translation::TranslationTable;

/// `impact ∈ {critical, serious, moderate, minor}` (spec §3). Unlike the
/// example file's `Severity`, this has no `Info` variant — spec's Finding
/// impact set is exactly these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Minor,
    Moderate,
    Serious,
    Critical,
}

impl Impact {
    /// Weight used by the score formula in spec §4.4.
    pub fn weight(self) -> f64 {
        match self {
            Impact::Critical => 3.0,
            Impact::Serious => 2.0,
            Impact::Moderate => 1.0,
            Impact::Minor => 0.5,
        }
    }

    pub fn parse(raw: &str) -> Impact {
        match raw.to_ascii_lowercase().as_str() {
            "critical" => Impact::Critical,
            "serious" => Impact::Serious,
            "minor" => Impact::Minor,
            _ => Impact::Moderate, // spec §4.5: default `moderate` if missing
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Impact::Critical => "critical",
            Impact::Serious => "serious",
            Impact::Moderate => "moderate",
            Impact::Minor => "minor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WcagLevel {
    A,
    AA,
    AAA,
}

impl WcagLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            WcagLevel::A => "A",
            WcagLevel::AA => "AA",
            WcagLevel::AAA => "AAA",
        }
    }
}

/// Raw shape returned by the rule engine for one violated rule, before
/// per-node expansion. Field names follow spec §4.5's parenthetical list
/// (`ruleId, tags, help, description, helpUrl, nodes`).
#[derive(Debug, Clone, Deserialize)]
pub struct RawViolation {
    #[serde(rename = "ruleId")]
    pub rule_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub impact: Option<String>,
    pub help: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "helpUrl", default)]
    pub help_url: String,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    /// CSS-selector-like path segments; spec §4.5 says to join with `" > "`.
    #[serde(default)]
    pub target: Vec<String>,
    #[serde(default)]
    pub html: String,
}

/// A single normalized accessibility finding (spec §3's `Finding` entity).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: uuid::Uuid,
    pub page_id: uuid::Uuid,
    pub rule_id: String,
    pub impact: Impact,
    pub wcag_criteria: Vec<String>,
    pub wcag_level: WcagLevel,
    pub regulatory_ref: Option<String>,
    pub title_localized: String,
    pub description_localized: String,
    pub fix_suggestion_localized: String,
    pub element_selector: Option<String>,
    pub element_html: Option<String>,
    pub help_url: Option<String>,
    pub screenshot_path: Option<String>,
}

static WCAG_TAG_RE: once_cell::sync::Lazy<Regex> =
    once_cell::sync::Lazy::new(|| Regex::new(r"^wcag(\d)(\d)(\d)?$").unwrap());

/// WCAG criteria extraction: map each tag matching `wcag<d><d>(<d>)?` into
/// `d.d` or `d.d.d`, preserving order of first appearance.
pub fn extract_wcag_criteria(tags: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut criteria = Vec::new();
    for tag in tags {
        let lower = tag.to_ascii_lowercase();
        if let Some(caps) = WCAG_TAG_RE.captures(&lower) {
            let major = &caps[1];
            let minor = &caps[2];
            let criterion = match caps.get(3) {
                Some(third) => format!("{major}.{minor}.{}", third.as_str()),
                None => format!("{major}.{minor}"),
            };
            if seen.insert(criterion.clone()) {
                criteria.push(criterion);
            }
        }
    }
    criteria
}

/// WCAG level: AAA if any `wcag*aaa` tag; else AA if any `wcag*aa`; else A.
pub fn extract_wcag_level(tags: &[String]) -> WcagLevel {
    let lower: Vec<String> = tags.iter().map(|t| t.to_ascii_lowercase()).collect();
    if lower.iter().any(|t| t.ends_with("aaa")) {
        WcagLevel::AAA
    } else if lower.iter().any(|t| t.ends_with("aa")) {
        WcagLevel::AA
    } else {
        WcagLevel::A
    }
}

/// Convert the rule engine's raw violations into normalized `Finding`s for
/// one page, one Finding per violated node, looking up localized text and
/// regulatory references in `table`.
pub fn normalize_violations(
    page_id: uuid::Uuid,
    violations: &[RawViolation],
    table: &TranslationTable,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    for violation in violations {
        let translation = table.translate(&violation.rule_id, violation);
        let impact = violation
            .impact
            .as_deref()
            .map(Impact::parse)
            .unwrap_or(Impact::Moderate);
        let wcag_criteria = extract_wcag_criteria(&violation.tags);
        let wcag_level = extract_wcag_level(&violation.tags);

        if violation.nodes.is_empty() {
            findings.push(build_finding(
                page_id,
                violation,
                &translation,
                impact,
                &wcag_criteria,
                wcag_level,
                None,
            ));
            continue;
        }

        for node in &violation.nodes {
            let selector = node.target.join(" > ");
            findings.push(build_finding(
                page_id,
                violation,
                &translation,
                impact,
                &wcag_criteria,
                wcag_level,
                Some(node),
            ));
            let _ = selector; // selector is embedded in build_finding via node
        }
    }

    findings
}

fn build_finding(
    page_id: uuid::Uuid,
    violation: &RawViolation,
    translation: &translation::TranslatedRule,
    impact: Impact,
    wcag_criteria: &[String],
    wcag_level: WcagLevel,
    node: Option<&RawNode>,
) -> Finding {
    Finding {
        id: uuid::Uuid::new_v4(),
        page_id,
        rule_id: violation.rule_id.clone(),
        impact,
        wcag_criteria: wcag_criteria.to_vec(),
        wcag_level,
        regulatory_ref: translation.regulatory_ref.clone(),
        title_localized: translation.title.clone(),
        description_localized: translation.description.clone(),
        fix_suggestion_localized: translation.fix.clone(),
        element_selector: node.map(|n| n.target.join(" > ")),
        element_html: node.map(|n| n.html.clone()),
        help_url: if violation.help_url.is_empty() {
            None
        } else {
            Some(violation.help_url.clone())
        },
        screenshot_path: None,
    }
}

/// A rough JSON shape mirroring spec §6's logical `issues` table row — used
/// by the persistence gateway to decide column mapping; kept here so both
/// sides agree on field names without an import cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingRow {
    pub id: uuid::Uuid,
    pub page_id: uuid::Uuid,
    pub rule_id: String,
    pub impact: String,
    pub wcag_criteria: Vec<String>,
    pub wcag_level: String,
    pub regulatory_reference: Option<String>,
    pub title_localized: String,
    pub description_localized: String,
    pub fix_localized: String,
    pub element_selector: Option<String>,
    pub element_html: Option<String>,
    pub help_url: Option<String>,
    pub screenshot_path: Option<String>,
}

impl From<Finding> for FindingRow {
    fn from(f: Finding) -> Self {
        FindingRow {
            id: f.id,
            page_id: f.page_id,
            rule_id: f.rule_id,
            impact: f.impact.as_str().to_string(),
            wcag_criteria: f.wcag_criteria,
            wcag_level: f.wcag_level.as_str().to_string(),
            regulatory_reference: f.regulatory_ref,
            title_localized: f.title_localized,
            description_localized: f.description_localized,
            fix_localized: f.fix_suggestion_localized,
            element_selector: f.element_selector,
            element_html: f.element_html,
            help_url: f.help_url,
            screenshot_path: f.screenshot_path,
        }
    }
}

/// Roll up findings into the `issuesByImpact` counts spec §3 requires.
pub fn count_by_impact(findings: &[Finding]) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for impact in [Impact::Critical, Impact::Serious, Impact::Moderate, Impact::Minor] {
        counts.insert(impact.as_str(), 0);
    }
    for finding in findings {
        *counts.entry(finding.impact.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_criteria_in_order_of_first_appearance() {
        let tags = vec![
            "wcag2aa".to_string(),
            "wcag111".to_string(),
            "wcag143".to_string(),
            "wcag111".to_string(),
        ];
        let criteria = extract_wcag_criteria(&tags);
        assert_eq!(criteria, vec!["1.1.1", "1.4.3"]);
    }

    #[test]
    fn level_tags_never_yield_a_bogus_criterion() {
        let tags = vec!["wcag21aa".to_string(), "wcag21a".to_string()];
        assert!(extract_wcag_criteria(&tags).is_empty());
    }

    #[test]
    fn level_prefers_strongest_tag() {
        let tags = vec!["wcag2a".to_string(), "wcag2aaa".to_string()];
        assert_eq!(extract_wcag_level(&tags), WcagLevel::AAA);
    }

    #[test]
    fn impact_defaults_to_moderate() {
        assert_eq!(Impact::parse("unknown"), Impact::Moderate);
    }

    #[test]
    fn normalize_emits_one_finding_per_node() {
        let table = TranslationTable::builtin_fallback();
        let violation = RawViolation {
            rule_id: "color-contrast".to_string(),
            tags: vec!["wcag2aa".to_string(), "wcag143".to_string()],
            impact: Some("serious".to_string()),
            help: "Elements must meet contrast ratio".to_string(),
            description: "desc".to_string(),
            help_url: "https://example.com/help".to_string(),
            nodes: vec![
                RawNode { target: vec!["div".into(), "span".into()], html: "<span/>".into() },
                RawNode { target: vec!["p".into()], html: "<p/>".into() },
            ],
        };
        let findings = normalize_violations(uuid::Uuid::new_v4(), &[violation], &table);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].element_selector.as_deref(), Some("div > span"));
        assert_eq!(findings[0].wcag_level, WcagLevel::AA);
    }
}
