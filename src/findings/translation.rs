//! Rule translation table: two-tier lookup (configured primary file +
//! embedded fallback) behind a single `translate(ruleId)` call, per spec
//! §9's design note ("Dynamic translation lookup with fallback") and §4.5.
//!
//! Grounded on the teacher's `config` module's own "load from disk with a
//! built-in fallback" shape is absent there, so this is a fresh module; the
//! embedded-asset technique (`include_str!` + `serde_json`) is the
//! idiomatic choice already in the teacher's dependency set (`serde_json`
//! is a direct dependency) rather than pulling in a new asset-bundling
//! crate.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::RawViolation;

/// One row of the rule translation table (spec §3's `RuleTranslation`
/// entity and §6's logical table).
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationEntry {
    #[serde(default)]
    pub wcag_criteria: Vec<String>,
    #[serde(default)]
    pub wcag_level: Option<String>,
    #[serde(default)]
    pub regulatory_reference: Option<String>,
    pub title_localized: String,
    pub description_localized: String,
    pub fix_localized: String,
}

#[derive(Debug, Deserialize)]
struct TranslationFile {
    rules: HashMap<String, TranslationEntry>,
}

/// A fully populated translation, post-fallback. Never partially filled —
/// spec §9 requires `translate(ruleId)` to "return a fully populated record
/// or a synthesized one; never null".
#[derive(Debug, Clone)]
pub struct TranslatedRule {
    pub regulatory_ref: Option<String>,
    pub title: String,
    pub description: String,
    pub fix: String,
}

const EMBEDDED_FALLBACK_JSON: &str = include_str!("fallback_translations.json");

pub struct TranslationTable {
    primary: HashMap<String, TranslationEntry>,
    fallback: HashMap<String, TranslationEntry>,
}

impl TranslationTable {
    /// Load the primary table from `path` (spec §9's "configured absolute
    /// location"); on any read/parse failure, fall back to an empty primary
    /// table and rely entirely on the embedded fallback + raw-help
    /// synthesis.
    pub fn load(path: Option<&Path>) -> Self {
        let primary = path
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|contents| match serde_json::from_str::<TranslationFile>(&contents) {
                Ok(file) => Some(file.rules),
                Err(e) => {
                    warn!("failed to parse rule translation table: {e}");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            primary,
            fallback: Self::embedded_fallback_rules(),
        }
    }

    /// A table with no primary, used by tests and as a last resort.
    pub fn builtin_fallback() -> Self {
        Self {
            primary: HashMap::new(),
            fallback: Self::embedded_fallback_rules(),
        }
    }

    fn embedded_fallback_rules() -> HashMap<String, TranslationEntry> {
        serde_json::from_str::<TranslationFile>(EMBEDDED_FALLBACK_JSON)
            .map(|f| f.rules)
            .unwrap_or_default()
    }

    /// `translate(ruleId)`: primary table, then embedded fallback, then
    /// synthesized from the raw violation's own `help`/`description`.
    pub fn translate(&self, rule_id: &str, raw: &RawViolation) -> TranslatedRule {
        if let Some(entry) = self.primary.get(rule_id) {
            return Self::from_entry(entry);
        }
        if let Some(entry) = self.fallback.get(rule_id) {
            return Self::from_entry(entry);
        }

        TranslatedRule {
            regulatory_ref: None,
            title: raw.help.clone(),
            description: if raw.description.is_empty() {
                raw.help.clone()
            } else {
                raw.description.clone()
            },
            fix: format!("Review and fix: {}", raw.help),
        }
    }

    fn from_entry(entry: &TranslationEntry) -> TranslatedRule {
        TranslatedRule {
            regulatory_ref: entry.regulatory_reference.clone(),
            title: entry.title_localized.clone(),
            description: entry.description_localized.clone(),
            fix: entry.fix_localized.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_violation(rule_id: &str) -> RawViolation {
        RawViolation {
            rule_id: rule_id.to_string(),
            tags: vec![],
            impact: None,
            help: "Some help text".to_string(),
            description: String::new(),
            help_url: String::new(),
            nodes: vec![],
        }
    }

    #[test]
    fn synthesizes_when_rule_unknown() {
        let table = TranslationTable::builtin_fallback();
        let translated = table.translate("totally-unknown-rule", &sample_violation("totally-unknown-rule"));
        assert_eq!(translated.title, "Some help text");
        assert!(translated.fix.contains("Some help text"));
    }

    #[test]
    fn embedded_fallback_covers_common_rules() {
        let table = TranslationTable::builtin_fallback();
        let translated = table.translate("color-contrast", &sample_violation("color-contrast"));
        assert_ne!(translated.title, "Some help text");
    }
}
