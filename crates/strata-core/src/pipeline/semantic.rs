//! Semantic extraction stage
//!
//! Replaces free text with a small structured summary: the leading action
//! verb, up to five entities, a temporal word, and up to three quantities.
//! Lossy on purpose; reconstruction concatenates the extracted fields and
//! never recovers the original phrasing or punctuation.

use serde::{Deserialize, Serialize};

/// Maximum entities kept in a summary
const MAX_ENTITIES: usize = 5;

/// Maximum quantities kept in a summary
const MAX_QUANTITIES: usize = 3;

/// Structured summary produced by the semantic stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticSummary {
    /// First token matching the verb vocabulary, suffix-stripped form kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Capitalized or article-following tokens, in order of appearance
    #[serde(default)]
    pub entities: Vec<String>,
    /// First matched day name, relative word, or date-like token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_word: Option<String>,
    /// Number + unit pairs, e.g. `3 files`
    #[serde(default)]
    pub quantities: Vec<Quantity>,
}

/// A number + unit pair found in the text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

/// Verb vocabulary, stored suffix-stripped
const ACTION_STEMS: &[&str] = &[
    "add", "creat", "build", "built", "fix", "updat", "delet", "remov", "start", "finish",
    "implement", "refactor", "test", "deploy", "writ", "wrote", "chang", "instal", "debug",
    "merg", "review", "plan", "decid", "discuss", "learn", "mov", "renam", "investigat",
];

/// Relative temporal vocabulary
const TEMPORAL_WORDS: &[&str] = &[
    "today", "yesterday", "tomorrow", "tonight", "now", "later", "soon", "recently", "earlier",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
];

/// Articles whose following token is treated as an entity
const ARTICLES: &[&str] = &["the", "a", "an"];

impl SemanticSummary {
    /// Extract a summary from free text. Total over all inputs.
    pub fn extract(text: &str) -> Self {
        let tokens: Vec<&str> = text.split_whitespace().collect();

        let mut summary = SemanticSummary::default();
        let mut prev_lower = String::new();

        for (i, raw) in tokens.iter().enumerate() {
            let word = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '-');
            if word.is_empty() {
                prev_lower.clear();
                continue;
            }
            let lower = word.to_lowercase();

            if summary.action.is_none() {
                let stem = strip_suffix(&lower);
                if ACTION_STEMS.contains(&stem) {
                    summary.action = Some(lower.clone());
                }
            }

            if summary.temporal_word.is_none()
                && (TEMPORAL_WORDS.contains(&lower.as_str()) || looks_like_date(word))
            {
                summary.temporal_word = Some(lower.clone());
            }

            if summary.entities.len() < MAX_ENTITIES {
                let capitalized =
                    i > 0 && word.chars().next().is_some_and(|c| c.is_uppercase());
                let after_article = ARTICLES.contains(&prev_lower.as_str());
                if (capitalized || after_article)
                    && !TEMPORAL_WORDS.contains(&lower.as_str())
                    && word.chars().any(|c| c.is_alphabetic())
                    && !summary.entities.iter().any(|e| e.eq_ignore_ascii_case(word))
                {
                    summary.entities.push(word.to_string());
                }
            }

            if summary.quantities.len() < MAX_QUANTITIES {
                if let Ok(value) = lower.replace(',', "").parse::<f64>() {
                    if let Some(unit) = tokens.get(i + 1) {
                        let unit = unit.trim_matches(|c: char| !c.is_alphanumeric());
                        if !unit.is_empty() && unit.chars().all(|c| c.is_alphabetic()) {
                            summary.quantities.push(Quantity {
                                value,
                                unit: unit.to_lowercase(),
                            });
                        }
                    }
                }
            }

            prev_lower = lower;
        }

        summary
    }

    /// Concatenate the extracted fields into reconstructed text
    pub fn reconstruct(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(action) = &self.action {
            parts.push(action.clone());
        }
        if !self.entities.is_empty() {
            parts.push(self.entities.join(" "));
        }
        if let Some(temporal) = &self.temporal_word {
            parts.push(temporal.clone());
        }
        for q in &self.quantities {
            if q.value.fract() == 0.0 {
                parts.push(format!("{} {}", q.value as i64, q.unit));
            } else {
                parts.push(format!("{} {}", q.value, q.unit));
            }
        }
        parts.join(" ")
    }
}

/// Strip common verb suffixes so `started`, `starting`, `starts` all match
fn strip_suffix(word: &str) -> &str {
    for suffix in ["ing", "ed", "es", "s"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            if stem.len() >= 3 {
                return stem;
            }
        }
    }
    word
}

/// Digit-bearing token with date separators, e.g. `2026-08-30` or `8/30`
fn looks_like_date(word: &str) -> bool {
    let has_sep = word.contains('/') || word.contains('-');
    has_sep
        && word.chars().next().is_some_and(|c| c.is_ascii_digit())
        && word.chars().last().is_some_and(|c| c.is_ascii_digit())
        && word.chars().all(|c| c.is_ascii_digit() || c == '/' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_action_with_suffix() {
        let s = SemanticSummary::extract("Started a new project yesterday");
        assert_eq!(s.action.as_deref(), Some("started"));
    }

    #[test]
    fn test_extract_entities_capitalized_and_article() {
        let s = SemanticSummary::extract("deployed the parser and talked to Alice about Tokio");
        assert!(s.entities.iter().any(|e| e == "parser"));
        assert!(s.entities.iter().any(|e| e == "Alice"));
        assert!(s.entities.iter().any(|e| e == "Tokio"));
    }

    #[test]
    fn test_extract_temporal_and_date() {
        let s = SemanticSummary::extract("meeting moved to Friday");
        assert_eq!(s.temporal_word.as_deref(), Some("friday"));

        let s = SemanticSummary::extract("released 2026-08-30 build");
        assert_eq!(s.temporal_word.as_deref(), Some("2026-08-30"));
    }

    #[test]
    fn test_extract_quantities() {
        let s = SemanticSummary::extract("added 3 files and removed 120 lines");
        assert_eq!(s.quantities.len(), 2);
        assert_eq!(s.quantities[0].value, 3.0);
        assert_eq!(s.quantities[0].unit, "files");
    }

    #[test]
    fn test_entity_cap() {
        let s = SemanticSummary::extract("met Alice Bob Carol Dave Erin Frank Grace");
        assert_eq!(s.entities.len(), 5);
    }

    #[test]
    fn test_reconstruct_concatenates_fields() {
        let s = SemanticSummary::extract("Fixed the scheduler today, touched 2 modules");
        let text = s.reconstruct();
        assert!(text.contains("fixed"));
        assert!(text.contains("scheduler"));
        assert!(text.contains("today"));
        assert!(text.contains("2 modules"));
    }

    #[test]
    fn test_empty_text_totality() {
        let s = SemanticSummary::extract("");
        assert_eq!(s, SemanticSummary::default());
        assert_eq!(s.reconstruct(), "");
    }
}
