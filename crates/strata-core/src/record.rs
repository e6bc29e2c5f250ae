//! Memory Record - The fundamental unit stored by the engine
//!
//! A record is a piece of conversational text plus opaque annotations:
//! - Free text and optional surrounding context
//! - Creation timestamp (assigned by the store when missing)
//! - An opaque metadata map the engine never interprets (NLP annotations,
//!   knowledge-graph hints, and similar collaborator output live here)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ============================================================================
// RECORD
// ============================================================================

/// A single conversational record
///
/// Immutable once archived into the cold tier; field updates are allowed
/// while the record is hot or warm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    /// Unique identifier (UUID v4 when store-generated)
    pub id: String,
    /// The conversational text
    pub text: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Optional surrounding context captured with the text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    /// Opaque annotations; the engine stores these without inspecting them
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl MemoryRecord {
    /// Create a record with a fresh id and the current timestamp
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
            context_text: None,
            metadata: HashMap::new(),
        }
    }

    /// Unix timestamp in milliseconds, the unit used for day bucketing
    pub fn timestamp_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }

    /// Calendar-day session key, e.g. `2026-8-30`
    pub fn session_key(&self) -> String {
        use chrono::Datelike;
        let d = self.created_at;
        format!("{}-{}-{}", d.year(), d.month(), d.day())
    }
}

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Input for adding a record to the store
///
/// Uses `deny_unknown_fields` to prevent field injection from callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordInput {
    /// The conversational text (required, non-empty)
    pub text: String,
    /// Caller-supplied id; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Caller-supplied timestamp; assigned when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Optional surrounding context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_text: Option<String>,
    /// Opaque annotations
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RecordInput {
    /// Create an input holding only text
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Validate and materialize into a full record.
    ///
    /// Rejects with `InvalidInput` before any tier mutation happens.
    pub fn into_record(self) -> Result<MemoryRecord> {
        if self.text.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "record text must be non-empty".to_string(),
            ));
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(EngineError::InvalidInput(
                    "record id must be non-empty when supplied".to_string(),
                ));
            }
        }

        Ok(MemoryRecord {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            text: self.text,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            context_text: self.context_text,
            metadata: self.metadata,
        })
    }
}

// ============================================================================
// EXPORT BOUNDARY
// ============================================================================

/// Plain-data bundle produced by `export()` and accepted by `import()`
///
/// Consumed by excluded UI layers for user-initiated backup/restore; the
/// engine does not interpret `graph` or `metadata` beyond carrying them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryExport {
    /// All resident records, hot/warm first then decompressed cold sessions
    pub messages: Vec<MemoryRecord>,
    /// Knowledge-graph payload owned by the excluded consumer
    #[serde(default)]
    pub graph: Value,
    /// Export metadata (version, counts, timestamps)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_rejected() {
        let err = RecordInput::text("   ").into_record().unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_missing_id_and_timestamp_assigned() {
        let record = RecordInput::text("hello").into_record().unwrap();
        assert!(!record.id.is_empty());
        assert!(record.created_at <= Utc::now());
    }

    #[test]
    fn test_caller_id_preserved() {
        let input = RecordInput {
            id: Some("msg-7".to_string()),
            ..RecordInput::text("hello")
        };
        assert_eq!(input.into_record().unwrap().id, "msg-7");
    }

    #[test]
    fn test_session_key_is_calendar_day() {
        let mut record = MemoryRecord::new("x");
        record.created_at = "2026-08-30T23:59:00Z".parse().unwrap();
        assert_eq!(record.session_key(), "2026-8-30");
    }

    #[test]
    fn test_input_deny_unknown_fields() {
        let json = r#"{"text": "hi", "surprise": 1}"#;
        let parsed: std::result::Result<RecordInput, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }
}
