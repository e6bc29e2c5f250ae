//! Engine error taxonomy
//!
//! Tier-traversal operations (`get`, `search`) never let a single corrupted
//! or missing sub-result abort a multi-record scan; pipeline and differential
//! operations that cannot produce a well-formed output fail the whole call.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The durable backend is unreachable or failed mid-operation.
    /// Retryable with backoff; never fatal to the store instance.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A compressed payload, code stream, or delta failed to decode.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// No record or session exists under the given key.
    /// Normal lookups return `Ok(None)` instead; this variant is for
    /// operations where the id is required to exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A record was rejected before any tier mutation took place.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::StorageUnavailable(e.to_string())
    }
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_converts() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: EngineError = bad.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }

    #[test]
    fn test_sqlite_error_maps_to_unavailable() {
        let err: EngineError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
    }
}
