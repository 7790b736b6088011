//! Error types for quill.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias using quill's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for quill operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Knowledge item not found
    #[error("Knowledge not found: {0}")]
    KnowledgeNotFound(Uuid),

    /// The stored item changed (edited or moved stage) while an attempt ran
    #[error("Knowledge changed during processing: {0}")]
    StaleItem(Uuid),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Chunking/summarization call failed
    #[error("Inference error: {0}")]
    Inference(String),

    /// An operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Provider output is inconsistent with the request (e.g. vector count mismatch)
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Submission attempted after the pipeline shut down
    #[error("Pipeline unavailable: {0}")]
    PipelineUnavailable(String),

    /// Submission dropped because the item is already being processed
    #[error("Knowledge already in flight: {0}")]
    InFlight(Uuid),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure came from the AI provider or a deadline and is
    /// worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Embedding(_) | Error::Inference(_) | Error::Timeout(_) | Error::Request(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_knowledge_not_found() {
        let id = Uuid::nil();
        let err = Error::KnowledgeNotFound(id);
        assert_eq!(err.to_string(), format!("Knowledge not found: {}", id));
    }

    #[test]
    fn test_stale_item_is_not_transient() {
        let id = Uuid::new_v4();
        let err = Error::StaleItem(id);
        assert!(err.to_string().contains(&id.to_string()));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_error_display_data_integrity() {
        let err = Error::DataIntegrity("2 vectors for 3 chunks".to_string());
        assert_eq!(err.to_string(), "Data integrity error: 2 vectors for 3 chunks");
    }

    #[test]
    fn test_error_display_pipeline_unavailable() {
        let err = Error::PipelineUnavailable("shut down".to_string());
        assert_eq!(err.to_string(), "Pipeline unavailable: shut down");
    }

    #[test]
    fn test_error_display_in_flight() {
        let id = Uuid::new_v4();
        let err = Error::InFlight(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Inference("boom".into()).is_transient());
        assert!(Error::Embedding("boom".into()).is_transient());
        assert!(Error::Timeout("summarize".into()).is_transient());
        assert!(!Error::DataIntegrity("mismatch".into()).is_transient());
        assert!(!Error::PipelineUnavailable("down".into()).is_transient());
        assert!(!Error::InvalidInput("bad".into()).is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
