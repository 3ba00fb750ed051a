//! Error taxonomy for the mutation-test engine.
//!
//! Individual request failures are not errors here: they are recorded on the
//! `HttpResponse` and fed to the classifier like any other response.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed test configuration, rejected before any network activity.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The target could not be reached during the happy-path check.
    #[error("Target unreachable: {0}")]
    Connectivity(String),

    /// Unexpected failure inside orchestration or aggregation.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Test not found: {0}")]
    NotFound(String),

    /// The run exists but has not produced the requested artifact yet.
    #[error("Report not ready for test {0}")]
    NotReady(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error ends a run before any result is produced.
    pub fn is_pre_run(&self) -> bool {
        matches!(self, EngineError::Configuration(_) | EngineError::Connectivity(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
