//! Pipeline error taxonomy.
//!
//! Loops over days, segments and lookback windows consult
//! [`PipelineError::is_skippable`] to decide between "skip this unit and
//! continue" and "abort this unit".

use crate::forecast::store::StoreError;

#[derive(Debug)]
pub enum PipelineError {
    /// A day/segment/lookback window has no log data.
    MissingWindowData(String),
    /// An expected model or feature-list blob is absent.
    ArtifactNotFound(String),
    /// Required log columns are missing or carry the wrong type.
    MalformedInput(String),
    /// Storage or symbol-resolution call failed after retries.
    ExternalService(String),
    /// Training could not produce a model (e.g. no rows).
    Training(String),
    Store(StoreError),
    Serialization(serde_json::Error),
}

impl PipelineError {
    pub fn missing_window(window: impl Into<String>) -> Self {
        Self::MissingWindowData(window.into())
    }

    pub fn artifact_not_found(key: impl Into<String>) -> Self {
        Self::ArtifactNotFound(key.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::ExternalService(msg.into())
    }

    /// True when the failure only degrades the current unit of work.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::MissingWindowData(_) | Self::ExternalService(_) | Self::Store(_)
        )
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingWindowData(w) => write!(f, "No log data for window {}", w),
            Self::ArtifactNotFound(key) => {
                write!(f, "Artifact not found: {} (train a model first)", key)
            }
            Self::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            Self::ExternalService(msg) => write!(f, "External service error: {}", msg),
            Self::Training(msg) => write!(f, "Training error: {}", msg),
            Self::Store(e) => write!(f, "Store error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
