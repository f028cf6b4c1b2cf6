// ABOUTME: Classified error kinds surfaced by the relay core.
// ABOUTME: HookOutcome carries hook failures back to callers as values instead of raising them.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("{0}")]
    NotFound(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("{message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("{0}")]
    WorkerRejected(String),

    #[error("{0}")]
    ChainAborted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::WorkerRejected(_) => "worker_rejected",
            Self::ChainAborted(_) => "chain_aborted",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status the routing layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::UpstreamUnreachable(_) => 502,
            Self::UpstreamRejected { status, .. } => *status,
            Self::WorkerRejected(_) => 502,
            Self::ChainAborted(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    pub fn model_not_found() -> Self {
        Self::NotFound("Model not found".to_string())
    }
}

impl From<anyhow::Error> for RelayError {
    fn from(e: anyhow::Error) -> Self {
        RelayError::Internal(format!("{:#}", e))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Internal(e.to_string())
    }
}

/// Result of a post-completion hook: either the processed payload or the failure
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome {
    Completed(Value),
    Failed(RelayError),
}

impl HookOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RelayError> {
        match self {
            Self::Completed(_) => None,
            Self::Failed(e) => Some(e),
        }
    }

    /// JSON form handed back over HTTP; failures render as `{"error": ...}`
    pub fn to_value(&self) -> Value {
        match self {
            Self::Completed(value) => value.clone(),
            Self::Failed(e) => json!({"error": e.to_string()}),
        }
    }
}
