//! Crate-wide error type.

use thiserror::Error;

/// Everything that can go wrong while submitting, processing, storing or
/// fetching a query.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Settings file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied an invalid submission or update.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No query with that id.
    #[error("{0} not found")]
    NotFound(String),

    /// The query is not in a state that allows the requested transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A provider answered but the answer was unusable.
    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("{provider} timed out after {secs} seconds")]
    Timeout { provider: String, secs: u64 },

    /// Every attempt against a provider failed.
    #[error("failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// Transport-level failure from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The evaluation service replied with a non-2xx status.
    #[error("{detail}")]
    Api { status: u16, detail: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl EvalError {
    /// HTTP status the server answers with when a handler fails with `self`.
    pub fn http_status(&self) -> u16 {
        match self {
            EvalError::Validation(_) | EvalError::Json(_) => 400,
            EvalError::NotFound(_) => 404,
            EvalError::Conflict(_) => 409,
            EvalError::Provider { .. } | EvalError::RetryExhausted { .. } => 502,
            EvalError::Timeout { .. } => 504,
            EvalError::Api { status, .. } => *status,
            _ => 500,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EvalError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        EvalError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EvalError::Conflict(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
