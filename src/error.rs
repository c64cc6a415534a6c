use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("interval must be a positive number of milliseconds or \"manual\", got {0}")]
    InvalidInterval(String),
    #[error("unknown test mode {0:?} (expected ping, simple or full)")]
    InvalidMode(String),
}

/// A single finding produced while validating one registry record.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryIssue {
    #[error("record #{index}: required field `{field}` is empty")]
    MissingField { index: usize, field: &'static str },
    #[error("provider {id}: endpoint {endpoint:?} is not an absolute URL ({reason})")]
    InvalidEndpoint { id: String, endpoint: String, reason: String },
    #[error("provider {id}: color {color:?} is not a #RRGGBB hex value")]
    InvalidColor { id: String, color: String },
    #[error("provider {id}: id already registered")]
    DuplicateId { id: String },
}

impl RegistryIssue {
    /// Fatal issues drop the record; the rest are reported and the record is kept.
    pub fn is_fatal(&self) -> bool {
        match self {
            RegistryIssue::MissingField { field, .. } => {
                matches!(*field, "id" | "endpoint" | "probePath")
            }
            RegistryIssue::DuplicateId { .. } => true,
            RegistryIssue::InvalidEndpoint { .. } | RegistryIssue::InvalidColor { .. } => false,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProbeError {
    #[error("measured latency {0} ms is not a finite non-negative value")]
    InvalidLatency(f64),
    #[error("provider {0} is not registered")]
    UnknownProvider(String),
    #[error("probe task for {id} aborted: {reason}")]
    TaskFailed { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not Found: {0}")]
    NotFound(String),
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::InvalidInput(err.to_string())
    }
}

impl From<ProbeError> for ApiError {
    fn from(err: ProbeError) -> Self {
        ApiError::NotFound(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
