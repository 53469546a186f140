//! Error types and handling for the administration HTTP surface
//!
//! Maps the uniform error kinds raised by [`plugin_core`] and [`scheduler_core`] to HTTP
//! status codes and a stable JSON `{code, message}` body (spec §7), the same
//! `IntoResponse` shape the reference server crate uses for its own error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for admin-server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// The administration surface's error type. Plugin-core and scheduler-core errors are
/// wrapped rather than flattened, so their stable `.code()`/variant carries through to
/// the JSON response unchanged.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A plugin-core operation failed.
    #[error(transparent)]
    Plugin(#[from] plugin_core::error::PluginError),

    /// A scheduler-core operation failed.
    #[error(transparent)]
    Scheduler(#[from] scheduler_core::SchedulerError),

    /// The path did not resolve to a known plugin or job.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be parsed or named an invalid id.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body, stable across every admin endpoint (spec §7).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Plugin(err) => plugin_error_status(err),
            ServerError::Scheduler(err) => scheduler_error_status(err),
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ServerError::Plugin(err) => err.code(),
            ServerError::Scheduler(err) => scheduler_error_code(err),
            ServerError::NotFound(_) => "not_found",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::RateLimitExceeded(_) => "capacity",
            ServerError::Internal(_) => "internal",
        }
    }

    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.to_string(),
            request_id,
            timestamp: chrono::Utc::now(),
        }
    }
}

fn plugin_error_status(err: &plugin_core::error::PluginError) -> StatusCode {
    use plugin_core::error::PluginError::*;
    match err {
        Config { .. } => StatusCode::BAD_REQUEST,
        IpcTimeout { .. } | OperationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        IpcProtocol { .. } | ProcessDead { .. } | PluginFailure { .. } => StatusCode::BAD_GATEWAY,
        Capacity { .. } => StatusCode::TOO_MANY_REQUESTS,
        UnknownAction { .. } => StatusCode::BAD_REQUEST,
        Dependency { .. } | InvalidStateTransition { .. } => StatusCode::CONFLICT,
        Policy { .. } => StatusCode::FORBIDDEN,
        NotFound { .. } | PluginGone { .. } => StatusCode::NOT_FOUND,
        Io(_) | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn scheduler_error_status(err: &scheduler_core::SchedulerError) -> StatusCode {
    use scheduler_core::SchedulerError::*;
    match err {
        NotFound(_) => StatusCode::NOT_FOUND,
        AlreadyRegistered(_) => StatusCode::CONFLICT,
        CircularDependency(_) | UnknownDependency { .. } | InvalidCron(_, _) | InvalidTimezone(_) => {
            StatusCode::BAD_REQUEST
        }
        PoolSaturated(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn scheduler_error_code(err: &scheduler_core::SchedulerError) -> &'static str {
    use scheduler_core::SchedulerError::*;
    match err {
        NotFound(_) => "not_found",
        AlreadyRegistered(_) => "dependency",
        CircularDependency(_) => "dependency",
        UnknownDependency { .. } => "dependency",
        InvalidCron(_, _) => "config",
        InvalidTimezone(_) => "config",
        PoolSaturated(_) => "capacity",
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let response = self.to_response(None);

        if status.is_server_error() {
            tracing::error!(error = %self, "admin request failed");
        } else {
            tracing::debug!(error = %self, "admin request rejected");
        }

        (status, Json(response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_core::error::PluginError;

    #[test]
    fn test_plugin_not_found_maps_to_404() {
        let err = ServerError::Plugin(PluginError::NotFound {
            plugin: "calc".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), "not_found");
    }

    #[test]
    fn test_capacity_maps_to_429() {
        let err = ServerError::Plugin(PluginError::Capacity {
            plugin: "calc".to_string(),
            reason: "queue full".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_scheduler_pool_saturated_maps_to_503() {
        let err = ServerError::Scheduler(scheduler_core::SchedulerError::PoolSaturated("calc::sync".to_string()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
