use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

/// Result alias used by services and handlers alike.
pub type ApiResult<T> = Result<T, ApiError>;

/// Closed set of error kinds surfaced by the gateway.
///
/// Every kind has a stable code so callers can match on it without parsing
/// the human message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    AuthRequired,
    Forbidden,
    DatasetNotFound,
    DimensionNotFound,
    MeasureNotFound,
    Plan,
    Build,
    Config,
    Connection,
    Query,
    Timeout,
    CoalesceTimeout,
    CacheUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ERR_VALIDATION",
            ErrorKind::AuthRequired => "ERR_AUTH_REQUIRED",
            ErrorKind::Forbidden => "ERR_FORBIDDEN",
            ErrorKind::DatasetNotFound => "ERR_DATASET_NOT_FOUND",
            ErrorKind::DimensionNotFound => "ERR_DIMENSION_NOT_FOUND",
            ErrorKind::MeasureNotFound => "ERR_MEASURE_NOT_FOUND",
            ErrorKind::Plan => "ERR_PLAN",
            ErrorKind::Build => "ERR_BUILD",
            ErrorKind::Config => "ERR_CONFIG",
            ErrorKind::Connection => "ERR_CONNECTION",
            ErrorKind::Query => "ERR_QUERY",
            ErrorKind::Timeout => "ERR_TIMEOUT",
            ErrorKind::CoalesceTimeout => "ERR_COALESCE_TIMEOUT",
            ErrorKind::CacheUnavailable => "ERR_CACHE_UNAVAILABLE",
            ErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Inverse of [`ErrorKind::code`], for errors rehydrated from cache
    /// sentinels.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ERR_VALIDATION" => ErrorKind::Validation,
            "ERR_AUTH_REQUIRED" => ErrorKind::AuthRequired,
            "ERR_FORBIDDEN" => ErrorKind::Forbidden,
            "ERR_DATASET_NOT_FOUND" => ErrorKind::DatasetNotFound,
            "ERR_DIMENSION_NOT_FOUND" => ErrorKind::DimensionNotFound,
            "ERR_MEASURE_NOT_FOUND" => ErrorKind::MeasureNotFound,
            "ERR_PLAN" => ErrorKind::Plan,
            "ERR_BUILD" => ErrorKind::Build,
            "ERR_CONFIG" => ErrorKind::Config,
            "ERR_CONNECTION" => ErrorKind::Connection,
            "ERR_QUERY" => ErrorKind::Query,
            "ERR_TIMEOUT" => ErrorKind::Timeout,
            "ERR_COALESCE_TIMEOUT" => ErrorKind::CoalesceTimeout,
            "ERR_CACHE_UNAVAILABLE" => ErrorKind::CacheUnavailable,
            _ => ErrorKind::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::DatasetNotFound
            | ErrorKind::DimensionNotFound
            | ErrorKind::MeasureNotFound => StatusCode::NOT_FOUND,
            ErrorKind::Plan | ErrorKind::Build => StatusCode::BAD_REQUEST,
            ErrorKind::Config => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Connection => StatusCode::BAD_GATEWAY,
            ErrorKind::Query => StatusCode::BAD_GATEWAY,
            ErrorKind::Timeout | ErrorKind::CoalesceTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::CacheUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured gateway error.
///
/// Engine errors are wrapped, never passed through verbatim: the raw driver
/// message may contain connection strings or credentials, so it goes to the
/// log while the response carries the wrapped form.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub hint: Option<String>,
    /// Pipeline step that failed, for plan/compile diagnostics.
    pub step: Option<&'static str>,
    pub request_id: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            step: None,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Rebuilds an error from a stable code and message, e.g. one read back
    /// from a cache sentinel.
    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_step(mut self, step: &'static str) -> Self {
        self.step = Some(step);
        self
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthRequired, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn dataset_not_found(dataset: &str) -> Self {
        Self::new(
            ErrorKind::DatasetNotFound,
            format!("Dataset '{dataset}' not found in catalog"),
        )
        .with_hint("Check the catalog for available datasets")
    }

    pub fn dimension_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::DimensionNotFound,
            format!("Unknown dimension '{name}'"),
        )
    }

    pub fn measure_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::MeasureNotFound,
            format!("Unknown measure '{name}'"),
        )
    }

    pub fn plan_error(step: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Plan, message).with_step(step)
    }

    pub fn build_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Build, message)
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Wraps a driver connection failure. The raw cause is logged by the
    /// caller; the response only names the engine.
    pub fn connection_error(engine: &str, cause: impl std::fmt::Display) -> Self {
        tracing::error!("Connection to {} failed: {}", engine, cause);
        Self::new(
            ErrorKind::Connection,
            format!("Failed to connect to {engine} source"),
        )
    }

    /// Wraps a driver query failure, keeping the raw message out of the
    /// response body.
    pub fn query_error(engine: &str, cause: impl std::fmt::Display) -> Self {
        tracing::error!("Query on {} failed: {}", engine, cause);
        Self::new(
            ErrorKind::Query,
            format!("Query execution failed on {engine}"),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn coalesce_timeout(fingerprint: &str) -> Self {
        Self::new(
            ErrorKind::CoalesceTimeout,
            format!(
                "Timed out waiting for in-flight query {} to complete",
                &fingerprint[..fingerprint.len().min(12)]
            ),
        )
    }

    pub fn cache_unavailable(cause: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorKind::CacheUnavailable,
            format!("Cache backend unavailable: {cause}"),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let mut error = json!({
            "code": self.kind.code(),
            "message": self.message,
            "request_id": self.request_id,
        });
        if let Some(hint) = &self.hint {
            error["hint"] = json!(hint);
        }
        if let Some(step) = self.step {
            error["step"] = json!(step);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}
