//! Error taxonomy for the HTTP surface.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Request-level errors with a fixed HTTP mapping.
///
/// Collectors never surface these directly; they degrade to warnings
/// through the partial-failure wrapper. Only configuration, validation,
/// auth and availability problems abort a request.
pub enum ApiError {
    /// Missing or invalid server-side configuration (e.g. no GitHub token).
    Config(anyhow::Error),
    /// Malformed username, query parameter or request body.
    Validation(String),
    /// Missing or invalid API key.
    Unauthorized(String),
    /// Valid credentials but the caller is not allowed to see this data.
    Forbidden(String),
    /// Resource (webhook id) does not exist.
    NotFound(String),
    /// The caller exhausted their own request quota.
    Throttled { retry_after: u64 },
    /// GitHub kept rate limiting the request even after retries.
    RateLimited { retry_after: u64 },
    /// Upstream failure that exhausted retries and had no fallback.
    Upstream(anyhow::Error),
    /// The circuit breaker is open or the rate limit budget is critical.
    Unavailable,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Config(_) | ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Throttled { .. } | ApiError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Config(e) => write!(f, "configuration error: {e}"),
            ApiError::Validation(msg) => write!(f, "{msg}"),
            ApiError::Unauthorized(msg) => write!(f, "{msg}"),
            ApiError::Forbidden(msg) => write!(f, "{msg}"),
            ApiError::NotFound(msg) => write!(f, "{msg}"),
            ApiError::Throttled { .. } => write!(f, "too many requests"),
            ApiError::RateLimited { .. } => write!(f, "upstream rate limit exhausted"),
            ApiError::Upstream(e) => write!(f, "upstream error: {e}"),
            ApiError::Unavailable => write!(f, "GitHub is temporarily unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("request rejected: {self}");
        }

        let body = Json(json!({ "error": self.to_string() }));
        let mut resp = (status, body).into_response();
        if let ApiError::RateLimited { retry_after } | ApiError::Throttled { retry_after } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                resp.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        resp
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Upstream(e)
    }
}

impl From<crate::github::ClientError> for ApiError {
    fn from(e: crate::github::ClientError) -> Self {
        use crate::github::ClientError;
        match e {
            ClientError::BreakerOpen => ApiError::Unavailable,
            ClientError::RateLimited { retry_after } => ApiError::RateLimited {
                retry_after: retry_after.unwrap_or(60),
            },
            other => ApiError::Upstream(other.into()),
        }
    }
}
