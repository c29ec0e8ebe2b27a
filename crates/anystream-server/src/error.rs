//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; any
//! [`anystream_core::Error`] converts with `?`.

use anystream_core::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &Error {
        &self.inner
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        Self::new(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(Error::Validation(rejection.body_text()))
    }
}

/// Stable machine-readable code for an error.
pub fn error_code(error: &Error) -> &'static str {
    match error {
        Error::NotFound { .. } => "not_found",
        Error::Unauthorized(_) => "unauthorized",
        Error::Conflict(_) => "conflict",
        Error::Validation(_) => "validation_error",
        Error::Database { .. } => "database_error",
        Error::Io { .. } => "io_error",
        Error::Tool { .. } => "tool_error",
        Error::Probe(_) => "probe_error",
        Error::Internal(_) => "internal_error",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": error_code(&self.inner),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(Error::not_found("media_ref", "abc"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn tool_failure_produces_502() {
        let err = AppError::new(Error::tool("ffmpeg", "exit status 1"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn validation_produces_422() {
        let err = AppError::new(Error::Validation("position must be a number".into()));
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(Error::Internal("oops".into())).with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
        assert_eq!(error_code(err.inner()), "internal_error");
    }
}
