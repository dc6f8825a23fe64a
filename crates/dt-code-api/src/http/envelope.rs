//! The `{status, message, data}` response envelope (spec.md §6b).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dt_common::CoreError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self { status: "ok", message: String::new(), data: Some(data) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: "error", message: message.into(), data: None }
    }

    pub fn need_force(message: impl Into<String>) -> Self {
        Self { status: "need-force", message: message.into(), data: None }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self { status: "not-implemented", message: message.into(), data: None }
    }

    fn status_code(&self) -> StatusCode {
        match self.status {
            "ok" => StatusCode::OK,
            "need-force" => StatusCode::CONFLICT,
            "not-implemented" => StatusCode::NOT_IMPLEMENTED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let code = self.status_code();
        (code, Json(self)).into_response()
    }
}

/// Maps any propagated `CoreError` to the `error` envelope (spec.md §7
/// propagation policy: "HTTP handlers map any caught error to the `error`
/// envelope").
pub fn from_core_error(e: CoreError) -> Envelope<()> {
    Envelope::error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_has_no_message() {
        let env = Envelope::ok(42);
        assert_eq!(env.status, "ok");
        assert!(env.message.is_empty());
        assert_eq!(env.data, Some(42));
    }

    #[test]
    fn core_error_maps_to_error_status() {
        let env = from_core_error(CoreError::NotFound("foo".to_string()));
        assert_eq!(env.status, "error");
        assert!(env.message.contains("foo"));
    }
}
