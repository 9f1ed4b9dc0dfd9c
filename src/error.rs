use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Provider error text is cut to this many characters before it is stored.
pub const MAX_PROVIDER_ERROR_CHARS: usize = 200;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    /// Run transcript, present on failed reminder runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
    WithOutput(Box<ApiError>, String),
}

impl ApiError {
    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn invalid_cron_token() -> Self {
        ApiError::Unauthorized("UNAUTHORIZED", "Invalid or missing token".into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", message.into())
    }

    pub fn db(err: sqlx::Error) -> Self {
        ApiError::Internal(format!("db error: {err}"))
    }

    /// Attach a textual transcript to the error body.
    pub fn with_output(self, output: String) -> Self {
        match self {
            ApiError::WithOutput(inner, _) => ApiError::WithOutput(inner, output),
            other => ApiError::WithOutput(Box::new(other), output),
        }
    }

    fn into_parts(self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            ApiError::Unauthorized(code, msg) => (StatusCode::UNAUTHORIZED, code, msg, None),
            ApiError::Forbidden(code, msg) => (StatusCode::FORBIDDEN, code, msg, None),
            ApiError::BadRequest(code, msg) => (StatusCode::BAD_REQUEST, code, msg, None),
            ApiError::NotFound(code, msg) => (StatusCode::NOT_FOUND, code, msg, None),
            ApiError::Conflict(code, msg) => (StatusCode::CONFLICT, code, msg, None),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg, None),
            ApiError::WithOutput(inner, output) => {
                let (status, code, msg, _) = inner.into_parts();
                (status, code, msg, Some(output))
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, output) = self.into_parts();
        if status.is_server_error() {
            tracing::error!(code, %message, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message,
                output,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ReminderError> for ApiError {
    fn from(err: ReminderError) -> Self {
        match &err {
            ReminderError::SafetyCapExceeded { .. } => {
                ApiError::Conflict("SAFETY_CAP_EXCEEDED", err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

/// Why a single SMS was not delivered. Terminal for that recipient only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmsError {
    /// `masked` is the redacted input, safe to store and log.
    #[error("Invalid phone number: {masked}")]
    InvalidPhone { masked: String },

    #[error("SMS provider not configured")]
    NotConfigured,

    #[error("Provider status: {status}")]
    Rejected { status: String },

    #[error("No recipients in provider response")]
    NoRecipients,

    #[error("{0}")]
    Provider(String),

    #[error("SMS provider did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
}

impl SmsError {
    /// Provider error text truncated to [`MAX_PROVIDER_ERROR_CHARS`].
    ///
    /// Providers build `SmsError::Provider` untruncated; the gateway scrubs the
    /// recipient number out of it first and then calls this.
    pub fn provider(text: impl AsRef<str>) -> Self {
        SmsError::Provider(truncate_chars(text.as_ref(), MAX_PROVIDER_ERROR_CHARS))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SmsError::NotConfigured)
    }
}

/// Run-level failures of the reminder job.
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error(
        "SAFETY CAP: {found} reminders exceed limit of {max}. Aborting to prevent mass sends. \
         Raise SMS_MAX_REMINDERS_PER_RUN if this is intentional."
    )]
    SafetyCapExceeded { found: usize, max: usize },

    #[error("db error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot resolve reminder window: {0}")]
    Window(String),
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_truncated() {
        let long = "x".repeat(500);
        let SmsError::Provider(text) = SmsError::provider(&long) else {
            panic!("expected provider error");
        };
        assert_eq!(text.chars().count(), MAX_PROVIDER_ERROR_CHARS);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("médecin", 2), "mé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_error_texts() {
        let err = SmsError::InvalidPhone { masked: "***".into() };
        assert_eq!(err.to_string(), "Invalid phone number: ***");
        assert_eq!(
            SmsError::Rejected { status: "InvalidPhoneNumber".into() }.to_string(),
            "Provider status: InvalidPhoneNumber"
        );
        assert_eq!(
            SmsError::Timeout(Duration::from_secs(30)).to_string(),
            "SMS provider did not answer within 30s"
        );
    }

    #[test]
    fn test_safety_cap_maps_to_conflict() {
        let api: ApiError = ReminderError::SafetyCapExceeded { found: 201, max: 200 }.into();
        match api {
            ApiError::Conflict(code, msg) => {
                assert_eq!(code, "SAFETY_CAP_EXCEEDED");
                assert!(msg.contains("201"));
                assert!(msg.contains("200"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_codes() {
        let (status, code, _, _) = ApiError::invalid_cron_token().into_parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "UNAUTHORIZED");

        let (status, code, _, _) = ApiError::validation("bad").into_parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "VALIDATION_ERROR");

        let db = ReminderError::Window("boom".into());
        let (status, code, msg, output) = ApiError::from(db).into_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "INTERNAL");
        assert_eq!(msg, "cannot resolve reminder window: boom");
        assert_eq!(output, None);
    }

    #[tokio::test]
    async fn test_output_is_serialized_next_to_the_error() {
        let err = ApiError::from(ReminderError::SafetyCapExceeded { found: 3, max: 2 })
            .with_output("Found 3 appointment(s) to remind".into());

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "SAFETY_CAP_EXCEEDED");
        assert_eq!(json["error"]["output"], "Found 3 appointment(s) to remind");
    }

    #[tokio::test]
    async fn test_output_is_omitted_when_absent() {
        let response = ApiError::session_expired().into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "SESSION_EXPIRED");
        assert!(json["error"].get("output").is_none());
    }
}
