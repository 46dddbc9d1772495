//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// RFC7807 Problem Details (application/problem+json)
///
/// Canonical error envelope for `/api/*` endpoints so clients can surface
/// meaningful validation errors instead of failing to decode a success type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// A URI reference that identifies the specific occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

/// Problem type slug used when a chat needs an accepted message request first.
pub const PROBLEM_REQUEST_REQUIRED: &str = "request-required";

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://corpchat.dev/problems/{slug}"),
            title: title.to_string(),
            status,
            detail: Some(detail.into()),
            instance: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new("forbidden", "Forbidden", 403, detail)
    }

    pub fn request_required(detail: impl Into<String>) -> Self {
        Self::new(PROBLEM_REQUEST_REQUIRED, "Message Request Required", 403, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new("conflict", "Conflict", 409, detail)
    }

    pub fn payload_too_large(detail: impl Into<String>) -> Self {
        Self::new("payload-too-large", "Payload Too Large", 413, detail)
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Self::new("internal-error", "Internal Server Error", 500, detail)
    }

    /// True if the problem type URL ends with `slug`.
    pub fn is(&self, slug: &str) -> bool {
        self.type_url.rsplit('/').next() == Some(slug)
    }
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The problem document carried by an HTTP error body, if any.
    pub fn problem(&self) -> Option<ProblemDetails> {
        match self {
            ApiError::Http { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    /// Best user-facing text for this error.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, status } => {
                try_problem_detail(body).unwrap_or_else(|| format!("request failed ({status})"))
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail_over_title() {
        let body = serde_json::to_string(&ProblemDetails::conflict("already pending")).unwrap();
        assert_eq!(try_problem_detail(&body).as_deref(), Some("already pending"));

        let mut blank = ProblemDetails::conflict("");
        blank.detail = Some("  ".into());
        let body = serde_json::to_string(&blank).unwrap();
        assert_eq!(try_problem_detail(&body).as_deref(), Some("Conflict"));
    }

    #[test]
    fn request_required_problem_is_recognisable() {
        let err = ApiError::Http {
            status: 403,
            body: serde_json::to_string(&ProblemDetails::request_required("ask first")).unwrap(),
        };
        let problem = err.problem().unwrap();
        assert!(problem.is(PROBLEM_REQUEST_REQUIRED));
        assert!(!problem.is("forbidden"));
        assert_eq!(err.user_message(), "ask first");
    }

    #[test]
    fn plain_http_body_falls_back_to_status() {
        let err = ApiError::Http {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert_eq!(err.status(), Some(502));
        assert_eq!(err.user_message(), "request failed (502)");
    }
}
