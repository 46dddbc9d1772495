//! Handler errors rendered as RFC7807 problem documents.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use corpchat_shared::{GateError, ProblemDetails};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    /// The caller needs an accepted message request before chatting.
    #[error("{0}")]
    RequestRequired(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    PayloadTooLarge(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn problem(&self) -> ProblemDetails {
        let detail = self.to_string();
        match self {
            AppError::BadRequest(_) => ProblemDetails::bad_request(detail),
            AppError::Unauthorized(_) => ProblemDetails::unauthorized(detail),
            AppError::Forbidden(_) => ProblemDetails::forbidden(detail),
            AppError::RequestRequired(_) => ProblemDetails::request_required(detail),
            AppError::NotFound(_) => ProblemDetails::not_found(detail),
            AppError::Conflict(_) => ProblemDetails::conflict(detail),
            AppError::PayloadTooLarge(_) => ProblemDetails::payload_too_large(detail),
            AppError::Internal(_) => ProblemDetails::internal_error(detail),
        }
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        let detail = e.to_string();
        match e {
            GateError::DuplicateRequest { .. }
            | GateError::AlreadyResolved { .. }
            | GateError::ConversationExists { .. } => {
                AppError::Conflict(detail)
            }
            GateError::NotFound(_) => AppError::NotFound(detail),
            GateError::UnauthorizedAction { .. } => AppError::Forbidden(detail),
            GateError::SelfRequest => AppError::BadRequest(detail),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let problem = self.problem();
        if let AppError::Internal(detail) = &self {
            tracing::error!("internal error: {}", detail);
        }
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(problem),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpchat_shared::{RequestStatus, PROBLEM_REQUEST_REQUIRED};

    #[test]
    fn gate_errors_map_to_statuses() {
        let dup: AppError = GateError::DuplicateRequest {
            from: "emp".into(),
            to: "boss".into(),
        }
        .into();
        assert_eq!(dup.problem().status, 409);

        let resolved: AppError = GateError::AlreadyResolved {
            request_id: "r1".into(),
            status: RequestStatus::Accepted,
        }
        .into();
        assert_eq!(resolved.problem().status, 409);

        let unauthorized: AppError = GateError::UnauthorizedAction {
            actor: "emp".into(),
            request_id: "r1".into(),
        }
        .into();
        assert_eq!(unauthorized.problem().status, 403);

        let missing: AppError = GateError::NotFound("r1".into()).into();
        assert_eq!(missing.problem().status, 404);

        let own: AppError = GateError::SelfRequest.into();
        assert_eq!(own.problem().status, 400);

        let existing: AppError = GateError::ConversationExists {
            from: "emp".into(),
            to: "boss".into(),
        }
        .into();
        assert_eq!(existing.problem().status, 409);
    }

    #[test]
    fn request_required_is_a_distinct_403() {
        let problem = AppError::RequestRequired("ask first".into()).problem();
        assert_eq!(problem.status, 403);
        assert!(problem.is(PROBLEM_REQUEST_REQUIRED));
        assert_eq!(problem.detail.as_deref(), Some("ask first"));
    }

    #[test]
    fn response_carries_problem_content_type() {
        let response = AppError::NotFound("no such chat".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }
}
