//! Typed failures of the messaging core.
//!
//! Transport problems never surface here: the connection manager recovers or
//! degrades its status on its own. Everything else comes back to the caller
//! of the initiating action as a `ChatError`.

use corpchat_shared::{ApiError, PROBLEM_REQUEST_REQUIRED};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("a message request to {0} is already pending")]
    DuplicateRequest(String),
    #[error("message request {0} was already answered")]
    AlreadyResolved(String),
    #[error("upload of {name} failed: {reason}")]
    Upload { name: String, reason: String },
    #[error("message could not be sent: {0}")]
    Send(String),
    #[error("not allowed: {0}")]
    UnauthorizedAction(String),
    #[error("{0} must accept a message request before you can chat")]
    RequestRequired(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ChatError {
    /// Map a collaborator error for a request addressed to `target`.
    pub(crate) fn from_api(err: ApiError, target: &str) -> Self {
        match err.status() {
            Some(409) => ChatError::DuplicateRequest(target.to_string()),
            Some(403) => {
                let requires_request = err
                    .problem()
                    .is_some_and(|p| p.is(PROBLEM_REQUEST_REQUIRED));
                if requires_request {
                    ChatError::RequestRequired(target.to_string())
                } else {
                    ChatError::UnauthorizedAction(err.user_message())
                }
            }
            _ => ChatError::Api(err),
        }
    }

    /// Map a failed accept/reject of `request_id`. A conflict or a missing
    /// request means someone already answered it.
    pub(crate) fn from_decision(err: ApiError, request_id: &str) -> Self {
        match err.status() {
            Some(409) | Some(404) => ChatError::AlreadyResolved(request_id.to_string()),
            _ => ChatError::from_api(err, request_id),
        }
    }

    /// Text suitable for an inline error or a transient banner.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Api(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}
