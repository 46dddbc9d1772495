//! Message request routes.
//!
//! Accept and reject notify both parties, so the requester learns the outcome
//! and the addressee's other sessions drop the request from their lists.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use corpchat_shared::{
    requires_request, CreateMessageRequestBody, MessageRequest, RequestDecision, ServerEvent,
};

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// Pending requests addressed to the caller (GET /api/message-requests)
pub async fn incoming(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Json<Vec<MessageRequest>> {
    Json(state.db.incoming_requests(&me.id).await)
}

/// Pending requests filed by the caller (GET /api/message-requests/outgoing)
pub async fn outgoing(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Json<Vec<MessageRequest>> {
    Json(state.db.outgoing_requests(&me.id).await)
}

/// File a request (POST /api/message-requests)
///
/// Only an employee asking a boss or HR user needs one; any other pair
/// chats directly and gets a 400.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(body): Json<CreateMessageRequestBody>,
) -> Result<Json<MessageRequest>, AppError> {
    let Some(target) = state.users.get(&body.to) else {
        return Err(AppError::NotFound(format!("user {} not found", body.to)));
    };
    if !requires_request(me.role, target.role) {
        return Err(AppError::BadRequest(format!(
            "{} users can message {} users without a request",
            me.role, target.role
        )));
    }
    let request = state
        .db
        .create_request(&me.id, &body.to, body.message, Utc::now())
        .await?;
    tracing::info!("{} asked {} to chat ({})", me.id, body.to, request.id);

    state
        .hub
        .emit_to(
            &request.to,
            ServerEvent::NewMessageRequest {
                request_id: request.id.clone(),
                from: request.from.clone(),
            },
        )
        .await;
    Ok(Json(request))
}

/// Accept a request addressed to the caller (PUT /api/message-requests/{id}/accept)
pub async fn accept(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<RequestDecision>, AppError> {
    let (request, chat) = state.db.accept_request(&request_id, &me.id).await?;
    tracing::info!("{} accepted request {} from {}", me.id, request.id, request.from);

    state
        .hub
        .emit_to_all(
            &[request.from.clone(), request.to.clone()],
            ServerEvent::MessageRequestAccepted {
                request_id: request.id.clone(),
                chat_id: chat.id.clone(),
            },
        )
        .await;
    Ok(Json(RequestDecision {
        request,
        chat: Some(chat),
    }))
}

/// Reject a request addressed to the caller (PUT /api/message-requests/{id}/reject)
pub async fn reject(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(request_id): Path<String>,
) -> Result<Json<RequestDecision>, AppError> {
    let request = state.db.reject_request(&request_id, &me.id).await?;
    tracing::info!("{} rejected request {} from {}", me.id, request.id, request.from);

    state
        .hub
        .emit_to_all(
            &[request.from.clone(), request.to.clone()],
            ServerEvent::MessageRequestRejected {
                request_id: request.id.clone(),
            },
        )
        .await;
    Ok(Json(RequestDecision {
        request,
        chat: None,
    }))
}
