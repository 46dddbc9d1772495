//! Hooks for the ticket and leave screens' backends.
//!
//! Those domains live elsewhere; they post their events here so the events
//! reach users over the shared socket. Their payloads are passed through as is.

use axum::{extract::State, http::StatusCode, Json};
use corpchat_shared::{ServerEvent, UnreadCount};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DomainNotice {
    pub to: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Unread leave requests of the caller (GET /api/leaves/unread-count)
pub async fn leave_unread_count(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Json<UnreadCount> {
    Json(UnreadCount {
        count: state.db.leave_unread(&me.id).await,
    })
}

/// Clear the caller's leave badge (PUT /api/leaves/read)
pub async fn mark_leaves_read(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> StatusCode {
    state.db.clear_leave_unread(&me.id).await;
    StatusCode::NO_CONTENT
}

/// Announce a new leave request to its reviewer (POST /api/leaves/notify)
pub async fn notify_leave(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(notice): Json<DomainNotice>,
) -> Result<StatusCode, AppError> {
    ensure_known(&state, &notice.to)?;
    let count = state.db.bump_leave_unread(&notice.to).await;
    tracing::debug!("{} filed a leave request for {} ({} unread)", me.id, notice.to, count);
    state
        .hub
        .emit_to(&notice.to, ServerEvent::NewLeaveRequest(notice.data))
        .await;
    Ok(StatusCode::ACCEPTED)
}

/// Announce a new ticket to its assignee (POST /api/tickets/notify)
pub async fn notify_ticket(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(notice): Json<DomainNotice>,
) -> Result<StatusCode, AppError> {
    ensure_known(&state, &notice.to)?;
    tracing::debug!("{} raised a ticket for {}", me.id, notice.to);
    state
        .hub
        .emit_to(&notice.to, ServerEvent::NewTicket(notice.data))
        .await;
    Ok(StatusCode::ACCEPTED)
}

fn ensure_known(state: &AppState, user_id: &str) -> Result<(), AppError> {
    state
        .users
        .get(user_id)
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound(format!("user {user_id} not found")))
}
