//! Conversation routes.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use corpchat_shared::{
    requires_request, ChatHistory, ChatUser, Conversation, Message, OpenPrivateChatRequest,
    SendMessageRequest, ServerEvent,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

/// List the caller's conversations (GET /api/chat)
pub async fn list_chats(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Json<Vec<Conversation>> {
    Json(state.db.chats_for(&me.id).await)
}

/// One page of history (GET /api/chat/{chat_id})
///
/// Fetching the newest page counts as reading the conversation: the caller is
/// recorded on the peer's messages and the peer gets `messagesRead`.
pub async fn chat_history(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ChatHistory>, AppError> {
    if query.before.is_none() && state.db.mark_read(&chat_id, &me.id).await? {
        let chat = state.db.conversation(&chat_id, &me.id).await?;
        if let Some(peer) = chat.peer_of(&me.id) {
            state
                .hub
                .emit_to(
                    peer,
                    ServerEvent::MessagesRead {
                        chat_id: chat_id.clone(),
                        reader_id: me.id.clone(),
                    },
                )
                .await;
        }
    }

    let messages = state
        .db
        .history(&chat_id, &me.id, query.before.as_deref(), query.limit)
        .await?;
    let chat = state.db.conversation(&chat_id, &me.id).await?;
    Ok(Json(ChatHistory { chat, messages }))
}

/// Open (or return) the private chat with a user (POST /api/chat/private)
pub async fn open_private_chat(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Json(body): Json<OpenPrivateChatRequest>,
) -> Result<Json<Conversation>, AppError> {
    if body.user_id == me.id {
        return Err(AppError::BadRequest("cannot open a chat with yourself".into()));
    }
    let peer = state
        .users
        .get(&body.user_id)
        .ok_or_else(|| AppError::NotFound(format!("user {} not found", body.user_id)))?;

    if let Some(chat) = state.db.chat_between(&me.id, &peer.id).await {
        return Ok(Json(chat));
    }
    if requires_request(me.role, peer.role) {
        return Err(AppError::RequestRequired(format!(
            "{} must accept a message request first",
            peer.name
        )));
    }

    let chat = state.db.open_chat(&me.id, &peer.id).await;
    tracing::info!("{} opened chat {} with {}", me.id, chat.id, peer.id);
    Ok(Json(chat))
}

/// Send a message (POST /api/chat/{chat_id}/message)
///
/// Both participants receive `newMessage`; the sender's own clients
/// de-duplicate it against the response.
pub async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(chat_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<Message>, AppError> {
    let content = body.content.trim().to_string();
    if content.is_empty() && body.attachments.is_empty() {
        return Err(AppError::BadRequest("message is empty".into()));
    }

    let (message, participants) = state
        .db
        .append_message(&chat_id, &me.id, content, body.attachments, Utc::now())
        .await?;
    tracing::debug!("{} sent {} to chat {}", me.id, message.id, chat_id);

    state
        .hub
        .emit_to_all(
            &participants,
            ServerEvent::NewMessage {
                chat_id,
                message: message.clone(),
            },
        )
        .await;
    Ok(Json(message))
}

/// The chat directory without the caller (GET /api/chat/users)
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Json<Vec<ChatUser>> {
    let users = state
        .users
        .all()
        .iter()
        .filter(|u| u.id != me.id)
        .cloned()
        .collect();
    Json(users)
}
