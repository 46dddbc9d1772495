//! Socket protocol between the chat backend and its clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Query parameter carrying the session token on the socket upgrade request.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Path of the socket endpoint, relative to the server root (not the `/api` base).
pub const SOCKET_PATH: &str = "/socket";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }
}

/// Client → server control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Register this connection so the server can address the user individually.
    Join { user_id: String },
}

/// Server → client events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    NewMessage {
        chat_id: String,
        message: Message,
    },
    NewMessageRequest {
        request_id: String,
        from: String,
    },
    MessageRequestAccepted {
        request_id: String,
        chat_id: String,
    },
    MessageRequestRejected {
        request_id: String,
    },
    /// Pushed by the ticket screens' backend; opaque to the chat core.
    NewTicket(serde_json::Value),
    /// Pushed by the leave screens' backend; opaque to the chat core.
    NewLeaveRequest(serde_json::Value),
    /// `reader_id` fetched the history of `chat_id`.
    MessagesRead {
        chat_id: String,
        reader_id: String,
    },
    PresenceUpdate {
        user_id: String,
        online: bool,
    },
    /// Presence snapshot sent right after `join`.
    OnlineUsers {
        user_ids: Vec<String>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMessage { .. } => "newMessage",
            ServerEvent::NewMessageRequest { .. } => "newMessageRequest",
            ServerEvent::MessageRequestAccepted { .. } => "messageRequestAccepted",
            ServerEvent::MessageRequestRejected { .. } => "messageRequestRejected",
            ServerEvent::NewTicket(_) => "newTicket",
            ServerEvent::NewLeaveRequest(_) => "newLeaveRequest",
            ServerEvent::MessagesRead { .. } => "messagesRead",
            ServerEvent::PresenceUpdate { .. } => "presenceUpdate",
            ServerEvent::OnlineUsers { .. } => "onlineUsers",
            ServerEvent::Error { .. } => "error",
        }
    }
}
