//! Shared data models for the corpchat messaging core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identity ---

/// Portal role of a user. Boss and HR are privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Boss,
    Hr,
    Employee,
}

impl Role {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Boss | Role::Hr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Boss => "boss",
            Role::Hr => "hr",
            Role::Employee => "employee",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from` must get a message request accepted before chatting with `to`.
pub fn requires_request(from: Role, to: Role) -> bool {
    !from.is_privileged() && to.is_privileged()
}

/// Authenticated session, owned by the login flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub user_id: String,
    pub role: Role,
    pub auth_token: String,
}

/// Entry of the chat user directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    pub id: String,
    pub name: String,
    pub role: Role,
}

// --- Objects ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
}

impl AttachmentKind {
    /// `Image` when the declared content type or the file name's extension
    /// names an image type.
    pub fn detect(name: &str, content_type: Option<&str>) -> Self {
        let declared = content_type.and_then(|ct| ct.parse::<mime_guess::Mime>().ok());
        let guessed = mime_guess::from_path(name).first();
        let is_image = declared
            .iter()
            .chain(guessed.iter())
            .any(|m| m.type_() == mime_guess::mime::IMAGE);
        if is_image {
            AttachmentKind::Image
        } else {
            AttachmentKind::File
        }
    }
}

/// Infers the MIME type from a filename extension.
pub fn guess_mime(name: &str) -> Option<String> {
    mime_guess::from_path(name)
        .first()
        .map(|m| m.essence_str().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// --- Messaging ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
    /// Append-only set of reader ids.
    #[serde(default)]
    pub read_by: Vec<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    /// Ordering key: creation time, server id as tie-break.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }

    /// Record a reader. Returns false if it was already recorded.
    pub fn mark_read_by(&mut self, reader: &str) -> bool {
        if self.read_by.iter().any(|r| r == reader) {
            return false;
        }
        self.read_by.push(reader.to_string());
        true
    }

    pub fn is_read_by(&self, reader: &str) -> bool {
        self.read_by.iter().any(|r| r == reader)
    }
}

/// A private one-to-one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub participant_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        self.participant_ids
            .iter()
            .find(|p| p.as_str() != user_id)
            .map(String::as_str)
    }

    /// True if this conversation is between `a` and `b`, in either order.
    pub fn involves(&self, a: &str, b: &str) -> bool {
        self.participant_ids.iter().any(|p| p == a) && self.participant_ids.iter().any(|p| p == b)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_message.as_ref().map(|m| m.created_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

// --- Paging ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub next_cursor: Option<String>,
    pub prev_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub page: PageInfo,
}

/// Response of `GET /chat/:id`: the conversation plus a newest-last page of history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub chat: Conversation,
    pub messages: PagedResponse<Message>,
}

// --- Request/Response Types ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPrivateChatRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequestBody {
    pub to: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of accepting or rejecting a message request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestDecision {
    pub request: MessageRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Conversation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadCount {
    pub count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "c1".to_string(),
            sender_id: "u1".to_string(),
            content: "hi".to_string(),
            attachments: vec![],
            created_at: DateTime::from_timestamp(secs, 0).unwrap(),
            read_by: vec![],
            deleted: false,
        }
    }

    #[test]
    fn employee_needs_request_for_privileged_roles_only() {
        assert!(requires_request(Role::Employee, Role::Boss));
        assert!(requires_request(Role::Employee, Role::Hr));
        assert!(!requires_request(Role::Employee, Role::Employee));
        assert!(!requires_request(Role::Boss, Role::Employee));
        assert!(!requires_request(Role::Hr, Role::Boss));
    }

    #[test]
    fn sort_key_breaks_ties_by_id() {
        let a = message("a", 10);
        let b = message("b", 10);
        let c = message("0", 11);
        assert!(a.sort_key() < b.sort_key());
        assert!(b.sort_key() < c.sort_key());
    }

    #[test]
    fn read_by_is_append_only_set() {
        let mut m = message("a", 1);
        assert!(m.mark_read_by("u2"));
        assert!(!m.mark_read_by("u2"));
        assert_eq!(m.read_by, vec!["u2".to_string()]);
    }

    #[test]
    fn conversation_peer_and_involves() {
        let chat = Conversation {
            id: "c1".into(),
            participant_ids: vec!["boss".into(), "emp".into()],
            last_message: None,
            unread_count: 0,
        };
        assert_eq!(chat.peer_of("boss"), Some("emp"));
        assert!(chat.involves("emp", "boss"));
        assert!(!chat.involves("emp", "hr"));
    }

    #[test]
    fn attachment_uses_type_field_on_the_wire() {
        let att = Attachment {
            name: "a.png".into(),
            url: "/uploads/a.png".into(),
            kind: AttachmentKind::Image,
            size: None,
        };
        let json = serde_json::to_value(&att).unwrap();
        assert_eq!(json["type"], "image");
        assert!(json.get("size").is_none());
    }

    #[test]
    fn attachment_kind_from_type_or_name() {
        assert_eq!(AttachmentKind::detect("x", Some("image/png")), AttachmentKind::Image);
        assert_eq!(AttachmentKind::detect("photo.JPG", None), AttachmentKind::Image);
        assert_eq!(AttachmentKind::detect("logo.svg", None), AttachmentKind::Image);
        assert_eq!(
            AttachmentKind::detect("scan.tiff", Some("application/octet-stream")),
            AttachmentKind::Image
        );
        assert_eq!(AttachmentKind::detect("a.pdf", Some("application/pdf")), AttachmentKind::File);
        assert_eq!(AttachmentKind::detect("notes", Some("not a mime")), AttachmentKind::File);

        assert_eq!(guess_mime("logo.svg").as_deref(), Some("image/svg+xml"));
        assert_eq!(guess_mime("report.pdf").as_deref(), Some("application/pdf"));
        assert_eq!(guess_mime("README"), None);
    }
}
