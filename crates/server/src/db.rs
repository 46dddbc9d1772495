//! In-memory chat storage.
//!
//! Everything lives behind one lock so that accepting a request and creating
//! the conversation it unlocks happen as a single step.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use corpchat_shared::{
    Attachment, Conversation, GateError, Message, MessageRequest, PageInfo, PagedResponse,
    RequestBook,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone)]
struct ChatRecord {
    id: String,
    participants: [String; 2],
}

impl ChatRecord {
    fn has(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    fn is_between(&self, a: &str, b: &str) -> bool {
        self.has(a) && self.has(b)
    }
}

#[derive(Debug, Default)]
struct DbInner {
    chats: HashMap<String, ChatRecord>,
    /// Per chat, ascending by `Message::sort_key`.
    messages: HashMap<String, Vec<Message>>,
    requests: RequestBook,
    leave_unread: HashMap<String, u32>,
}

impl DbInner {
    fn chat_between(&self, a: &str, b: &str) -> Option<&ChatRecord> {
        self.chats.values().find(|c| c.is_between(a, b))
    }

    fn get_or_create_chat(&mut self, a: &str, b: &str) -> ChatRecord {
        if let Some(chat) = self.chat_between(a, b) {
            return chat.clone();
        }
        let chat = ChatRecord {
            id: Uuid::new_v4().to_string(),
            participants: [a.to_string(), b.to_string()],
        };
        tracing::debug!("created chat {} between {} and {}", chat.id, a, b);
        self.chats.insert(chat.id.clone(), chat.clone());
        self.messages.insert(chat.id.clone(), Vec::new());
        chat
    }

    fn member_chat(&self, chat_id: &str, user_id: &str) -> Result<&ChatRecord, AppError> {
        let chat = self
            .chats
            .get(chat_id)
            .ok_or_else(|| AppError::NotFound(format!("chat {chat_id} not found")))?;
        if !chat.has(user_id) {
            return Err(AppError::Forbidden(format!(
                "{user_id} is not a participant of chat {chat_id}"
            )));
        }
        Ok(chat)
    }

    /// The conversation as `viewer` sees it.
    fn view(&self, chat: &ChatRecord, viewer: &str) -> Conversation {
        let messages = self.messages.get(&chat.id);
        let unread = messages
            .into_iter()
            .flatten()
            .filter(|m| m.sender_id != viewer && !m.is_read_by(viewer))
            .count();
        Conversation {
            id: chat.id.clone(),
            participant_ids: chat.participants.to_vec(),
            last_message: messages.and_then(|m| m.last()).cloned(),
            unread_count: u32::try_from(unread).unwrap_or(u32::MAX),
        }
    }
}

#[derive(Debug, Default)]
pub struct ChatDb {
    inner: RwLock<DbInner>,
}

impl ChatDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversations `user_id` takes part in, most recent activity first.
    pub async fn chats_for(&self, user_id: &str) -> Vec<Conversation> {
        let inner = self.inner.read().await;
        let mut chats: Vec<Conversation> = inner
            .chats
            .values()
            .filter(|c| c.has(user_id))
            .map(|c| inner.view(c, user_id))
            .collect();
        chats.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.id.cmp(&b.id))
        });
        chats
    }

    pub async fn conversation(&self, chat_id: &str, viewer: &str) -> Result<Conversation, AppError> {
        let inner = self.inner.read().await;
        let chat = inner.member_chat(chat_id, viewer)?;
        Ok(inner.view(chat, viewer))
    }

    pub async fn chat_between(&self, a: &str, b: &str) -> Option<Conversation> {
        let inner = self.inner.read().await;
        inner.chat_between(a, b).map(|c| inner.view(c, a))
    }

    /// Return the conversation between `a` and `b`, creating it if needed.
    pub async fn open_chat(&self, a: &str, b: &str) -> Conversation {
        let mut inner = self.inner.write().await;
        let chat = inner.get_or_create_chat(a, b);
        inner.view(&chat, a)
    }

    /// A newest-last page of history ending just before `before`.
    pub async fn history(
        &self,
        chat_id: &str,
        viewer: &str,
        before: Option<&str>,
        limit: Option<usize>,
    ) -> Result<PagedResponse<Message>, AppError> {
        let inner = self.inner.read().await;
        inner.member_chat(chat_id, viewer)?;
        let all = inner.messages.get(chat_id).map(Vec::as_slice).unwrap_or(&[]);

        let end = match before {
            Some(cursor) => all
                .iter()
                .position(|m| m.id == cursor)
                .ok_or_else(|| AppError::BadRequest(format!("unknown cursor {cursor}")))?,
            None => all.len(),
        };
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let start = end.saturating_sub(limit);
        let items = all[start..end].to_vec();

        let prev_cursor = (start > 0).then(|| all[start].id.clone());
        Ok(PagedResponse {
            items,
            page: PageInfo {
                next_cursor: None,
                prev_cursor,
            },
        })
    }

    /// Record `reader` on every peer message of the chat. Returns true if
    /// anything changed.
    pub async fn mark_read(&self, chat_id: &str, reader: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.write().await;
        inner.member_chat(chat_id, reader)?;
        let mut changed = false;
        for message in inner.messages.entry(chat_id.to_string()).or_default() {
            if message.sender_id != reader {
                changed |= message.mark_read_by(reader);
            }
        }
        Ok(changed)
    }

    /// Store a message and return it with its server-assigned id, plus the
    /// participant ids.
    pub async fn append_message(
        &self,
        chat_id: &str,
        sender: &str,
        content: String,
        attachments: Vec<Attachment>,
        now: DateTime<Utc>,
    ) -> Result<(Message, Vec<String>), AppError> {
        let mut inner = self.inner.write().await;
        let participants = inner.member_chat(chat_id, sender)?.participants.to_vec();

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: chat_id.to_string(),
            sender_id: sender.to_string(),
            content,
            attachments,
            created_at: now,
            read_by: vec![],
            deleted: false,
        };
        let messages = inner.messages.entry(chat_id.to_string()).or_default();
        let at = messages.partition_point(|m| m.sort_key() <= message.sort_key());
        messages.insert(at, message.clone());
        Ok((message, participants))
    }

    // --- Message requests ---

    pub async fn create_request(
        &self,
        from: &str,
        to: &str,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<MessageRequest, GateError> {
        let mut inner = self.inner.write().await;
        if inner.chat_between(from, to).is_some() {
            return Err(GateError::ConversationExists {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        inner.requests.create(from, to, message, now)
    }

    pub async fn incoming_requests(&self, to: &str) -> Vec<MessageRequest> {
        self.inner.read().await.requests.incoming(to)
    }

    pub async fn outgoing_requests(&self, from: &str) -> Vec<MessageRequest> {
        self.inner.read().await.requests.outgoing(from)
    }

    /// Accept the request and return it with the conversation it unlocks,
    /// as seen by the accepting user.
    pub async fn accept_request(
        &self,
        request_id: &str,
        actor: &str,
    ) -> Result<(MessageRequest, Conversation), GateError> {
        let mut inner = self.inner.write().await;
        let request = inner.requests.accept(request_id, actor)?;
        let chat = inner.get_or_create_chat(&request.to, &request.from);
        let view = inner.view(&chat, actor);
        Ok((request, view))
    }

    pub async fn reject_request(
        &self,
        request_id: &str,
        actor: &str,
    ) -> Result<MessageRequest, GateError> {
        self.inner.write().await.requests.reject(request_id, actor)
    }

    // --- Leave collaborator badge ---

    pub async fn leave_unread(&self, user_id: &str) -> u32 {
        self.inner
            .read()
            .await
            .leave_unread
            .get(user_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn bump_leave_unread(&self, user_id: &str) -> u32 {
        let mut inner = self.inner.write().await;
        let count = inner.leave_unread.entry(user_id.to_string()).or_default();
        *count = count.saturating_add(1);
        *count
    }

    pub async fn clear_leave_unread(&self, user_id: &str) {
        self.inner.write().await.leave_unread.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use corpchat_shared::RequestStatus;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn chat_with_messages(db: &ChatDb, count: i64) -> String {
        let chat = db.open_chat("boss", "emp").await;
        for i in 0..count {
            let sender = if i % 2 == 0 { "emp" } else { "boss" };
            db.append_message(&chat.id, sender, format!("m{i}"), vec![], at(i))
                .await
                .unwrap();
        }
        chat.id
    }

    #[tokio::test]
    async fn open_chat_is_symmetric() {
        let db = ChatDb::new();
        let a = db.open_chat("boss", "emp").await;
        let b = db.open_chat("emp", "boss").await;
        assert_eq!(a.id, b.id);
        assert_eq!(db.chats_for("emp").await.len(), 1);
        assert!(db.chats_for("hr").await.is_empty());
    }

    #[tokio::test]
    async fn history_pages_backwards() {
        let db = ChatDb::new();
        let chat = chat_with_messages(&db, 5).await;

        let newest = db.history(&chat, "boss", None, Some(2)).await.unwrap();
        let contents: Vec<_> = newest.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m3", "m4"]);
        let cursor = newest.page.prev_cursor.unwrap();
        assert_eq!(cursor, newest.items[0].id);

        let older = db.history(&chat, "boss", Some(&cursor), Some(2)).await.unwrap();
        let contents: Vec<_> = older.items.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2"]);

        let oldest = db
            .history(&chat, "boss", older.page.prev_cursor.as_deref(), Some(2))
            .await
            .unwrap();
        assert_eq!(oldest.items.len(), 1);
        assert_eq!(oldest.page.prev_cursor, None);
    }

    #[tokio::test]
    async fn outsiders_cannot_read_or_write() {
        let db = ChatDb::new();
        let chat = chat_with_messages(&db, 1).await;
        assert!(matches!(
            db.history(&chat, "hr", None, None).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            db.append_message(&chat, "hr", "hi".into(), vec![], at(9)).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            db.history("nope", "boss", None, None).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unread_counts_follow_reads() {
        let db = ChatDb::new();
        let chat = chat_with_messages(&db, 3).await;

        // emp sent m0 and m2, boss sent m1.
        assert_eq!(db.conversation(&chat, "boss").await.unwrap().unread_count, 2);
        assert_eq!(db.conversation(&chat, "emp").await.unwrap().unread_count, 1);

        assert!(db.mark_read(&chat, "boss").await.unwrap());
        assert!(!db.mark_read(&chat, "boss").await.unwrap());
        assert_eq!(db.conversation(&chat, "boss").await.unwrap().unread_count, 0);
        let history = db.history(&chat, "emp", None, None).await.unwrap();
        assert!(history.items[0].is_read_by("boss"));
        assert!(!history.items[1].is_read_by("boss"));
    }

    #[tokio::test]
    async fn accepting_creates_the_conversation_once() {
        let db = ChatDb::new();
        let request = db
            .create_request("emp", "boss", Some("hello".into()), at(1))
            .await
            .unwrap();
        assert_eq!(db.incoming_requests("boss").await.len(), 1);

        let (accepted, chat) = db.accept_request(&request.id, "boss").await.unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert!(chat.involves("emp", "boss"));
        assert!(db.incoming_requests("boss").await.is_empty());
        assert_eq!(db.chat_between("emp", "boss").await.unwrap().id, chat.id);

        // Once the conversation exists there is nothing left to ask for.
        let again = db.create_request("emp", "boss", None, at(2)).await.unwrap_err();
        assert!(matches!(again, GateError::ConversationExists { .. }));
        assert_eq!(db.chats_for("boss").await.len(), 1);
    }

    #[tokio::test]
    async fn outgoing_lists_only_pending_requests_of_the_sender() {
        let db = ChatDb::new();
        let to_boss = db.create_request("emp", "boss", None, at(1)).await.unwrap();
        let to_hr = db.create_request("emp", "hr", None, at(2)).await.unwrap();
        db.create_request("emp2", "boss", None, at(3)).await.unwrap();

        let ids: Vec<_> = db.outgoing_requests("emp").await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![to_boss.id.clone(), to_hr.id.clone()]);

        db.reject_request(&to_boss.id, "boss").await.unwrap();
        let ids: Vec<_> = db.outgoing_requests("emp").await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![to_hr.id]);
    }

    #[tokio::test]
    async fn leave_badge_counter() {
        let db = ChatDb::new();
        assert_eq!(db.leave_unread("hr").await, 0);
        db.bump_leave_unread("hr").await;
        assert_eq!(db.bump_leave_unread("hr").await, 2);
        db.clear_leave_unread("hr").await;
        assert_eq!(db.leave_unread("hr").await, 0);
    }
}
