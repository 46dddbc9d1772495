//! In-memory [`ChatApi`] double shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use corpchat_shared::{
    ApiError, Attachment, ChatHistory, ChatUser, Conversation, CreateMessageRequestBody, Message,
    MessageRequest, PageInfo, PagedResponse, ProblemDetails, RequestDecision, RequestStatus,
    SendMessageRequest,
};
use tokio::sync::Notify;

use crate::api_client::ChatApi;
use crate::uploader::LocalFile;

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default() + Duration::seconds(secs)
}

pub(crate) fn message(id: &str, chat_id: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: chat_id.to_string(),
        sender_id: sender.to_string(),
        content: format!("message {id}"),
        attachments: vec![],
        created_at: at(secs),
        read_by: vec![],
        deleted: false,
    }
}

pub(crate) fn conversation(id: &str, a: &str, b: &str) -> Conversation {
    Conversation {
        id: id.to_string(),
        participant_ids: vec![a.to_string(), b.to_string()],
        last_message: None,
        unread_count: 0,
    }
}

pub(crate) fn http_error(status: u16, problem: ProblemDetails) -> ApiError {
    ApiError::Http {
        status,
        body: serde_json::to_string(&problem).unwrap_or_default(),
    }
}

/// Scriptable backend acting as user `me`.
pub(crate) struct FakeApi {
    pub me: String,
    pub chats: Mutex<Vec<Conversation>>,
    pub history: Mutex<HashMap<String, Vec<Message>>>,
    pub incoming: Mutex<Vec<MessageRequest>>,
    /// Every request filed through `create_request`.
    pub outgoing: Mutex<Vec<MessageRequest>>,
    pub users: Mutex<Vec<ChatUser>>,
    pub page_size: usize,
    calls: Mutex<Vec<String>>,
    pub send_error: Mutex<Option<ApiError>>,
    pub create_error: Mutex<Option<ApiError>>,
    pub decision_error: Mutex<Option<ApiError>>,
    pub open_error: Mutex<Option<ApiError>>,
    pub failing_uploads: Mutex<HashSet<String>>,
    /// When set, `send_message` parks until notified.
    pub send_gate: Mutex<Option<Arc<Notify>>>,
    /// When set, accept/reject park until notified.
    pub decision_gate: Mutex<Option<Arc<Notify>>>,
    next_id: Mutex<u64>,
}

impl FakeApi {
    pub fn new(me: &str) -> Self {
        Self {
            me: me.to_string(),
            chats: Mutex::default(),
            history: Mutex::default(),
            incoming: Mutex::default(),
            outgoing: Mutex::default(),
            users: Mutex::default(),
            page_size: 50,
            calls: Mutex::default(),
            send_error: Mutex::default(),
            create_error: Mutex::default(),
            decision_error: Mutex::default(),
            open_error: Mutex::default(),
            failing_uploads: Mutex::default(),
            send_gate: Mutex::default(),
            decision_gate: Mutex::default(),
            next_id: Mutex::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn add_chat(&self, chat: Conversation) {
        self.chats.lock().unwrap().push(chat);
    }

    pub fn add_history(&self, chat_id: &str, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .entry(chat_id.to_string())
            .or_default()
            .extend(messages);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self, prefix: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        format!("{prefix}-{next}")
    }

    async fn wait(gate: &Mutex<Option<Arc<Notify>>>) {
        let notify = gate.lock().unwrap().clone();
        if let Some(notify) = notify {
            notify.notified().await;
        }
    }

    /// Resolve a filed request on the backend without telling the client.
    pub fn resolve_outgoing(&self, request_id: &str, status: RequestStatus) {
        for request in self.outgoing.lock().unwrap().iter_mut() {
            if request.id == request_id {
                request.status = status;
            }
        }
    }

    fn decide(&self, request_id: &str, status: RequestStatus) -> Result<RequestDecision, ApiError> {
        if let Some(err) = self.decision_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut incoming = self.incoming.lock().unwrap();
        let pos = incoming
            .iter()
            .position(|r| r.id == request_id)
            .ok_or_else(|| http_error(404, ProblemDetails::not_found("no such request")))?;
        let mut request = incoming.remove(pos);
        request.status = status;

        let chat = (status == RequestStatus::Accepted).then(|| {
            let chat = conversation(&format!("chat-{}", request.from), &request.from, &self.me);
            self.chats.lock().unwrap().push(chat.clone());
            chat
        });
        Ok(RequestDecision { request, chat })
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_chats(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record("list_chats".into());
        Ok(self.chats.lock().unwrap().clone())
    }

    async fn chat_history(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<ChatHistory, ApiError> {
        self.record(format!("chat_history {chat_id} {}", before.unwrap_or("-")));
        let chat = self
            .chats
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
            .ok_or_else(|| http_error(404, ProblemDetails::not_found("no such chat")))?;

        let mut all = self
            .history
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .unwrap_or_default();
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let end = match before {
            Some(cursor) => all.iter().position(|m| m.id == cursor).unwrap_or(all.len()),
            None => all.len(),
        };
        let start = end.saturating_sub(self.page_size);
        let items = all[start..end].to_vec();
        let prev_cursor = (start > 0).then(|| items[0].id.clone());

        Ok(ChatHistory {
            chat,
            messages: PagedResponse {
                items,
                page: PageInfo {
                    next_cursor: None,
                    prev_cursor,
                },
            },
        })
    }

    async fn open_private_chat(&self, user_id: &str) -> Result<Conversation, ApiError> {
        self.record(format!("open_private_chat {user_id}"));
        if let Some(err) = self.open_error.lock().unwrap().clone() {
            return Err(err);
        }
        let mut chats = self.chats.lock().unwrap();
        if let Some(existing) = chats.iter().find(|c| c.involves(&self.me, user_id)) {
            return Ok(existing.clone());
        }
        let chat = conversation(&format!("chat-{user_id}"), &self.me, user_id);
        chats.push(chat.clone());
        Ok(chat)
    }

    async fn send_message(
        &self,
        chat_id: &str,
        body: &SendMessageRequest,
    ) -> Result<Message, ApiError> {
        self.record(format!("send_message {chat_id}"));
        Self::wait(&self.send_gate).await;
        if let Some(err) = self.send_error.lock().unwrap().clone() {
            return Err(err);
        }
        let message = Message {
            id: self.next_id("srv"),
            conversation_id: chat_id.to_string(),
            sender_id: self.me.clone(),
            content: body.content.clone(),
            attachments: body.attachments.clone(),
            created_at: Utc::now(),
            read_by: vec![],
            deleted: false,
        };
        self.add_history(chat_id, vec![message.clone()]);
        Ok(message)
    }

    async fn upload(&self, file: &LocalFile) -> Result<Attachment, ApiError> {
        self.record(format!("upload {}", file.name));
        if self.failing_uploads.lock().unwrap().contains(&file.name) {
            return Err(http_error(500, ProblemDetails::internal_error("storage unavailable")));
        }
        Ok(Attachment {
            name: file.name.clone(),
            url: format!("/uploads/{}", file.name),
            kind: file.kind(),
            size: Some(file.bytes.len() as u64),
        })
    }

    async fn list_users(&self) -> Result<Vec<ChatUser>, ApiError> {
        self.record("list_users".into());
        Ok(self.users.lock().unwrap().clone())
    }

    async fn incoming_requests(&self) -> Result<Vec<MessageRequest>, ApiError> {
        self.record("incoming_requests".into());
        Ok(self.incoming.lock().unwrap().clone())
    }

    async fn outgoing_requests(&self) -> Result<Vec<MessageRequest>, ApiError> {
        self.record("outgoing_requests".into());
        let outgoing = self.outgoing.lock().unwrap();
        Ok(outgoing
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect())
    }

    async fn create_request(
        &self,
        body: &CreateMessageRequestBody,
    ) -> Result<MessageRequest, ApiError> {
        self.record(format!("create_request {}", body.to));
        if let Some(err) = self.create_error.lock().unwrap().clone() {
            return Err(err);
        }
        let request = MessageRequest {
            id: self.next_id("req"),
            from: self.me.clone(),
            to: body.to.clone(),
            message: body.message.clone(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
        };
        self.outgoing.lock().unwrap().push(request.clone());
        Ok(request)
    }

    async fn accept_request(&self, request_id: &str) -> Result<RequestDecision, ApiError> {
        self.record(format!("accept_request {request_id}"));
        Self::wait(&self.decision_gate).await;
        self.decide(request_id, RequestStatus::Accepted)
    }

    async fn reject_request(&self, request_id: &str) -> Result<RequestDecision, ApiError> {
        self.record(format!("reject_request {request_id}"));
        Self::wait(&self.decision_gate).await;
        self.decide(request_id, RequestStatus::Rejected)
    }
}
