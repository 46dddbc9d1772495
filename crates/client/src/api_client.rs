//! HTTP API client for the chat REST collaborator.

use async_trait::async_trait;
use corpchat_shared::{
    ApiError, Attachment, ChatHistory, ChatUser, Conversation, CreateMessageRequestBody, Message,
    MessageRequest, OpenPrivateChatRequest, RequestDecision, SendMessageRequest, UnreadCount,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::uploader::LocalFile;

/// The REST surface the messaging core talks to.
///
/// [`ApiClient`] is the production implementation; tests substitute doubles.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /chat`
    async fn list_chats(&self) -> Result<Vec<Conversation>, ApiError>;
    /// `GET /chat/:id`, newest-last page ending before `before` when given.
    async fn chat_history(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<ChatHistory, ApiError>;
    /// `POST /chat/private`
    async fn open_private_chat(&self, user_id: &str) -> Result<Conversation, ApiError>;
    /// `POST /chat/:id/message`
    async fn send_message(
        &self,
        chat_id: &str,
        body: &SendMessageRequest,
    ) -> Result<Message, ApiError>;
    /// `POST /chat/upload`
    async fn upload(&self, file: &LocalFile) -> Result<Attachment, ApiError>;
    /// `GET /chat/users`
    async fn list_users(&self) -> Result<Vec<ChatUser>, ApiError>;
    /// `GET /message-requests`: pending requests addressed to the caller.
    async fn incoming_requests(&self) -> Result<Vec<MessageRequest>, ApiError>;
    /// `GET /message-requests/outgoing`: pending requests filed by the caller.
    async fn outgoing_requests(&self) -> Result<Vec<MessageRequest>, ApiError>;
    /// `POST /message-requests`
    async fn create_request(
        &self,
        body: &CreateMessageRequestBody,
    ) -> Result<MessageRequest, ApiError>;
    /// `PUT /message-requests/:id/accept`
    async fn accept_request(&self, request_id: &str) -> Result<RequestDecision, ApiError>;
    /// `PUT /message-requests/:id/reject`
    async fn reject_request(&self, request_id: &str) -> Result<RequestDecision, ApiError>;
}

/// Bearer-authenticated HTTP client for the portal API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            base_url: String::new(),
            token: None,
        }
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the bearer token sent with every request
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn execute<TRes: DeserializeOwned>(rb: RequestBuilder) -> Result<TRes, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        if text.is_empty() {
            serde_json::from_str("null").map_err(|e| ApiError::Deserialize(e.to_string()))
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
        }
    }

    /// Make an authenticated GET request
    pub async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.get(self.url(path)));
        Self::execute(rb).await
    }

    /// Make an authenticated POST request with JSON body
    pub async fn post_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.post(self.url(path))).json(body);
        Self::execute(rb).await
    }

    /// Make an authenticated PUT request with JSON body
    pub async fn put_json<TReq: Serialize + ?Sized, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        let rb = self.authorize(self.client.put(self.url(path))).json(body);
        Self::execute(rb).await
    }

    /// Unread leave requests, from the leave screens' collaborator endpoint.
    ///
    /// This is the only source for the leave badge; per-conversation chat
    /// counters never feed it.
    pub async fn leave_unread_count(&self) -> Result<u32, ApiError> {
        let count: UnreadCount = self.get_json("/leaves/unread-count").await?;
        Ok(count.count)
    }
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[async_trait]
impl ChatApi for ApiClient {
    async fn list_chats(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get_json("/chat").await
    }

    async fn chat_history(
        &self,
        chat_id: &str,
        before: Option<&str>,
    ) -> Result<ChatHistory, ApiError> {
        let mut path = format!("/chat/{}", encode(chat_id));
        if let Some(before) = before {
            path.push_str(&format!("?before={}", encode(before)));
        }
        self.get_json(&path).await
    }

    async fn open_private_chat(&self, user_id: &str) -> Result<Conversation, ApiError> {
        let body = OpenPrivateChatRequest {
            user_id: user_id.to_string(),
        };
        self.post_json("/chat/private", &body).await
    }

    async fn send_message(
        &self,
        chat_id: &str,
        body: &SendMessageRequest,
    ) -> Result<Message, ApiError> {
        self.post_json(&format!("/chat/{}/message", encode(chat_id)), body)
            .await
    }

    async fn upload(&self, file: &LocalFile) -> Result<Attachment, ApiError> {
        let mut part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.name.clone());
        if let Some(mime) = &file.mime {
            part = part
                .mime_str(mime)
                .map_err(|e| ApiError::Network(format!("invalid mime type {mime}: {e}")))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);
        let rb = self
            .authorize(self.client.post(self.url("/chat/upload")))
            .multipart(form);
        Self::execute(rb).await
    }

    async fn list_users(&self) -> Result<Vec<ChatUser>, ApiError> {
        self.get_json("/chat/users").await
    }

    async fn incoming_requests(&self) -> Result<Vec<MessageRequest>, ApiError> {
        self.get_json("/message-requests").await
    }

    async fn outgoing_requests(&self) -> Result<Vec<MessageRequest>, ApiError> {
        self.get_json("/message-requests/outgoing").await
    }

    async fn create_request(
        &self,
        body: &CreateMessageRequestBody,
    ) -> Result<MessageRequest, ApiError> {
        self.post_json("/message-requests", body).await
    }

    async fn accept_request(&self, request_id: &str) -> Result<RequestDecision, ApiError> {
        let path = format!("/message-requests/{}/accept", encode(request_id));
        self.put_json(&path, &serde_json::json!({})).await
    }

    async fn reject_request(&self, request_id: &str) -> Result<RequestDecision, ApiError> {
        let path = format!("/message-requests/{}/reject", encode(request_id));
        self.put_json(&path, &serde_json::json!({})).await
    }
}
