//! Message request gate: who may talk to whom.
//!
//! An employee has to get a request accepted by a boss or HR user before a
//! conversation opens. Boss and HR users see incoming requests and decide
//! on them; each decision is sent at most once per request from this client.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use corpchat_shared::{
    requires_request, ChatUser, Conversation, CreateMessageRequestBody, MessageRequest,
    RequestDecision, RequestStatus, ServerEvent, SessionIdentity,
};

use crate::api_client::ChatApi;
use crate::error::ChatError;
use crate::stores::ChatStore;

/// How [`MessageRequestGate::start_conversation`] got the user talking.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationStart {
    /// A conversation with the peer was already known.
    Existing(Conversation),
    /// A conversation was opened directly.
    Opened(Conversation),
    /// The peer has to accept this request first.
    Requested(MessageRequest),
}

#[derive(Clone, Copy)]
enum Decision {
    Accept,
    Reject,
}

#[derive(Default)]
struct GateState {
    incoming: Vec<MessageRequest>,
    /// Requests filed by the local user, by id.
    outgoing: HashMap<String, MessageRequest>,
    in_flight: HashSet<String>,
}

pub struct MessageRequestGate {
    api: Arc<dyn ChatApi>,
    store: Arc<ChatStore>,
    session: SessionIdentity,
    state: Mutex<GateState>,
}

impl MessageRequestGate {
    pub fn new(api: Arc<dyn ChatApi>, store: Arc<ChatStore>, session: SessionIdentity) -> Self {
        Self {
            api,
            store,
            session,
            state: Mutex::new(GateState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether accept/reject controls should be shown at all.
    pub fn can_respond(&self) -> bool {
        self.session.role.is_privileged()
    }

    /// Whether talking to `peer` goes through a request.
    pub fn needs_request(&self, peer: &ChatUser) -> bool {
        requires_request(self.session.role, peer.role)
    }

    /// Reload the pending requests addressed to the local user.
    pub async fn refresh_incoming(&self) -> Result<Vec<MessageRequest>, ChatError> {
        let mut requests = self.api.incoming_requests().await?;
        requests.retain(|r| r.status == RequestStatus::Pending);
        self.lock().incoming = requests.clone();
        Ok(requests)
    }

    /// Reload the requests the local user filed that are still pending.
    ///
    /// Local entries the backend no longer lists as pending were answered
    /// while this client missed the event, and are dropped.
    pub async fn refresh_outgoing(&self) -> Result<Vec<MessageRequest>, ChatError> {
        let mut requests = self.api.outgoing_requests().await?;
        requests.retain(|r| r.status == RequestStatus::Pending);
        let mut state = self.lock();
        state.outgoing.retain(|id, r| {
            r.status != RequestStatus::Pending || requests.iter().any(|p| &p.id == id)
        });
        for request in &requests {
            state.outgoing.insert(request.id.clone(), request.clone());
        }
        Ok(requests)
    }

    pub fn incoming(&self) -> Vec<MessageRequest> {
        self.lock().incoming.clone()
    }

    /// Requests filed from this client, newest first.
    pub fn outgoing(&self) -> Vec<MessageRequest> {
        let mut requests: Vec<_> = self.lock().outgoing.values().cloned().collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        requests
    }

    pub fn outgoing_status(&self, request_id: &str) -> Option<RequestStatus> {
        self.lock().outgoing.get(request_id).map(|r| r.status)
    }

    /// Ask `to` for permission to chat.
    pub async fn create_request(
        &self,
        to: &str,
        message: Option<String>,
    ) -> Result<MessageRequest, ChatError> {
        if to == self.session.user_id {
            return Err(ChatError::UnauthorizedAction(
                "cannot send a message request to yourself".into(),
            ));
        }
        // The local copy may be stale; only the backend's pending list counts.
        if self.pending_to(to) {
            self.refresh_outgoing().await?;
            if self.pending_to(to) {
                return Err(ChatError::DuplicateRequest(to.to_string()));
            }
        }

        let body = CreateMessageRequestBody {
            to: to.to_string(),
            message: message.filter(|m| !m.trim().is_empty()),
        };
        let request = self
            .api
            .create_request(&body)
            .await
            .map_err(|e| ChatError::from_api(e, to))?;
        crate::log_info!("message request {} filed to {}", request.id, to);
        self.lock()
            .outgoing
            .insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn pending_to(&self, to: &str) -> bool {
        self.lock()
            .outgoing
            .values()
            .any(|r| r.to == to && r.status == RequestStatus::Pending)
    }

    /// Accept an incoming request. `Ok(None)` if a decision on it is
    /// already in flight.
    pub async fn accept(&self, request_id: &str) -> Result<Option<RequestDecision>, ChatError> {
        self.decide(request_id, Decision::Accept).await
    }

    /// Reject an incoming request. `Ok(None)` if a decision on it is
    /// already in flight.
    pub async fn reject(&self, request_id: &str) -> Result<Option<RequestDecision>, ChatError> {
        self.decide(request_id, Decision::Reject).await
    }

    async fn decide(
        &self,
        request_id: &str,
        decision: Decision,
    ) -> Result<Option<RequestDecision>, ChatError> {
        if !self.can_respond() {
            return Err(ChatError::UnauthorizedAction(format!(
                "{} users cannot respond to message requests",
                self.session.role
            )));
        }
        if !self.lock().in_flight.insert(request_id.to_string()) {
            crate::log_debug!("decision on {} already in flight", request_id);
            return Ok(None);
        }

        let result = match decision {
            Decision::Accept => self.api.accept_request(request_id).await,
            Decision::Reject => self.api.reject_request(request_id).await,
        };

        let mut state = self.lock();
        state.in_flight.remove(request_id);
        let decision = match result {
            Ok(decision) => decision,
            Err(e) => {
                let err = ChatError::from_decision(e, request_id);
                if matches!(err, ChatError::AlreadyResolved(_)) {
                    state.incoming.retain(|r| r.id != request_id);
                }
                return Err(err);
            }
        };
        state.incoming.retain(|r| r.id != request_id);
        drop(state);

        if let Some(chat) = &decision.chat {
            self.store.upsert_conversation(chat.clone());
        }
        crate::log_info!("message request {} {}", request_id, decision.request.status);
        Ok(Some(decision))
    }

    /// Get a conversation going with `peer`.
    ///
    /// Returns the known conversation if there is one. Otherwise the chat is
    /// opened directly, and when the backend insists on a request first (or
    /// the roles already say so and no conversation exists) a request is filed.
    pub async fn start_conversation(
        &self,
        peer: &ChatUser,
        message: Option<String>,
    ) -> Result<ConversationStart, ChatError> {
        if let Some(chat) = self.store.conversation_with(&peer.id) {
            return Ok(ConversationStart::Existing(chat));
        }

        match self.api.open_private_chat(&peer.id).await {
            Ok(chat) => {
                self.store.upsert_conversation(chat.clone());
                Ok(ConversationStart::Opened(chat))
            }
            Err(e) => match ChatError::from_api(e, &peer.id) {
                ChatError::RequestRequired(_) => {
                    let request = self.create_request(&peer.id, message).await?;
                    Ok(ConversationStart::Requested(request))
                }
                ChatError::UnauthorizedAction(_) if self.needs_request(peer) => {
                    let request = self.create_request(&peer.id, message).await?;
                    Ok(ConversationStart::Requested(request))
                }
                other => Err(other),
            },
        }
    }

    /// Fold a socket event into local state. Returns true if anything changed.
    pub fn apply_event(&self, event: &ServerEvent) -> bool {
        let (request_id, status) = match event {
            ServerEvent::MessageRequestAccepted { request_id, .. } => {
                (request_id, RequestStatus::Accepted)
            }
            ServerEvent::MessageRequestRejected { request_id } => {
                (request_id, RequestStatus::Rejected)
            }
            _ => return false,
        };

        let mut state = self.lock();
        let before = state.incoming.len();
        state.incoming.retain(|r| &r.id != request_id);
        let mut changed = state.incoming.len() != before;
        if let Some(request) = state.outgoing.get_mut(request_id) {
            changed |= request.status != status;
            request.status = status;
        }
        changed
    }
}
