//! Message request state machine.
//!
//! Each ordered (from, to) pair moves `NONE -> PENDING -> ACCEPTED | REJECTED`.
//! Terminal states are final for that request; a fresh request may be filed
//! for the same pair once no request is pending.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::models::{MessageRequest, RequestStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("a pending message request from {from} to {to} already exists")]
    DuplicateRequest { from: String, to: String },
    #[error("message request {0} not found")]
    NotFound(String),
    #[error("{actor} may not respond to message request {request_id}")]
    UnauthorizedAction { actor: String, request_id: String },
    #[error("message request {request_id} is already {status}")]
    AlreadyResolved {
        request_id: String,
        status: RequestStatus,
    },
    #[error("cannot send a message request to yourself")]
    SelfRequest,
    #[error("{from} and {to} already have a conversation")]
    ConversationExists { from: String, to: String },
}

/// All message requests known to the backend.
#[derive(Debug, Default)]
pub struct RequestBook {
    requests: HashMap<String, MessageRequest>,
    /// Insertion order, oldest first.
    order: Vec<String>,
}

impl RequestBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a new pending request.
    pub fn create(
        &mut self,
        from: &str,
        to: &str,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<MessageRequest, GateError> {
        if from == to {
            return Err(GateError::SelfRequest);
        }
        if self.pending_between(from, to).is_some() {
            return Err(GateError::DuplicateRequest {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let request = MessageRequest {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            message: message.filter(|m| !m.trim().is_empty()),
            status: RequestStatus::Pending,
            created_at: now,
        };
        self.order.push(request.id.clone());
        self.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Move a pending request to `Accepted`. Only the addressee may do this.
    pub fn accept(&mut self, request_id: &str, actor: &str) -> Result<MessageRequest, GateError> {
        self.resolve(request_id, actor, RequestStatus::Accepted)
    }

    /// Move a pending request to `Rejected`. Only the addressee may do this.
    pub fn reject(&mut self, request_id: &str, actor: &str) -> Result<MessageRequest, GateError> {
        self.resolve(request_id, actor, RequestStatus::Rejected)
    }

    fn resolve(
        &mut self,
        request_id: &str,
        actor: &str,
        outcome: RequestStatus,
    ) -> Result<MessageRequest, GateError> {
        let request = self
            .requests
            .get_mut(request_id)
            .ok_or_else(|| GateError::NotFound(request_id.to_string()))?;

        if request.to != actor {
            return Err(GateError::UnauthorizedAction {
                actor: actor.to_string(),
                request_id: request_id.to_string(),
            });
        }
        if request.status.is_terminal() {
            return Err(GateError::AlreadyResolved {
                request_id: request_id.to_string(),
                status: request.status,
            });
        }

        request.status = outcome;
        Ok(request.clone())
    }

    pub fn get(&self, request_id: &str) -> Option<&MessageRequest> {
        self.requests.get(request_id)
    }

    /// The pending request for the ordered pair, if any.
    pub fn pending_between(&self, from: &str, to: &str) -> Option<&MessageRequest> {
        self.requests
            .values()
            .find(|r| r.from == from && r.to == to && r.status == RequestStatus::Pending)
    }

    /// Pending requests addressed to `to`, oldest first.
    pub fn incoming(&self, to: &str) -> Vec<MessageRequest> {
        self.order
            .iter()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.to == to && r.status == RequestStatus::Pending)
            .cloned()
            .collect()
    }

    /// Pending requests filed by `from`, oldest first.
    pub fn outgoing(&self, from: &str) -> Vec<MessageRequest> {
        self.order
            .iter()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.from == from && r.status == RequestStatus::Pending)
            .cloned()
            .collect()
    }
}
