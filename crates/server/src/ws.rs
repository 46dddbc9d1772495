//! Socket endpoint and per-user event delivery.
//!
//! A connection authenticates with the `token` query parameter, then sends
//! `join { userId }`. Only joined connections receive events. A user counts as
//! online while at least one of their connections is joined.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use corpchat_shared::{ClientCommand, ServerEvent, WsEnvelope};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

type EventSender = mpsc::UnboundedSender<WsEnvelope<ServerEvent>>;

/// Joined connections, by user id.
#[derive(Debug, Default)]
pub struct Hub {
    connections: RwLock<HashMap<String, HashMap<Uuid, EventSender>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns true if it is the user's first.
    async fn track(&self, user_id: &str, conn_id: Uuid, tx: EventSender) -> bool {
        let mut connections = self.connections.write().await;
        let user_connections = connections.entry(user_id.to_string()).or_default();
        let was_first = user_connections.is_empty();
        user_connections.insert(conn_id, tx);
        was_first
    }

    /// Remove a connection. Returns true if it was the user's last.
    async fn untrack(&self, user_id: &str, conn_id: Uuid) -> bool {
        let mut connections = self.connections.write().await;
        if let Some(user_connections) = connections.get_mut(user_id) {
            if user_connections.remove(&conn_id).is_some() && user_connections.is_empty() {
                connections.remove(user_id);
                return true;
            }
        }
        false
    }

    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Deliver `event` to every joined connection of `user_id`. Returns the
    /// number of connections reached.
    pub async fn emit_to(&self, user_id: &str, event: ServerEvent) -> usize {
        let connections = self.connections.read().await;
        let Some(user_connections) = connections.get(user_id) else {
            return 0;
        };
        let envelope = WsEnvelope::new(event);
        user_connections
            .values()
            .filter(|tx| tx.send(envelope.clone()).is_ok())
            .count()
    }

    /// Deliver `event` to each of `user_ids`.
    pub async fn emit_to_all(&self, user_ids: &[String], event: ServerEvent) {
        for user_id in user_ids {
            self.emit_to(user_id, event.clone()).await;
        }
    }

    /// Deliver `event` to every joined connection.
    pub async fn broadcast(&self, event: ServerEvent) {
        let connections = self.connections.read().await;
        let envelope = WsEnvelope::new(event);
        for tx in connections.values().flat_map(HashMap::values) {
            let _ = tx.send(envelope.clone());
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing token".into()))?;
    let user_id = state
        .users
        .authenticate(&token)
        .map(|u| u.id.clone())
        .ok_or_else(|| {
            tracing::warn!("socket upgrade with unknown token");
            AppError::Unauthorized("unknown or expired token".into())
        })?;

    tracing::info!("socket connection authenticated for {}", user_id);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, state)))
}

async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<WsEnvelope<ServerEvent>>();

    let send_task = tokio::spawn(async move {
        while let Some(event) = forward_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to encode {}: {}", event.payload.name(), e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut joined = false;
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<WsEnvelope<ClientCommand>>(&text) {
                    Ok(envelope) => {
                        handle_command(
                            envelope.payload,
                            &user_id,
                            conn_id,
                            &mut joined,
                            &forward_tx,
                            &state,
                        )
                        .await
                    }
                    Err(e) => {
                        tracing::debug!("unparseable command from {}: {}", user_id, e);
                        let _ = forward_tx.send(WsEnvelope::new(ServerEvent::Error {
                            code: "bad_command".into(),
                            message: e.to_string(),
                        }));
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    if joined && state.hub.untrack(&user_id, conn_id).await {
        tracing::info!("{} went offline", user_id);
        state
            .hub
            .broadcast(ServerEvent::PresenceUpdate {
                user_id: user_id.clone(),
                online: false,
            })
            .await;
    }
    drop(forward_tx);
    send_task.abort();
    tracing::debug!("socket {} of {} closed", conn_id, user_id);
}

async fn handle_command(
    command: ClientCommand,
    user_id: &str,
    conn_id: Uuid,
    joined: &mut bool,
    forward_tx: &EventSender,
    state: &AppState,
) {
    match command {
        ClientCommand::Join { user_id: claimed } => {
            if claimed != user_id {
                tracing::warn!("{} tried to join as {}", user_id, claimed);
                let _ = forward_tx.send(WsEnvelope::new(ServerEvent::Error {
                    code: "forbidden".into(),
                    message: format!("cannot join as {claimed}"),
                }));
                return;
            }
            if *joined {
                return;
            }
            *joined = true;

            let first = state.hub.track(user_id, conn_id, forward_tx.clone()).await;
            let _ = forward_tx.send(WsEnvelope::new(ServerEvent::OnlineUsers {
                user_ids: state.hub.online_users().await,
            }));
            if first {
                tracing::info!("{} came online", user_id);
                state
                    .hub
                    .broadcast(ServerEvent::PresenceUpdate {
                        user_id: user_id.to_string(),
                        online: true,
                    })
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(user: &str) -> ServerEvent {
        ServerEvent::PresenceUpdate {
            user_id: user.into(),
            online: true,
        }
    }

    #[tokio::test]
    async fn first_and_last_connection_drive_presence() {
        let hub = Hub::new();
        let (tx1, _rx1) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(hub.track("emp", a, tx1).await);
        assert!(!hub.track("emp", b, tx2).await);
        assert_eq!(hub.online_users().await, ["emp"]);

        assert!(!hub.untrack("emp", a).await);
        assert_eq!(hub.online_users().await, ["emp"]);
        assert!(hub.untrack("emp", b).await);
        assert!(hub.online_users().await.is_empty());
        // Unknown connections are ignored.
        assert!(!hub.untrack("emp", b).await);
    }

    #[tokio::test]
    async fn emit_reaches_every_connection_of_the_user_only() {
        let hub = Hub::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();
        hub.track("emp", Uuid::new_v4(), tx1).await;
        hub.track("emp", Uuid::new_v4(), tx2).await;
        hub.track("boss", Uuid::new_v4(), tx3).await;

        assert_eq!(hub.emit_to("emp", presence("hr")).await, 2);
        assert_eq!(rx1.try_recv().unwrap().payload, presence("hr"));
        assert_eq!(rx2.try_recv().unwrap().payload, presence("hr"));
        assert!(rx3.try_recv().is_err());
        assert_eq!(hub.emit_to("nobody", presence("hr")).await, 0);

        hub.broadcast(presence("x")).await;
        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }
}
