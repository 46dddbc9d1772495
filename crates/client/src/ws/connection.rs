//! A single socket connection with state reporting and auto-reconnect.

use std::sync::Arc;
use std::time::Duration;

use corpchat_shared::{ClientCommand, ServerEvent, WsEnvelope};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::manager::WsEvent;
use crate::error::ChatError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state for the session socket
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Handle for sending commands through the session socket.
///
/// Commands sent while the transport is down are queued and flushed on the
/// next successful connect.
#[derive(Clone, Debug)]
pub struct WsHandle {
    sender: UnboundedSender<WsEnvelope<ClientCommand>>,
    pub user_id: String,
    pub(crate) generation: u64,
}

impl WsHandle {
    /// Send a command to the server
    pub fn send(&self, cmd: ClientCommand) -> Result<(), ChatError> {
        crate::log_debug!("WsHandle::send for '{}': {:?}", self.user_id, cmd);
        self.sender
            .unbounded_send(WsEnvelope::new(cmd))
            .map_err(|e| ChatError::Transport(format!("Failed to send: {}", e)))
    }

    /// Re-announce this user on the current connection.
    pub fn join(&self) -> Result<(), ChatError> {
        self.send(ClientCommand::Join {
            user_id: self.user_id.clone(),
        })
    }

    /// True while the connection behind this handle has not been closed.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

pub(crate) type UrlBuilder = Arc<dyn Fn() -> Option<String> + Send + Sync>;
pub(crate) type EventSink = Arc<dyn Fn(WsEvent) + Send + Sync>;

/// A managed socket connection running in a background task.
///
/// Dropping the connection aborts the task and tears the transport down.
pub struct WsConnection {
    handle: WsHandle,
    task: JoinHandle<()>,
}

impl WsConnection {
    /// Start connecting in the background.
    ///
    /// `url_builder` is called on each attempt so a refreshed token is picked up.
    pub(crate) fn spawn(
        user_id: String,
        generation: u64,
        url_builder: UrlBuilder,
        on_event: EventSink,
        reconnect_config: ReconnectConfig,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let handle = WsHandle {
            sender,
            user_id: user_id.clone(),
            generation,
        };
        let task = tokio::spawn(run_connection_loop(
            user_id,
            receiver,
            url_builder,
            on_event,
            reconnect_config,
        ));
        Self { handle, task }
    }

    /// Get a handle for sending commands
    pub fn handle(&self) -> WsHandle {
        self.handle.clone()
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.task.abort();
        self.handle.sender.close_channel();
    }
}

enum SessionEnd {
    /// Transport closed; reconnect.
    Closed,
    /// All command senders are gone; stop for good.
    Shutdown,
}

async fn run_connection_loop(
    user_id: String,
    mut receiver: UnboundedReceiver<WsEnvelope<ClientCommand>>,
    url_builder: UrlBuilder,
    on_event: EventSink,
    reconnect_config: ReconnectConfig,
) {
    let set_state = |state: ConnectionState| on_event(WsEvent::ConnectionStateChanged(state));
    let mut attempt = 0u32;
    let mut has_connected = false;

    loop {
        if attempt == 0 && !has_connected {
            set_state(ConnectionState::Connecting);
        } else {
            set_state(ConnectionState::Reconnecting {
                attempt: attempt + 1,
            });
        }

        let failure = match url_builder() {
            None => "no session token available".to_string(),
            Some(url) => match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await
            {
                Ok(Ok((ws_stream, _response))) => {
                    crate::log_info!("Socket connected for {}", user_id);
                    set_state(ConnectionState::Connected);
                    attempt = 0;
                    if has_connected {
                        // Events sent during the gap are gone; consumers refetch.
                        on_event(WsEvent::Resync);
                    }
                    has_connected = true;

                    let end = run_session(ws_stream, &user_id, &mut receiver, &on_event).await;
                    set_state(ConnectionState::Disconnected);
                    if let SessionEnd::Shutdown = end {
                        crate::log_info!("Socket for {} shut down", user_id);
                        return;
                    }

                    crate::log_warn!("Socket for {} closed, reconnecting", user_id);
                    let delay = reconnect_config.delay_for_attempt(0);
                    tokio::time::sleep(Duration::from_millis(delay as u64)).await;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("connect timed out after {:?}", CONNECT_TIMEOUT),
            },
        };

        crate::log_error!("Socket error for {}: {}", user_id, failure);

        if reconnect_config.exhausted(attempt) {
            set_state(ConnectionState::Failed {
                reason: format!(
                    "Max reconnect attempts ({}) exceeded: {}",
                    reconnect_config.max_attempts, failure
                ),
            });
            return;
        }

        let delay = reconnect_config.delay_for_attempt(attempt);
        crate::log_info!(
            "Reconnecting {} in {}ms (attempt {})",
            user_id,
            delay,
            attempt + 1
        );
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        attempt += 1;
    }
}

/// Drive one live connection: announce the user, then pump both directions
/// until either side goes away.
async fn run_session<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    user_id: &str,
    receiver: &mut UnboundedReceiver<WsEnvelope<ClientCommand>>,
    on_event: &EventSink,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();

    let join = WsEnvelope::new(ClientCommand::Join {
        user_id: user_id.to_string(),
    });
    match serde_json::to_string(&join) {
        Ok(json) => {
            if let Err(e) = write.send(Message::Text(json.into())).await {
                crate::log_error!("Failed to send join: {}", e);
                return SessionEnd::Closed;
            }
        }
        Err(e) => crate::log_error!("Serialize join failed: {}", e),
    }

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<WsEnvelope<ServerEvent>>(text.as_str()) {
                        Ok(envelope) => {
                            crate::log_debug!("Socket event: {}", envelope.payload.name());
                            on_event(WsEvent::Server(envelope.payload));
                        }
                        Err(e) => crate::log_error!("Failed to parse event: {}", e),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    crate::log_info!("Socket for {} received close", user_id);
                    return SessionEnd::Closed;
                }
                // Pong is handled automatically by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    crate::log_error!("Socket read error: {}", e);
                    return SessionEnd::Closed;
                }
            },
            outgoing = receiver.next() => match outgoing {
                Some(cmd) => match serde_json::to_string(&cmd) {
                    Ok(json) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            crate::log_error!("Send failed: {}", e);
                            return SessionEnd::Closed;
                        }
                    }
                    Err(e) => crate::log_error!("Serialize failed: {}", e),
                },
                None => {
                    let _ = write.close().await;
                    return SessionEnd::Shutdown;
                }
            },
        }
    }
}
