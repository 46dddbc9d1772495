//! Owner of the one socket connection per authenticated session.

use std::sync::{Arc, Mutex, RwLock};

use corpchat_shared::{ServerEvent, SessionIdentity, TOKEN_QUERY_PARAM};
use tokio::sync::{broadcast, watch};

use super::connection::{ConnectionState, EventSink, ReconnectConfig, UrlBuilder, WsConnection, WsHandle};
use crate::storage::TokenSource;

const EVENT_CAPACITY: usize = 256;

/// Events dispatched to subscribers of the session socket.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// An event pushed by the server
    Server(ServerEvent),
    /// Connection state changed
    ConnectionStateChanged(ConnectionState),
    /// The socket came back after an outage. Anything pushed during the gap
    /// is lost, so listeners must refetch over REST.
    Resync,
}

/// Opens, owns and closes the session socket.
///
/// Subscriptions belong to the manager, not to the transport, so they stay
/// live across reconnects and even across `close`/`open` cycles.
pub struct ConnectionManager {
    socket_url: String,
    tokens: Arc<dyn TokenSource>,
    reconnect: ReconnectConfig,
    events: broadcast::Sender<WsEvent>,
    status: Arc<watch::Sender<ConnectionState>>,
    /// Bumped on every open/close. Dispatch holds the read lock while it
    /// checks and sends, so once `close` returns no stale event gets out.
    generation: Arc<RwLock<u64>>,
    active: Mutex<Option<WsConnection>>,
}

impl ConnectionManager {
    pub fn new(
        socket_url: impl Into<String>,
        tokens: Arc<dyn TokenSource>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            socket_url: socket_url.into(),
            tokens,
            reconnect,
            events,
            status: Arc::new(status),
            generation: Arc::new(RwLock::new(0)),
            active: Mutex::new(None),
        }
    }

    /// Open the session socket. Any previous connection is closed first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&self, session: &SessionIdentity) -> WsHandle {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let generation = self.bump_generation();
        if active.take().is_some() {
            crate::log_info!("ConnectionManager: replacing existing connection");
        }

        let socket_url = self.socket_url.clone();
        let tokens = self.tokens.clone();
        let fallback_token = session.auth_token.clone();
        let url_builder: UrlBuilder = Arc::new(move || {
            let token = tokens
                .token()
                .or_else(|| Some(fallback_token.clone()).filter(|t| !t.is_empty()))?;
            Some(format!(
                "{}?{}={}",
                socket_url,
                TOKEN_QUERY_PARAM,
                urlencoding::encode(&token)
            ))
        });

        let current = self.generation.clone();
        let events = self.events.clone();
        let status = self.status.clone();
        let on_event: EventSink = Arc::new(move |event: WsEvent| {
            let current = current.read().unwrap_or_else(|e| e.into_inner());
            if *current != generation {
                return;
            }
            if let WsEvent::ConnectionStateChanged(state) = &event {
                status.send_replace(state.clone());
            }
            // No subscribers is fine.
            let _ = events.send(event);
        });

        let connection = WsConnection::spawn(
            session.user_id.clone(),
            generation,
            url_builder,
            on_event,
            self.reconnect.clone(),
        );
        let handle = connection.handle();
        *active = Some(connection);
        crate::log_info!("ConnectionManager: opened socket for {}", session.user_id);
        handle
    }

    /// Close the connection behind `handle`. A handle from an older `open`
    /// is ignored.
    pub fn close(&self, handle: &WsHandle) {
        let current = *self.generation.read().unwrap_or_else(|e| e.into_inner());
        if handle.generation == current {
            self.shutdown();
        }
    }

    /// Close whatever connection is active (logout, session expiry).
    pub fn shutdown(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        self.bump_generation();
        if let Some(connection) = active.take() {
            drop(connection);
            crate::log_info!("ConnectionManager: socket closed");
        }
        self.status.send_replace(ConnectionState::Disconnected);
    }

    fn bump_generation(&self) -> u64 {
        let mut generation = self.generation.write().unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        *generation
    }

    /// Subscribe to socket events.
    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }

    /// Watch the coarse connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Handle of the active connection, if any.
    pub fn handle(&self) -> Option<WsHandle> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(WsConnection::handle)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StaticToken;
    use chrono::Utc;
    use corpchat_shared::{ClientCommand, Message, Role, WsEnvelope};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::WebSocketStream;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            max_attempts,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 2.0,
        }
    }

    fn session() -> SessionIdentity {
        SessionIdentity {
            user_id: "emp-1".into(),
            role: Role::Employee,
            auth_token: "session-token".into(),
        }
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/socket", listener.local_addr().unwrap());
        (listener, url)
    }

    /// Accept one socket, returning it with the request URI and the join command.
    async fn accept(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String, ClientCommand) {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uri = req.uri().to_string();
                Ok(resp)
            },
        )
        .await
        .unwrap();

        let join = loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => {
                    let env: WsEnvelope<ClientCommand> = serde_json::from_str(text.as_str()).unwrap();
                    break env.payload;
                }
                _ => continue,
            }
        };
        (ws, uri, join)
    }

    async fn push(ws: &mut WebSocketStream<TcpStream>, event: ServerEvent) {
        let json = serde_json::to_string(&WsEnvelope::new(event)).unwrap();
        ws.send(WsMessage::Text(json.into())).await.unwrap();
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<WsEvent>,
        pred: impl Fn(&WsEvent) -> bool,
    ) -> WsEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn message(id: &str) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: "boss".into(),
            content: "hello".into(),
            attachments: vec![],
            created_at: Utc::now(),
            read_by: vec![],
            deleted: false,
        }
    }

    #[tokio::test]
    async fn open_authenticates_and_joins() {
        let (listener, url) = bind().await;
        let manager = ConnectionManager::new(
            url,
            Arc::new(StaticToken("stored token".into())),
            fast_reconnect(3),
        );
        let mut rx = manager.subscribe();
        let handle = manager.open(&session());

        let (mut ws, uri, join) = accept(&listener).await;
        assert_eq!(uri, "/socket?token=stored%20token");
        assert_eq!(join, ClientCommand::Join { user_id: "emp-1".into() });
        assert_eq!(handle.user_id, "emp-1");

        wait_for(&mut rx, |e| {
            matches!(e, WsEvent::ConnectionStateChanged(ConnectionState::Connected))
        })
        .await;
        assert!(manager.is_connected());

        let event = ServerEvent::NewMessage {
            chat_id: "c1".into(),
            message: message("m1"),
        };
        push(&mut ws, event.clone()).await;
        let got = wait_for(&mut rx, |e| matches!(e, WsEvent::Server(_))).await;
        assert_eq!(got, WsEvent::Server(event));
    }

    #[tokio::test]
    async fn subscriptions_survive_reconnect() {
        let (listener, url) = bind().await;
        let manager = ConnectionManager::new(
            url,
            Arc::new(StaticToken("t".into())),
            fast_reconnect(5),
        );
        let mut rx = manager.subscribe();
        manager.open(&session());

        let (ws, _, _) = accept(&listener).await;
        wait_for(&mut rx, |e| {
            matches!(e, WsEvent::ConnectionStateChanged(ConnectionState::Connected))
        })
        .await;
        drop(ws);

        // Second connection announces the user again.
        let (mut ws, _, join) = accept(&listener).await;
        assert_eq!(join, ClientCommand::Join { user_id: "emp-1".into() });
        wait_for(&mut rx, |e| matches!(e, WsEvent::Resync)).await;

        push(&mut ws, ServerEvent::MessageRequestRejected { request_id: "r1".into() }).await;
        let got = wait_for(&mut rx, |e| matches!(e, WsEvent::Server(_))).await;
        assert_eq!(
            got,
            WsEvent::Server(ServerEvent::MessageRequestRejected { request_id: "r1".into() })
        );
    }

    #[tokio::test]
    async fn close_stops_dispatch_and_tears_down_transport() {
        let (listener, url) = bind().await;
        let manager = ConnectionManager::new(
            url,
            Arc::new(StaticToken("t".into())),
            fast_reconnect(3),
        );
        let mut rx = manager.subscribe();
        let handle = manager.open(&session());
        let (mut ws, _, _) = accept(&listener).await;
        wait_for(&mut rx, |e| {
            matches!(e, WsEvent::ConnectionStateChanged(ConnectionState::Connected))
        })
        .await;

        manager.close(&handle);
        assert!(!handle.is_open());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // The server sees the socket go away.
        let closed = tokio::time::timeout(WAIT, async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
                    Some(Ok(_)) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        // Nothing more reaches subscribers.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, WsEvent::Server(_)), "stale event {event:?}");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn stale_handle_does_not_close_new_connection() {
        let (listener, url) = bind().await;
        let manager = ConnectionManager::new(
            url,
            Arc::new(StaticToken("t".into())),
            fast_reconnect(3),
        );
        let old = manager.open(&session());
        let (_first, _, _) = accept(&listener).await;
        let new = manager.open(&session());
        let (_second, _, _) = accept(&listener).await;

        assert!(!old.is_open());
        manager.close(&old);
        assert!(new.is_open());
        assert!(manager.handle().is_some());
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        // Bind then drop to get a port nobody listens on.
        let (listener, url) = bind().await;
        drop(listener);

        let manager = ConnectionManager::new(
            url,
            Arc::new(StaticToken("t".into())),
            fast_reconnect(5),
        );
        let mut status = manager.status();
        let mut rx = manager.subscribe();
        manager.open(&session());

        let mut attempts_seen = 0;
        let failed = tokio::time::timeout(WAIT, async {
            loop {
                match rx.recv().await.unwrap() {
                    WsEvent::ConnectionStateChanged(ConnectionState::Reconnecting { .. }) => {
                        attempts_seen += 1
                    }
                    WsEvent::ConnectionStateChanged(ConnectionState::Failed { reason }) => {
                        return reason
                    }
                    _ => {}
                }
            }
        })
        .await
        .expect("never failed");

        assert!(failed.contains("Max reconnect attempts (5)"));
        assert_eq!(attempts_seen, 5);
        status.changed().await.ok();
        assert!(matches!(*status.borrow(), ConnectionState::Failed { .. }));
    }
}
