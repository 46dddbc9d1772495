//! Wiring of the messaging core for one authenticated session.
//!
//! [`ChatSession::start`] opens the single socket, subscribes the store, the
//! gate and the notification fan-out to it, and kicks off the initial REST
//! loads. [`ChatSession::end`] tears all of it down on logout.

use std::future::Future;
use std::sync::Arc;

use corpchat_shared::{ServerEvent, SessionIdentity};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::api_client::ChatApi;
use crate::audio::AudioCue;
use crate::composer::Composer;
use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::gate::MessageRequestGate;
use crate::notifications::{NotificationFanout, Screen, ToastQueue};
use crate::signals::SignalBus;
use crate::storage::TokenSource;
use crate::stores::ChatStore;
use crate::uploader::AttachmentUploader;
use crate::ws::{ConnectionManager, ConnectionState, WsEvent, WsHandle};

pub struct ChatSession {
    identity: SessionIdentity,
    api: Arc<dyn ChatApi>,
    manager: Arc<ConnectionManager>,
    handle: WsHandle,
    store: Arc<ChatStore>,
    gate: Arc<MessageRequestGate>,
    uploader: AttachmentUploader,
    signals: SignalBus,
    fanout: Arc<NotificationFanout>,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatSession {
    /// Start the core for `identity`. Must be called within a tokio runtime.
    pub fn start(
        identity: SessionIdentity,
        config: &ClientConfig,
        api: Arc<dyn ChatApi>,
        tokens: Arc<dyn TokenSource>,
        audio: Arc<dyn AudioCue>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            config.socket_url(),
            tokens,
            config.reconnect.clone(),
        ));
        let store = Arc::new(ChatStore::new(api.clone(), identity.user_id.clone()));
        let gate = Arc::new(MessageRequestGate::new(
            api.clone(),
            store.clone(),
            identity.clone(),
        ));
        let uploader = AttachmentUploader::new(api.clone(), config.max_upload_bytes);
        let signals = SignalBus::new();
        let fanout = Arc::new(NotificationFanout::new(
            identity.user_id.clone(),
            signals.clone(),
            Arc::new(ToastQueue::default()),
            audio,
        ));

        // Subscribe before opening so nothing from the first connect is missed.
        let pump_events = manager.subscribe();
        let fanout_events = manager.subscribe();
        let handle = manager.open(&identity);

        let tasks = vec![
            spawn_pump(store.clone(), gate.clone(), pump_events),
            fanout.clone().spawn(fanout_events),
            spawn_logged("initial conversation load", {
                let store = store.clone();
                async move { store.refresh_conversations().await.map(|_| ()) }
            }),
            spawn_logged("initial request load", {
                let gate = gate.clone();
                async move {
                    gate.refresh_incoming().await?;
                    gate.refresh_outgoing().await.map(|_| ())
                }
            }),
        ];

        crate::log_info!(
            "chat session started for {} ({})",
            identity.user_id,
            identity.role
        );
        Self {
            identity,
            api,
            manager,
            handle,
            store,
            gate,
            uploader,
            signals,
            fanout,
            tasks,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<MessageRequestGate> {
        &self.gate
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn notifications(&self) -> &Arc<NotificationFanout> {
        &self.fanout
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn status(&self) -> watch::Receiver<ConnectionState> {
        self.manager.status()
    }

    /// Put `chat_id` on screen: its messages stop raising toasts and unread
    /// counts.
    pub fn show_chat(&self, chat_id: &str) {
        self.fanout.set_screen(Screen::Chat);
        self.store.open(chat_id);
    }

    /// Switch to a screen other than a conversation.
    pub fn show(&self, screen: Screen) {
        if screen == Screen::Chat {
            return;
        }
        self.fanout.set_screen(screen);
        self.store.close();
    }

    /// A composer for `chat_id`.
    pub fn composer(&self, chat_id: impl Into<String>) -> Composer {
        Composer::new(
            chat_id,
            self.api.clone(),
            self.store.clone(),
            self.uploader.clone(),
        )
    }

    /// Log out: close the socket, stop all listeners, drop cached state.
    pub fn end(mut self) {
        self.shutdown();
        crate::log_info!("chat session ended for {}", self.identity.user_id);
    }

    fn shutdown(&mut self) {
        self.manager.close(&self.handle);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.store.clear();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.shutdown();
        }
    }
}

fn spawn_logged<F>(what: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), ChatError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            crate::log_warn!("{} failed: {}", what, e);
        }
    })
}

/// Feed socket events into the store and the gate.
///
/// REST follow-ups are spawned, never awaited here, so a slow fetch cannot
/// hold up later events.
fn spawn_pump(
    store: Arc<ChatStore>,
    gate: Arc<MessageRequestGate>,
    mut events: broadcast::Receiver<WsEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WsEvent::Server(event)) => apply_server_event(&store, &gate, event),
                Ok(WsEvent::ConnectionStateChanged(state)) => {
                    if !state.is_connected() {
                        store.clear_presence();
                    }
                }
                Ok(WsEvent::Resync) => resync(&store, &gate),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    crate::log_warn!("event pump lagged by {} events, resyncing", skipped);
                    resync(&store, &gate);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn apply_server_event(store: &Arc<ChatStore>, gate: &Arc<MessageRequestGate>, event: ServerEvent) {
    match event {
        ServerEvent::NewMessage { chat_id, message } => {
            let known = store.is_known(&chat_id);
            store.apply_incoming(&chat_id, message);
            if !known {
                refresh_conversations(store);
            }
        }
        ServerEvent::NewMessageRequest { .. } => refresh_incoming(gate),
        ServerEvent::MessageRequestAccepted { .. } => {
            gate.apply_event(&event);
            refresh_conversations(store);
        }
        ServerEvent::MessageRequestRejected { .. } => {
            gate.apply_event(&event);
        }
        ServerEvent::MessagesRead { chat_id, reader_id } => {
            store.apply_read_receipt(&chat_id, &reader_id);
        }
        ServerEvent::PresenceUpdate { user_id, online } => store.apply_presence(&user_id, online),
        ServerEvent::OnlineUsers { user_ids } => store.replace_presence(user_ids),
        ServerEvent::Error { code, message } => {
            crate::log_warn!("server reported {}: {}", code, message);
        }
        // Only the notification layer cares about these.
        ServerEvent::NewTicket(_) | ServerEvent::NewLeaveRequest(_) => {}
    }
}

fn refresh_conversations(store: &Arc<ChatStore>) {
    let store = store.clone();
    spawn_logged("conversation refresh", async move {
        store.refresh_conversations().await.map(|_| ())
    });
}

fn refresh_incoming(gate: &Arc<MessageRequestGate>) {
    let gate = gate.clone();
    spawn_logged("request refresh", async move {
        gate.refresh_incoming().await.map(|_| ())
    });
}

fn resync(store: &Arc<ChatStore>, gate: &Arc<MessageRequestGate>) {
    let store = store.clone();
    spawn_logged("resync", async move { store.resync().await });
    refresh_incoming(gate);
    let gate = gate.clone();
    spawn_logged("outgoing request refresh", async move {
        gate.refresh_outgoing().await.map(|_| ())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Silent;
    use crate::storage::StaticToken;
    use crate::testing::{conversation, message, FakeApi};
    use crate::ws::ReconnectConfig;
    use corpchat_shared::{Role, WsEnvelope};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test]
    async fn socket_events_reach_store_gate_and_toasts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            api_base_url: format!("http://{}/api", listener.local_addr().unwrap()),
            reconnect: ReconnectConfig {
                max_attempts: 3,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            },
            ..ClientConfig::default()
        };

        let api = Arc::new(FakeApi::new("boss"));
        api.add_chat(conversation("c1", "boss", "emp"));
        let identity = SessionIdentity {
            user_id: "boss".into(),
            role: Role::Boss,
            auth_token: "tok".into(),
        };
        let session = ChatSession::start(
            identity,
            &config,
            api.clone(),
            Arc::new(StaticToken("tok".into())),
            Arc::new(Silent),
        );

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let push = |event: ServerEvent| {
            WsMessage::Text(serde_json::to_string(&WsEnvelope::new(event)).unwrap().into())
        };

        let store = session.store().clone();
        eventually(|| store.is_known("c1")).await;

        ws.send(push(ServerEvent::NewMessage {
            chat_id: "c1".into(),
            message: message("m1", "c1", "emp", 1),
        }))
        .await
        .unwrap();
        ws.send(push(ServerEvent::OnlineUsers {
            user_ids: vec!["emp".into()],
        }))
        .await
        .unwrap();
        ws.send(push(ServerEvent::NewMessageRequest {
            request_id: "r1".into(),
            from: "emp2".into(),
        }))
        .await
        .unwrap();

        eventually(|| store.messages("c1").len() == 1).await;
        eventually(|| store.is_online("emp")).await;
        assert_eq!(store.total_unread(), 1);
        eventually(|| api.call_count("incoming_requests") >= 2).await;
        let toasts = session.notifications().toasts().clone();
        eventually(|| toasts.visible().len() == 2).await;

        let manager = session.connection().clone();
        session.end();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(store.messages("c1").is_empty());

        // The server side sees the socket go away.
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn leaving_a_conversation_brings_toasts_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            api_base_url: format!("http://{}/api", listener.local_addr().unwrap()),
            ..ClientConfig::default()
        };
        let api = Arc::new(FakeApi::new("boss"));
        api.add_chat(conversation("c1", "boss", "emp"));
        let session = ChatSession::start(
            SessionIdentity {
                user_id: "boss".into(),
                role: Role::Boss,
                auth_token: "tok".into(),
            },
            &config,
            api,
            Arc::new(StaticToken("tok".into())),
            Arc::new(Silent),
        );
        let incoming = |id: &str| ServerEvent::NewMessage {
            chat_id: "c1".into(),
            message: message(id, "c1", "emp", 1),
        };

        session.show_chat("c1");
        assert_eq!(session.store().active().as_deref(), Some("c1"));
        assert!(session.notifications().handle(&incoming("m1")).is_none());

        session.show(Screen::Dashboard);
        assert_eq!(session.notifications().screen(), Screen::Dashboard);
        assert_eq!(session.store().active(), None);
        assert!(session.notifications().handle(&incoming("m2")).is_some());

        session.show_chat("c1");
        session.show(Screen::MessageRequests);
        assert!(session.notifications().handle(&incoming("m3")).is_some());
        session.end();
    }
}
