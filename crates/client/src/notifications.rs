//! Global notification layer.
//!
//! Turns inbound socket events into an audible cue, refresh signals and
//! toasts. It keeps no state machine of its own and never writes to the chat
//! store or the request gate; screens react to the refresh signals instead.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use corpchat_shared::ServerEvent;
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::audio::AudioCue;
use crate::signals::{RefreshTopic, SignalBus};
use crate::ws::WsEvent;

/// Most recent toasts kept on screen.
pub const TOAST_CAPACITY: usize = 5;

/// Where the user currently is, and where a toast click leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Dashboard,
    Chat,
    MessageRequests,
    Leaves,
    Tickets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    NewMessage,
    NewMessageRequest,
    RequestAccepted,
    RequestRejected,
    NewLeaveRequest,
    NewTicket,
}

impl NotificationKind {
    fn of(event: &ServerEvent) -> Option<Self> {
        let kind = match event {
            ServerEvent::NewMessage { .. } => NotificationKind::NewMessage,
            ServerEvent::NewMessageRequest { .. } => NotificationKind::NewMessageRequest,
            ServerEvent::MessageRequestAccepted { .. } => NotificationKind::RequestAccepted,
            ServerEvent::MessageRequestRejected { .. } => NotificationKind::RequestRejected,
            ServerEvent::NewLeaveRequest(_) => NotificationKind::NewLeaveRequest,
            ServerEvent::NewTicket(_) => NotificationKind::NewTicket,
            _ => return None,
        };
        Some(kind)
    }

    /// Screen a click on the toast navigates to.
    pub fn target(&self) -> Screen {
        match self {
            NotificationKind::NewMessage | NotificationKind::RequestAccepted => Screen::Chat,
            NotificationKind::NewMessageRequest | NotificationKind::RequestRejected => {
                Screen::MessageRequests
            }
            NotificationKind::NewLeaveRequest => Screen::Leaves,
            NotificationKind::NewTicket => Screen::Tickets,
        }
    }

    pub fn refresh_topics(&self) -> &'static [RefreshTopic] {
        match self {
            NotificationKind::NewMessage => &[RefreshTopic::Messages],
            NotificationKind::NewMessageRequest | NotificationKind::RequestRejected => {
                &[RefreshTopic::MessageRequests]
            }
            NotificationKind::RequestAccepted => {
                &[RefreshTopic::MessageRequests, RefreshTopic::Messages]
            }
            NotificationKind::NewLeaveRequest => &[RefreshTopic::Leaves, RefreshTopic::LeaveCount],
            NotificationKind::NewTicket => &[RefreshTopic::Tickets],
        }
    }

    /// Toasts are skipped only where the user is already looking at the news.
    pub fn suppressed_on(&self, screen: Screen) -> bool {
        match self {
            NotificationKind::NewMessage => screen == Screen::Chat,
            NotificationKind::NewMessageRequest => {
                matches!(screen, Screen::Chat | Screen::MessageRequests)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub id: u64,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Toast {
    pub fn target(&self) -> Screen {
        self.kind.target()
    }
}

/// Bounded queue of visible toasts, oldest first.
pub struct ToastQueue {
    toasts: Mutex<VecDeque<Toast>>,
    next_id: AtomicU64,
    capacity: usize,
    changed: Notify,
}

impl ToastQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            toasts: Mutex::new(VecDeque::with_capacity(capacity)),
            next_id: AtomicU64::new(1),
            capacity,
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Toast>> {
        self.toasts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, kind: NotificationKind, title: String, body: String) -> Toast {
        let toast = Toast {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            title,
            body,
            created_at: Utc::now(),
        };
        {
            let mut toasts = self.lock();
            toasts.push_back(toast.clone());
            while toasts.len() > self.capacity {
                toasts.pop_front();
            }
        }
        self.changed.notify_waiters();
        toast
    }

    /// Close a toast. Returns false if it was already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let removed = {
            let mut toasts = self.lock();
            let before = toasts.len();
            toasts.retain(|t| t.id != id);
            toasts.len() != before
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// Close a toast and return where it leads.
    pub fn click(&self, id: u64) -> Option<Screen> {
        let target = self.lock().iter().find(|t| t.id == id).map(Toast::target)?;
        self.dismiss(id);
        Some(target)
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.lock().iter().cloned().collect()
    }

    /// Resolves once a toast is added or removed.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(TOAST_CAPACITY)
    }
}

pub struct NotificationFanout {
    local_user: String,
    screen: Mutex<Screen>,
    signals: SignalBus,
    toasts: Arc<ToastQueue>,
    audio: Arc<dyn AudioCue>,
}

impl NotificationFanout {
    pub fn new(
        local_user: impl Into<String>,
        signals: SignalBus,
        toasts: Arc<ToastQueue>,
        audio: Arc<dyn AudioCue>,
    ) -> Self {
        Self {
            local_user: local_user.into(),
            screen: Mutex::new(Screen::default()),
            signals,
            toasts,
            audio,
        }
    }

    pub fn set_screen(&self, screen: Screen) {
        *self.screen.lock().unwrap_or_else(|e| e.into_inner()) = screen;
    }

    pub fn screen(&self) -> Screen {
        *self.screen.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn toasts(&self) -> &Arc<ToastQueue> {
        &self.toasts
    }

    /// React to one server event. Returns the toast shown, if any.
    pub fn handle(&self, event: &ServerEvent) -> Option<Toast> {
        let kind = NotificationKind::of(event)?;

        for topic in kind.refresh_topics() {
            self.signals.emit(*topic);
        }

        let own_message = matches!(
            event,
            ServerEvent::NewMessage { message, .. } if message.sender_id == self.local_user
        );
        if own_message {
            return None;
        }

        self.play_cue();

        if kind.suppressed_on(self.screen()) {
            crate::log_debug!("toast for {} suppressed on {:?}", event.name(), self.screen());
            return None;
        }
        let (title, body) = describe(event);
        Some(self.toasts.push(kind, title, body))
    }

    fn play_cue(&self) {
        let audio = self.audio.clone();
        if catch_unwind(AssertUnwindSafe(|| audio.play())).is_err() {
            crate::log_warn!("notification sound failed");
        }
    }

    /// Consume socket events until the channel closes.
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<WsEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(WsEvent::Server(event)) => {
                        self.handle(&event);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        crate::log_warn!("notification fan-out skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn describe(event: &ServerEvent) -> (String, String) {
    match event {
        ServerEvent::NewMessage { message, .. } => {
            let body = if message.content.trim().is_empty() {
                match message.attachments.len() {
                    1 => "sent an attachment".to_string(),
                    n => format!("sent {n} attachments"),
                }
            } else {
                message.content.clone()
            };
            (format!("New message from {}", message.sender_id), body)
        }
        ServerEvent::NewMessageRequest { from, .. } => (
            "New message request".to_string(),
            format!("{from} wants to chat with you"),
        ),
        ServerEvent::MessageRequestAccepted { .. } => (
            "Message request accepted".to_string(),
            "You can start chatting now".to_string(),
        ),
        ServerEvent::MessageRequestRejected { .. } => (
            "Message request declined".to_string(),
            "Your message request was declined".to_string(),
        ),
        ServerEvent::NewLeaveRequest(data) => (
            "New leave request".to_string(),
            summary(data, "A leave request is waiting for review"),
        ),
        ServerEvent::NewTicket(data) => (
            "New ticket".to_string(),
            summary(data, "A ticket was raised"),
        ),
        other => (other.name().to_string(), String::new()),
    }
}

fn summary(data: &serde_json::Value, fallback: &str) -> String {
    ["title", "subject", "reason", "message"]
        .iter()
        .find_map(|key| data.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
