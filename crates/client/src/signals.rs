//! In-process refresh signals.
//!
//! Screens that show server-backed lists subscribe to the topics they care
//! about and refetch when one fires. Dropping a [`Subscription`] unregisters
//! it, so a closed screen never receives stale refreshes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// The closed set of refresh topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshTopic {
    Messages,
    MessageRequests,
    LeaveCount,
    Tickets,
    Leaves,
}

impl RefreshTopic {
    pub const ALL: [RefreshTopic; 5] = [
        RefreshTopic::Messages,
        RefreshTopic::MessageRequests,
        RefreshTopic::LeaveCount,
        RefreshTopic::Tickets,
        RefreshTopic::Leaves,
    ];

    /// Signal name as used by the screens.
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTopic::Messages => "refreshMessages",
            RefreshTopic::MessageRequests => "refreshMessageRequests",
            RefreshTopic::LeaveCount => "refreshLeaveCount",
            RefreshTopic::Tickets => "refreshTickets",
            RefreshTopic::Leaves => "refreshLeaves",
        }
    }
}

impl std::fmt::Display for RefreshTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type Subscribers = HashMap<RefreshTopic, Vec<(u64, UnboundedSender<RefreshTopic>)>>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Subscribers,
}

/// Typed pub/sub over [`RefreshTopic`]s.
#[derive(Clone, Default)]
pub struct SignalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for any of `topics`.
    pub fn subscribe(&self, topics: &[RefreshTopic]) -> Subscription {
        let (tx, rx) = unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = inner.next_id;
        for topic in topics {
            inner
                .subscribers
                .entry(*topic)
                .or_default()
                .push((id, tx.clone()));
        }
        Subscription {
            id,
            topics: topics.to_vec(),
            bus: Arc::downgrade(&self.inner),
            rx,
        }
    }

    /// Fire `topic`. Returns how many subscribers it reached.
    pub fn emit(&self, topic: RefreshTopic) -> usize {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = inner.subscribers.get_mut(&topic) else {
            return 0;
        };
        subscribers.retain(|(_, tx)| !tx.is_closed());
        let delivered = subscribers
            .iter()
            .filter(|(_, tx)| tx.send(topic).is_ok())
            .count();
        crate::log_debug!("signal {} -> {} subscriber(s)", topic, delivered);
        delivered
    }

    /// Number of live subscriptions to `topic`.
    pub fn subscriber_count(&self, topic: RefreshTopic) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscribers.get(&topic).map_or(0, Vec::len)
    }
}

/// A live subscription; unregisters on drop.
pub struct Subscription {
    id: u64,
    topics: Vec<RefreshTopic>,
    bus: Weak<Mutex<BusInner>>,
    rx: UnboundedReceiver<RefreshTopic>,
}

impl Subscription {
    /// Wait for the next signal.
    pub async fn recv(&mut self) -> Option<RefreshTopic> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RefreshTopic> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        let mut inner = bus.lock().unwrap_or_else(|e| e.into_inner());
        for topic in &self.topics {
            if let Some(list) = inner.subscribers.get_mut(topic) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}
