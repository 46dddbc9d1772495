//! Conversation list and per-conversation message history.
//!
//! The store is rebuilt from a REST snapshot when a conversation is opened and
//! kept current by live socket events. Every insertion path (snapshot, live
//! event, own send) goes through the same id-keyed merge, so the order in
//! which a REST echo and a socket push arrive does not matter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use corpchat_shared::{Conversation, Message, PagedResponse};

use super::presence::PresenceSet;
use crate::api_client::ChatApi;
use crate::error::ChatError;

/// Cached history of a single conversation.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversationMessages {
    /// Sorted by creation time ascending, server id as tie-break.
    pub messages: Vec<Message>,
    /// Whether a REST snapshot has been applied.
    pub is_loaded: bool,
    /// Whether older pages exist on the server.
    pub has_more: bool,
    pub prev_cursor: Option<String>,
}

impl ConversationMessages {
    /// Add a message, keeping sort order.
    /// Returns false if a message with the same id already exists.
    pub fn add_message(&mut self, msg: Message) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == msg.id) {
            // Same message; only the append-only reader set can have grown.
            for reader in &msg.read_by {
                existing.mark_read_by(reader);
            }
            return false;
        }

        let pos = self
            .messages
            .binary_search_by(|m| m.sort_key().cmp(&msg.sort_key()))
            .unwrap_or_else(|pos| pos);
        self.messages.insert(pos, msg);
        true
    }

    /// Apply a newest-last REST page as the authoritative window.
    ///
    /// Cached messages missing from the page survive if they are newer than
    /// everything in it (they arrived live after the page was taken), or if
    /// they are older than it and were paged in earlier. The older ones are
    /// kept only while the cache still overlaps the page, so no gap opens.
    pub fn apply_snapshot(&mut self, page: PagedResponse<Message>) {
        let newest = page
            .items
            .iter()
            .max_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .map(|m| (m.created_at, m.id.clone()));
        let oldest = page
            .items
            .iter()
            .min_by(|a, b| a.sort_key().cmp(&b.sort_key()))
            .map(|m| (m.created_at, m.id.clone()));

        let cached = std::mem::take(&mut self.messages);
        let overlaps = page
            .items
            .iter()
            .any(|m| cached.iter().any(|c| c.id == m.id));
        let extends_back = overlaps && page.page.prev_cursor.is_some();

        for msg in page.items {
            self.add_message(msg);
        }
        let mut kept_older = false;
        for msg in cached {
            let newer = match &newest {
                Some((at, id)) => msg.sort_key() > (*at, id.as_str()),
                None => true,
            };
            let older = extends_back
                && oldest
                    .as_ref()
                    .is_some_and(|(at, id)| msg.sort_key() < (*at, id.as_str()));
            if newer || older {
                kept_older |= older;
                self.add_message(msg);
            }
        }

        // Older cached pages still describe where paging left off.
        if !kept_older {
            self.has_more = page.page.prev_cursor.is_some();
            self.prev_cursor = page.page.prev_cursor;
        }
        self.is_loaded = true;
    }

    /// Merge an older page fetched through `prev_cursor`. Returns how many
    /// messages were new.
    pub fn prepend_older(&mut self, page: PagedResponse<Message>) -> usize {
        let added = page
            .items
            .into_iter()
            .map(|msg| self.add_message(msg))
            .filter(|inserted| *inserted)
            .count();
        self.has_more = page.page.prev_cursor.is_some();
        self.prev_cursor = page.page.prev_cursor;
        added
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[derive(Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, ConversationMessages>,
    active: Option<String>,
    presence: PresenceSet,
}

impl StoreState {
    fn clear_unread(&mut self, chat_id: &str) {
        if let Some(chat) = self.conversations.get_mut(chat_id) {
            chat.unread_count = 0;
        }
    }

    fn bump_last_message(&mut self, chat_id: &str, msg: &Message) {
        if let Some(chat) = self.conversations.get_mut(chat_id) {
            let newer = chat
                .last_message
                .as_ref()
                .map_or(true, |last| msg.sort_key() >= last.sort_key());
            if newer {
                chat.last_message = Some(msg.clone());
            }
        }
    }
}

/// Client-side cache of conversations and their messages.
pub struct ChatStore {
    api: Arc<dyn ChatApi>,
    local_user: String,
    state: Mutex<StoreState>,
}

impl ChatStore {
    pub fn new(api: Arc<dyn ChatApi>, local_user: impl Into<String>) -> Self {
        Self {
            api,
            local_user: local_user.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the conversation list with a fresh REST snapshot.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, ChatError> {
        let chats = self.api.list_chats().await?;
        {
            let mut state = self.lock();
            let previous = std::mem::take(&mut state.conversations);
            for mut chat in chats {
                // Keep a live last message the snapshot has not caught up with.
                if let Some(old) = previous.get(&chat.id) {
                    let stale = match (&chat.last_message, &old.last_message) {
                        (Some(new), Some(old)) => old.sort_key() > new.sort_key(),
                        (None, Some(_)) => true,
                        _ => false,
                    };
                    if stale {
                        chat.last_message = old.last_message.clone();
                    }
                }
                if state.active.as_deref() == Some(chat.id.as_str()) {
                    chat.unread_count = 0;
                }
                state.conversations.insert(chat.id.clone(), chat);
            }
        }
        Ok(self.list_conversations())
    }

    /// Known conversations, most recently active first.
    pub fn list_conversations(&self) -> Vec<Conversation> {
        let state = self.lock();
        let mut chats: Vec<Conversation> = state.conversations.values().cloned().collect();
        chats.sort_by(|a, b| {
            b.last_activity()
                .cmp(&a.last_activity())
                .then_with(|| a.id.cmp(&b.id))
        });
        chats
    }

    pub fn conversation(&self, chat_id: &str) -> Option<Conversation> {
        self.lock().conversations.get(chat_id).cloned()
    }

    /// The conversation between the local user and `peer`, if known.
    pub fn conversation_with(&self, peer: &str) -> Option<Conversation> {
        let state = self.lock();
        state
            .conversations
            .values()
            .find(|c| c.involves(&self.local_user, peer))
            .cloned()
    }

    pub fn is_known(&self, chat_id: &str) -> bool {
        self.lock().conversations.contains_key(chat_id)
    }

    /// Open `chat_id` and load its newest page of history.
    pub async fn fetch_messages(&self, chat_id: &str) -> Result<Vec<Message>, ChatError> {
        self.open(chat_id);
        self.load_snapshot(chat_id).await?;
        Ok(self.messages(chat_id))
    }

    async fn load_snapshot(&self, chat_id: &str) -> Result<(), ChatError> {
        let history = self.api.chat_history(chat_id, None).await?;
        let mut state = self.lock();
        let entry = state.messages.entry(chat_id.to_string()).or_default();
        entry.apply_snapshot(history.messages);
        let newest = entry.newest().cloned();

        let mut chat = history.chat;
        // Receiving the history over REST marks it read.
        chat.unread_count = 0;
        let existing = state.conversations.get(chat_id).and_then(|c| c.last_message.clone());
        chat.last_message = [newest, existing, chat.last_message.take()]
            .into_iter()
            .flatten()
            .max_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        state.conversations.insert(chat_id.to_string(), chat);
        Ok(())
    }

    /// Fetch the page before the oldest cached message. Returns how many
    /// messages were added; 0 once the beginning is reached.
    pub async fn load_older(&self, chat_id: &str) -> Result<usize, ChatError> {
        let cursor = {
            let state = self.lock();
            match state.messages.get(chat_id) {
                Some(entry) if entry.has_more => entry.prev_cursor.clone(),
                _ => None,
            }
        };
        let Some(cursor) = cursor else {
            return Ok(0);
        };

        let history = self.api.chat_history(chat_id, Some(&cursor)).await?;
        let mut state = self.lock();
        let entry = state.messages.entry(chat_id.to_string()).or_default();
        Ok(entry.prepend_older(history.messages))
    }

    /// Cached messages of `chat_id`, oldest first.
    pub fn messages(&self, chat_id: &str) -> Vec<Message> {
        self.lock()
            .messages
            .get(chat_id)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    pub fn has_more(&self, chat_id: &str) -> bool {
        self.lock()
            .messages
            .get(chat_id)
            .is_some_and(|entry| entry.has_more)
    }

    /// Mark `chat_id` as the conversation on screen and clear its unread count.
    pub fn open(&self, chat_id: &str) {
        let mut state = self.lock();
        state.active = Some(chat_id.to_string());
        state.clear_unread(chat_id);
    }

    pub fn close(&self) {
        self.lock().active = None;
    }

    pub fn active(&self) -> Option<String> {
        self.lock().active.clone()
    }

    /// Insert or replace a conversation (e.g. one returned by an accept).
    pub fn upsert_conversation(&self, mut chat: Conversation) {
        let mut state = self.lock();
        if let Some(old) = state.conversations.get(&chat.id) {
            if chat.last_message.is_none() {
                chat.last_message = old.last_message.clone();
            }
        }
        if state.active.as_deref() == Some(chat.id.as_str()) {
            chat.unread_count = 0;
        }
        state.conversations.insert(chat.id.clone(), chat);
    }

    /// Merge one message from any source. Idempotent by server id.
    ///
    /// Returns true if the message was new to the store.
    pub fn apply_incoming(&self, chat_id: &str, msg: Message) -> bool {
        let mut state = self.lock();
        let from_peer = msg.sender_id != self.local_user;
        let is_active = state.active.as_deref() == Some(chat_id);

        if !state.conversations.contains_key(chat_id) {
            // First contact from someone; the next list refresh fills in the rest.
            let mut participant_ids = vec![self.local_user.clone()];
            if from_peer {
                participant_ids.push(msg.sender_id.clone());
            }
            state.conversations.insert(
                chat_id.to_string(),
                Conversation {
                    id: chat_id.to_string(),
                    participant_ids,
                    last_message: None,
                    unread_count: 0,
                },
            );
        }

        let inserted = state
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .add_message(msg.clone());
        if !inserted {
            return false;
        }

        state.bump_last_message(chat_id, &msg);
        if from_peer && !is_active {
            if let Some(chat) = state.conversations.get_mut(chat_id) {
                chat.unread_count += 1;
            }
        }
        true
    }

    /// `reader_id` has read `chat_id`: record it on the messages they did not send.
    pub fn apply_read_receipt(&self, chat_id: &str, reader_id: &str) {
        let mut state = self.lock();
        if let Some(entry) = state.messages.get_mut(chat_id) {
            for msg in entry.messages.iter_mut().filter(|m| m.sender_id != reader_id) {
                msg.mark_read_by(reader_id);
            }
        }
        if let Some(chat) = state.conversations.get_mut(chat_id) {
            if let Some(last) = chat.last_message.as_mut() {
                if last.sender_id != reader_id {
                    last.mark_read_by(reader_id);
                }
            }
            if reader_id == self.local_user {
                chat.unread_count = 0;
            }
        }
    }

    /// Recover from missed events: refetch the list and the open conversation.
    pub async fn resync(&self) -> Result<(), ChatError> {
        self.refresh_conversations().await?;
        if let Some(active) = self.active() {
            self.load_snapshot(&active).await?;
        }
        Ok(())
    }

    /// Sum of per-conversation unread counts; the chat badge.
    pub fn total_unread(&self) -> u32 {
        self.lock()
            .conversations
            .values()
            .map(|c| c.unread_count)
            .sum()
    }

    pub fn presence(&self) -> PresenceSet {
        self.lock().presence.clone()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.lock().presence.is_online(user_id)
    }

    pub fn apply_presence(&self, user_id: &str, online: bool) {
        self.lock().presence.apply(user_id, online);
    }

    pub fn replace_presence(&self, user_ids: Vec<String>) {
        self.lock().presence.replace(user_ids);
    }

    pub fn clear_presence(&self) {
        self.lock().presence.clear();
    }

    /// Drop everything (logout).
    pub fn clear(&self) {
        *self.lock() = StoreState::default();
    }
}
