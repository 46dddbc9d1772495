//! Client-side caches fed by REST snapshots and socket events.

pub mod chats;
pub mod presence;

pub use chats::{ChatStore, ConversationMessages};
pub use presence::PresenceSet;
