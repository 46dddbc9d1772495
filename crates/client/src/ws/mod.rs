//! Session socket for real-time events.
//!
//! One [`ConnectionManager`] per authenticated session owns one transport.
//! Subscribers receive [`WsEvent`]s from a broadcast channel held by the
//! manager, so they stay attached while the transport drops and reconnects.
//!
//! ```text
//!   ConnectionManager ── open / close / subscribe / status
//!          │
//!          ▼
//!    WsConnection (background task: connect, join, pump, backoff)
//!          │
//!          ▼
//!   broadcast<WsEvent> ──► ChatStore pump, gate, notification fan-out
//! ```

mod connection;
mod manager;

pub use connection::{ConnectionState, ReconnectConfig, WsConnection, WsHandle};
pub use manager::{ConnectionManager, WsEvent};
