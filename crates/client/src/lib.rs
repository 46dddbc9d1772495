//! corpchat client: the real-time messaging core of the portal.
//!
//! One [`ChatSession`] per login owns the socket ([`ws::ConnectionManager`])
//! and the listeners built on it: the [`stores::ChatStore`], the
//! [`gate::MessageRequestGate`] and the [`notifications::NotificationFanout`].
//! Sends go through a [`composer::Composer`]; attachments through the
//! [`uploader::AttachmentUploader`].

pub mod api_client;
pub mod audio;
pub mod composer;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod notifications;
pub mod session;
pub mod signals;
pub mod storage;
pub mod stores;
pub mod uploader;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use api_client::{ApiClient, ChatApi};
pub use config::ClientConfig;
pub use error::ChatError;
pub use session::ChatSession;
pub use storage::Storage;
