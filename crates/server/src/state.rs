//! Application state shared across request handlers.

use std::sync::Arc;

use crate::auth::UserDirectory;
use crate::config::ServerConfig;
use crate::db::ChatDb;
use crate::ws::Hub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<ChatDb>,
    pub users: Arc<UserDirectory>,
    pub hub: Arc<Hub>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, users: UserDirectory) -> Self {
        Self {
            db: Arc::new(ChatDb::new()),
            users: Arc::new(users),
            hub: Arc::new(Hub::new()),
            config: Arc::new(config),
        }
    }

    /// Public URL of an uploaded file stored as `stored_name`.
    pub fn upload_url(&self, stored_name: &str) -> String {
        format!("{}/uploads/{}", self.config.public_url, stored_name)
    }
}
