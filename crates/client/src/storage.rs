//! Persistent key/value storage.
//!
//! Values are JSON files in a storage directory, by default the
//! platform-appropriate config directory:
//!   - Linux: `~/.config/corpchat/`
//!   - macOS: `~/Library/Application Support/corpchat/`
//!   - Windows: `%APPDATA%\corpchat\`
//!
//! The login flow writes [`SESSION_KEY`] and [`TOKEN_KEY`]; the messaging core
//! only reads them.

use std::path::{Path, PathBuf};

use corpchat_shared::SessionIdentity;
use serde::{de::DeserializeOwned, Serialize};

/// Key of the persisted [`SessionIdentity`].
pub const SESSION_KEY: &str = "session";
/// Key of the persisted bearer token.
pub const TOKEN_KEY: &str = "auth_token";

/// Something that can hand out the current session token.
///
/// Consulted on every (re)connect attempt, so a token refreshed by the login
/// flow is picked up without restarting the connection.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

/// A fixed token, for embedding hosts that manage credentials themselves.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage under the platform config directory.
    pub fn default_location() -> Option<Self> {
        Some(Self::new(dirs::config_dir()?.join("corpchat")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a value. Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json),
            Err(_) => false,
        }
    }

    /// Load a value. Returns `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        serde_json::from_str(&json).ok()
    }

    pub fn remove(&self, key: &str) {
        if let Some(path) = self.file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.load_raw(key).is_some()
    }

    /// The persisted session, if the user is logged in.
    pub fn session(&self) -> Option<SessionIdentity> {
        self.load(SESSION_KEY)
    }

    fn file_path(&self, key: &str) -> Option<PathBuf> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).ok()?;
        }
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(self.dir.join(format!("{}.json", safe_key)))
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        let Some(path) = self.file_path(key) else {
            return false;
        };
        std::fs::write(path, value).is_ok()
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        let path = self.file_path(key)?;
        std::fs::read_to_string(path).ok()
    }
}

impl TokenSource for Storage {
    fn token(&self) -> Option<String> {
        self.load::<String>(TOKEN_KEY).filter(|t| !t.is_empty())
    }
}
