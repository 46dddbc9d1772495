//! Client configuration from environment variables.

use std::path::PathBuf;

use corpchat_shared::SOCKET_PATH;

use crate::ws::ReconnectConfig;

/// Default cap on a single attachment.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base, e.g. `https://portal.example.com/api`.
    pub api_base_url: String,
    pub reconnect: ReconnectConfig,
    pub max_upload_bytes: u64,
    /// Overrides the platform config dir for persisted session data.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".to_string(),
            reconnect: ReconnectConfig::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the environment.
    ///
    /// Environment variables:
    /// - `CORPCHAT_API_URL`: REST base URL (default: "http://localhost:8080/api")
    /// - `CORPCHAT_STORAGE_DIR`: directory for persisted session data
    /// - `CORPCHAT_RECONNECT_ATTEMPTS`: socket reconnect attempts, 0 = unlimited (default: 10)
    /// - `CORPCHAT_MAX_UPLOAD_BYTES`: per-file upload cap (default: 10 MiB)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("CORPCHAT_API_URL") {
            if !url.trim().is_empty() {
                config.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("CORPCHAT_STORAGE_DIR") {
            config.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(attempts) = env_parse::<u32>("CORPCHAT_RECONNECT_ATTEMPTS") {
            config.reconnect.max_attempts = attempts;
        }
        if let Some(bytes) = env_parse::<u64>("CORPCHAT_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes;
        }

        config
    }

    /// Socket endpoint derived from the REST base.
    pub fn socket_url(&self) -> String {
        socket_url_for(&self.api_base_url)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Derive the socket URL from a REST base URL: strip a trailing `/api`,
/// switch the scheme to `ws`/`wss` and append the socket path.
pub fn socket_url_for(api_base_url: &str) -> String {
    let base = api_base_url.trim_end_matches('/');
    let base = base.strip_suffix("/api").unwrap_or(base);

    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };

    format!("{}{}", ws_base.trim_end_matches('/'), SOCKET_PATH)
}
