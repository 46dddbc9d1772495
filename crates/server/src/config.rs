//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Largest accepted upload, matching the client's default cap.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// JSON user directory; the built-in demo directory is used when unset.
    pub users_file: Option<PathBuf>,
    pub upload_dir: PathBuf,
    /// Public origin used to build attachment URLs.
    pub public_url: String,
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            users_file: None,
            upload_dir: PathBuf::from("./uploads"),
            public_url: "http://localhost:8080".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Read the configuration from the environment.
    ///
    /// Environment variables:
    /// - `CORPCHAT_BIND`: listen address (default: "0.0.0.0:8080")
    /// - `CORPCHAT_USERS_FILE`: JSON array of `{id, name, role, token}` entries
    /// - `CORPCHAT_UPLOAD_DIR`: where uploaded files are stored (default: "./uploads")
    /// - `CORPCHAT_PUBLIC_URL`: origin clients reach us on (default: "http://localhost:8080")
    /// - `CORPCHAT_MAX_UPLOAD_BYTES`: upload size cap
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(bind) = env_parse::<SocketAddr>("CORPCHAT_BIND") {
            config.bind = bind;
        }
        if let Ok(path) = std::env::var("CORPCHAT_USERS_FILE") {
            config.users_file = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("CORPCHAT_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("CORPCHAT_PUBLIC_URL") {
            config.public_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(max) = env_parse::<u64>("CORPCHAT_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = max;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}
