//! Bearer-token authentication against the chat user directory.
//!
//! Tokens are issued by the portal login; this backend only needs to map a
//! token back to its user. The directory is loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use corpchat_shared::{ChatUser, Role};
use serde::Deserialize;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to read user directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid user directory: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("user {0} is listed twice")]
    DuplicateUser(String),
    #[error("token of {0} is shared with another user")]
    DuplicateToken(String),
}

/// One line of the users file.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    pub role: Role,
    pub token: String,
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    /// Directory order, as listed.
    users: Vec<ChatUser>,
    by_token: HashMap<String, usize>,
}

impl UserDirectory {
    pub fn from_entries(entries: Vec<DirectoryEntry>) -> Result<Self, DirectoryError> {
        let mut directory = Self::default();
        for entry in entries {
            if directory.get(&entry.id).is_some() {
                return Err(DirectoryError::DuplicateUser(entry.id));
            }
            if directory.by_token.contains_key(&entry.token) {
                return Err(DirectoryError::DuplicateToken(entry.id));
            }
            directory
                .by_token
                .insert(entry.token, directory.users.len());
            directory.users.push(ChatUser {
                id: entry.id,
                name: entry.name,
                role: entry.role,
            });
        }
        Ok(directory)
    }

    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<DirectoryEntry> = serde_json::from_str(&raw)?;
        Self::from_entries(entries)
    }

    /// A small fixed directory for local runs: one boss, one HR, two employees.
    /// Each token is `<id>-token`.
    pub fn demo() -> Self {
        let entry = |id: &str, name: &str, role| DirectoryEntry {
            id: id.to_string(),
            name: name.to_string(),
            role,
            token: format!("{id}-token"),
        };
        let entries = vec![
            entry("boss", "Bea Boss", Role::Boss),
            entry("hr", "Hal Resources", Role::Hr),
            entry("emp", "Emma Ployee", Role::Employee),
            entry("emp2", "Eli Ployee", Role::Employee),
        ];
        // Ids and tokens above are distinct.
        Self::from_entries(entries).unwrap_or_default()
    }

    pub fn authenticate(&self, token: &str) -> Option<&ChatUser> {
        self.by_token.get(token).map(|&idx| &self.users[idx])
    }

    pub fn get(&self, user_id: &str) -> Option<&ChatUser> {
        self.users.iter().find(|u| u.id == user_id)
    }

    pub fn all(&self) -> &[ChatUser] {
        &self.users
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// The authenticated caller of a REST handler.
#[derive(Debug, Clone)]
pub struct AuthUser(pub ChatUser);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(parts);

        async move {
            let token = token.ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;
            let user = app_state.users.authenticate(&token).cloned().ok_or_else(|| {
                tracing::debug!("rejected unknown bearer token");
                AppError::Unauthorized("unknown or expired token".into())
            })?;
            Ok(AuthUser(user))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}
