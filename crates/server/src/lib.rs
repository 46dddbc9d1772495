//! corpchat-server - in-memory backend for the corpchat messaging core.
//!
//! Serves the REST API under `/api`, the event socket at `/socket` and
//! uploaded files under `/uploads`.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use corpchat_shared::SOCKET_PATH;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use auth::UserDirectory;
pub use config::ServerConfig;
pub use state::AppState;

/// Multipart framing on top of the file itself.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the router for `state`.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let upload_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let api = Router::new()
        // Conversations
        .route("/chat", get(routes::chat::list_chats))
        .route("/chat/users", get(routes::chat::list_users))
        .route("/chat/private", post(routes::chat::open_private_chat))
        .route(
            "/chat/upload",
            post(routes::upload::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/chat/{chat_id}", get(routes::chat::chat_history))
        .route("/chat/{chat_id}/message", post(routes::chat::send_message))
        // Message requests
        .route(
            "/message-requests",
            get(routes::requests::incoming).post(routes::requests::create),
        )
        .route("/message-requests/outgoing", get(routes::requests::outgoing))
        .route("/message-requests/{request_id}/accept", put(routes::requests::accept))
        .route("/message-requests/{request_id}/reject", put(routes::requests::reject))
        // Collaborator hooks
        .route("/leaves/unread-count", get(routes::collaborators::leave_unread_count))
        .route("/leaves/read", put(routes::collaborators::mark_leaves_read))
        .route("/leaves/notify", post(routes::collaborators::notify_leave))
        .route("/tickets/notify", post(routes::collaborators::notify_ticket));

    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .nest("/api", api)
        .route(SOCKET_PATH, get(ws::ws_handler))
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
