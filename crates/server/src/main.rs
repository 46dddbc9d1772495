//! corpchat-server binary.

use anyhow::Context;
use corpchat_server::{AppState, ServerConfig, UserDirectory};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corpchat_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let users = match &config.users_file {
        Some(path) => UserDirectory::load(path)
            .with_context(|| format!("loading users from {}", path.display()))?,
        None => {
            tracing::warn!("CORPCHAT_USERS_FILE not set, using the demo directory");
            UserDirectory::demo()
        }
    };
    tracing::info!("{} users in directory", users.len());

    let addr = config.bind;
    let app = corpchat_server::app(AppState::new(config, users));

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, app).await?;
    Ok(())
}
