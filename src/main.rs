use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use superchat::{
    auth,
    chat::Chat,
    config::Config,
    store::{DocumentStore, MemoryStore, SqliteStore},
    AppState,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore as SessionStore, SessionManagerLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("superchat=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn DocumentStore> = match &config.database_url {
        Some(url) => Arc::new(SqliteStore::connect(url).await.context("opening the database")?),
        None => {
            warn!("DATABASE_URL not set; chats live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let secrets = std::fs::read_to_string(&config.client_secrets)
        .with_context(|| format!("reading {}", config.client_secrets.display()))?;
    let clients = auth::Clients::from_json(serde_json::from_str(&secrets)?, &config.public_url)
        .map_err(|err| err.0)?;

    let session_layer = SessionManagerLayer::new(SessionStore::default())
        .with_secure(config.public_url.starts_with("https://"))
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::minutes(config.session_idle_minutes)));

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_str(&config.public_url)?)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let app = superchat::router(AppState { chat: Chat::new(store), clients })
        .layer(session_layer)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, public_url = %config.public_url, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
