mod auth;
mod config;
mod download;
mod error;
mod freesound;
mod matching;
mod models;
mod pipeline;
mod routes;
mod scene;
mod session;
mod state;
mod token;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::AuthMode, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soundbridge=info,tower_http=info".into()),
        )
        .with(fmt::layer())
        .init();

    // ── Config ───────────────────────────────────────────────────────────────
    let config = config::AppConfig::from_env()?;
    info!(
        "Starting soundbridge ({:?} auth), binding to {}",
        config.auth_mode, config.bind
    );
    if config.freesound_client_id.is_empty() || config.freesound_client_secret.is_empty() {
        warn!("FREESOUND_CLIENT_ID / FREESOUND_CLIENT_SECRET not set; Freesound calls will fail");
    }
    if config.auth_mode == AuthMode::Oauth2 {
        info!("OAuth2 redirect URI: {}", config.freesound_redirect_uri);
    }

    // Ensure download directory exists
    tokio::fs::create_dir_all(&config.download_dir).await?;
    info!("Downloads go to {}", config.download_dir.display());
    info!("Scene sounds go to {}", config.scene_dir().display());

    // ── Application state ─────────────────────────────────────────────────────
    let bind = config.bind.clone();
    let state = AppState::new(config)?;

    // ── HTTP server ───────────────────────────────────────────────────────────
    let router = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{bind}");

    axum::serve(listener, router).await?;

    Ok(())
}
