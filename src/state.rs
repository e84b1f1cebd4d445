use std::sync::Arc;
use tokio::sync::broadcast;

use crate::{
    config::AppConfig, freesound::FreesoundClient, models::PipelineEvent, session::SessionStore,
    token::TokenManager,
};

/// Shared application state injected into every Axum handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub client: FreesoundClient,
    /// Service-wide client-credentials token.
    pub tokens: Arc<TokenManager>,
    pub sessions: SessionStore,
    /// Broadcast channel for real-time WebSocket events.
    pub events: broadcast::Sender<PipelineEvent>,
}

impl AppState {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let client = FreesoundClient::new(&config)?;
        let tokens = Arc::new(TokenManager::client_credentials(&client, &config));
        let (events, _) = broadcast::channel::<PipelineEvent>(256);
        let sessions = SessionStore::new(
            chrono::Duration::seconds(config.session_ttl_secs),
            config.max_sessions,
        );
        Ok(Self {
            config: Arc::new(config),
            client,
            tokens,
            sessions,
            events,
        })
    }
}
