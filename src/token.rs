/// Bearer-token cache for the Freesound API.
///
/// A `TokenManager` owns exactly one token slot. In client-credentials mode a
/// single manager is shared by the whole service; in OAuth2 mode every
/// session gets its own, seeded by the authorization-code exchange.
use std::{
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{config::AppConfig, error::SoundError, freesound::FreesoundClient};

#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    /// Already shortened by the refresh margin.
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
}

impl Token {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_expires_in() -> i64 {
    86_400
}

/// Which grant renews an expired token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    ClientCredentials,
    RefreshToken,
}

#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    grant: Grant,
    margin: chrono::Duration,
    slot: Mutex<Option<Token>>,
}

impl TokenManager {
    fn with_grant(client: &FreesoundClient, config: &AppConfig, grant: Grant) -> Self {
        Self {
            http: client.http().clone(),
            token_url: format!("{}/oauth2/access_token/", client.api_base()),
            client_id: config.freesound_client_id.clone(),
            client_secret: config.freesound_client_secret.clone(),
            grant,
            margin: chrono::Duration::seconds(config.token_refresh_margin_secs),
            slot: Mutex::new(None),
        }
    }

    /// Shared manager that renews through the client-credentials grant.
    pub fn client_credentials(client: &FreesoundClient, config: &AppConfig) -> Self {
        Self::with_grant(client, config, Grant::ClientCredentials)
    }

    /// Exchange an authorization code for a token; the returned manager
    /// renews through the refresh-token grant.
    pub async fn exchange_code(
        client: &FreesoundClient,
        config: &AppConfig,
        code: &str,
    ) -> Result<Self, SoundError> {
        let manager = Self::with_grant(client, config, Grant::RefreshToken);
        let token = manager
            .request(&[("grant_type", "authorization_code"), ("code", code)])
            .await?;
        *manager.slot.lock().await = Some(token);
        Ok(manager)
    }

    /// Return a valid token, refreshing it first if it is missing or stale.
    ///
    /// The slot lock is held across the refresh, so callers racing on an
    /// expired token share a single network call.
    pub async fn token(&self) -> Result<String, SoundError> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let fresh = match self.grant {
            Grant::ClientCredentials => {
                info!("Requesting new client-credentials token");
                self.request(&[("grant_type", "client_credentials")]).await?
            }
            Grant::RefreshToken => {
                let refresh = slot
                    .as_ref()
                    .and_then(|t| t.refresh_token.clone())
                    .ok_or_else(|| SoundError::Auth("no refresh token, log in again".into()))?;
                info!("Access token is about to expire, refreshing");
                let mut token = self
                    .request(&[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())])
                    .await?;
                // Freesound may omit a new refresh token; keep the old one.
                token.refresh_token.get_or_insert(refresh);
                token
            }
        };

        let value = fresh.value.clone();
        *slot = Some(fresh);
        Ok(value)
    }

    /// Force the next [`token`](Self::token) call to refresh.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        *slot = slot.take().map(|t| Token {
            expires_at: DateTime::<Utc>::MIN_UTC,
            ..t
        });
    }

    pub async fn current(&self) -> Option<Token> {
        self.slot.lock().await.clone()
    }

    async fn request(&self, grant: &[(&str, &str)]) -> Result<Token, SoundError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| SoundError::Auth(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Token endpoint returned HTTP {status}: {body}");
            return Err(SoundError::Auth(format!("HTTP {status}: {body}")));
        }

        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| SoundError::Auth(format!("malformed token response: {e}")))?;

        info!("New token acquired, expires in {} seconds", body.expires_in);
        Ok(Token {
            value: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in) - self.margin,
            refresh_token: body.refresh_token,
        })
    }
}

/// The single automatic token retry allowed per request. Every API call made
/// on behalf of one request (a whole batch run, or one route invocation)
/// shares the same budget, so a token the API keeps rejecting costs at most
/// one refresh.
#[derive(Debug, Default)]
pub struct RetryBudget {
    spent: AtomicBool,
}

impl RetryBudget {
    /// Claim the retry. Only the first caller gets `true`.
    fn take(&self) -> bool {
        !self.spent.swap(true, Ordering::SeqCst)
    }

    #[cfg(test)]
    fn is_spent(&self) -> bool {
        self.spent.load(Ordering::SeqCst)
    }

    /// Run `call` with a valid token. If the API rejects the token and the
    /// budget is unspent, refresh it and retry once; otherwise the rejection
    /// is returned to the caller.
    pub async fn with_token<T, F, Fut>(
        &self,
        tokens: &TokenManager,
        mut call: F,
    ) -> Result<T, SoundError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, SoundError>>,
    {
        let token = tokens.token().await?;
        match call(token).await {
            Err(e) if e.is_auth() && self.take() => {
                warn!("Token rejected ({e}), refreshing and retrying once");
                tokens.invalidate().await;
                let token = tokens.token().await?;
                call(token).await
            }
            Err(e) if e.is_auth() => {
                warn!("Token rejected again ({e}), giving up");
                Err(e)
            }
            other => other,
        }
    }
}

/// [`RetryBudget::with_token`] with a fresh budget, for requests that make a
/// single API call.
pub async fn with_token<T, F, Fut>(tokens: &TokenManager, call: F) -> Result<T, SoundError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T, SoundError>>,
{
    RetryBudget::default().with_token(tokens, call).await
}

/// Freesound authorization page for the code flow.
pub fn authorize_url(config: &AppConfig, state: &str) -> Result<String, SoundError> {
    let base = format!(
        "{}/oauth2/authorize/",
        config.freesound_api_base.trim_end_matches('/')
    );
    reqwest::Url::parse_with_params(
        &base,
        &[
            ("client_id", config.freesound_client_id.as_str()),
            ("response_type", "code"),
            ("state", state),
        ],
    )
    .map(String::from)
    .map_err(|e| SoundError::Invalid(format!("bad authorize URL: {e}")))
}
