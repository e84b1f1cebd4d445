use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    auth::Authorized,
    error::{AppError, HtmlError},
    routes::pages,
    session::{self, COOKIE_NAME, CurrentSession},
    state::AppState,
    token::{TokenManager, authorize_url, with_token},
};

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /login
pub async fn login(
    State(state): State<AppState>,
    session: CurrentSession,
) -> Result<(CookieJar, Redirect), HtmlError> {
    let oauth_state = session::new_state();
    let url = authorize_url(&state.config, &oauth_state)?;
    state
        .sessions
        .with(&session.id, |s| s.oauth_state = Some(oauth_state))
        .await;
    Ok((session.jar, Redirect::to(&url)))
}

/// GET /callback?code=&state=&error=
pub async fn callback(
    State(state): State<AppState>,
    session: CurrentSession,
    Query(q): Query<CallbackQuery>,
) -> Result<Response, HtmlError> {
    // The pending state is single-use.
    let expected = state
        .sessions
        .with(&session.id, |s| s.oauth_state.take())
        .await;
    if expected.is_none() || q.state != expected {
        warn!("OAuth callback with mismatched state");
        return Err(AppError::Forbidden("Invalid state parameter".into()).into());
    }

    if let Some(error) = q.error {
        let page = pages::notice_page("Authorization Failed", &format!("Error: {error}"));
        return Ok((session.jar, Html(page)).into_response());
    }
    let Some(code) = q.code else {
        let page = pages::notice_page("Authorization Failed", "No authorization code received");
        return Ok((session.jar, Html(page)).into_response());
    };

    let tokens = TokenManager::exchange_code(&state.client, &state.config, &code).await?;
    if let Some(token) = tokens.current().await {
        info!("OAuth login completed, token valid until {}", token.expires_at);
    }
    state
        .sessions
        .with(&session.id, |s| s.tokens = Some(Arc::new(tokens)))
        .await;

    Ok((session.jar, Redirect::to("/")).into_response())
}

/// GET /logout
pub async fn logout(State(state): State<AppState>, session: CurrentSession) -> (CookieJar, Redirect) {
    state.sessions.destroy(&session.id).await;
    let jar = session.jar.remove(Cookie::build((COOKIE_NAME, "")).path("/"));
    (jar, Redirect::to("/"))
}

/// GET /me
pub async fn me(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
) -> Result<Html<String>, HtmlError> {
    let client = &state.client;
    let profile = with_token(&tokens, move |token| async move { client.me(&token).await }).await?;
    Ok(Html(pages::profile_page(&profile)))
}
