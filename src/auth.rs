use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;

use crate::{config::AuthMode, session, state::AppState, token::TokenManager};

// ── Extractor: Freesound credentials ──────────────────────────────────────────

/// The token manager a request should use.
///
/// A session that completed the OAuth login always uses its own tokens. In
/// `client_credentials` mode other requests share the service token; in
/// `oauth2` mode they are rejected.
#[derive(Debug, Clone)]
pub struct Authorized(pub Arc<TokenManager>);

impl FromRequestParts<AppState> for Authorized {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        if let Some(id) = session::session_id(&jar, &state.config.session_secret) {
            let tokens = state.sessions.read(&id, |s| s.tokens.clone()).await.flatten();
            if let Some(tokens) = tokens {
                return Ok(Authorized(tokens));
            }
        }

        match state.config.auth_mode {
            AuthMode::ClientCredentials => Ok(Authorized(Arc::clone(&state.tokens))),
            AuthMode::Oauth2 => Err(AuthRejection {
                browser: wants_html(&parts.headers),
            }),
        }
    }
}

fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/html"))
}

/// Browsers are sent to `/login`; API clients get a 401.
#[derive(Debug)]
pub struct AuthRejection {
    browser: bool,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        if self.browser {
            return Redirect::to("/login").into_response();
        }
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_header_decides_the_rejection_shape() {
        let mut headers = HeaderMap::new();
        assert!(!wants_html(&headers));
        headers.insert(header::ACCEPT, "text/html,application/xhtml+xml".parse().unwrap());
        assert!(wants_html(&headers));

        let resp = AuthRejection { browser: true }.into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[header::LOCATION], "/login");

        let resp = AuthRejection { browser: false }.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
