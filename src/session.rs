/// Browser sessions: a signed cookie carrying an opaque id, mapped to
/// in-memory state (OAuth `state`, per-session tokens, download history).
use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    sync::Arc,
};

use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{models::DownloadRecord, state::AppState, token::TokenManager};

pub const COOKIE_NAME: &str = "soundbridge_session";

/// Number of downloads remembered per session.
pub const HISTORY_LIMIT: usize = 10;

#[derive(Debug)]
pub struct Session {
    /// Pending CSRF state for the authorization-code flow.
    pub oauth_state: Option<String>,
    pub tokens: Option<Arc<TokenManager>>,
    /// Newest first.
    pub downloads: VecDeque<DownloadRecord>,
    pub last_seen: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            oauth_state: None,
            tokens: None,
            downloads: VecDeque::new(),
            last_seen: Utc::now(),
        }
    }
}

impl Session {
    pub fn record_download(&mut self, record: DownloadRecord) {
        self.downloads.push_front(record);
        self.downloads.truncate(HISTORY_LIMIT);
    }
}

/// In-memory sessions. Idle sessions expire after `ttl`, and the store never
/// holds more than `capacity` of them.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
    ttl: chrono::Duration,
    capacity: usize,
}

impl SessionStore {
    pub fn new(ttl: chrono::Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Run `f` against the session `id`, creating it if needed.
    pub async fn with<T>(&self, id: &str, f: impl FnOnce(&mut Session) -> T) -> T {
        let now = Utc::now();
        let mut map = self.inner.write().await;
        if !map.contains_key(id) {
            self.prune(&mut map, now);
        }
        let session = map.entry(id.to_string()).or_default();
        session.last_seen = now;
        f(session)
    }

    /// Drop expired sessions, then evict the least recently seen until there
    /// is room for one more.
    fn prune(&self, map: &mut HashMap<String, Session>, now: DateTime<Utc>) {
        let before = map.len();
        map.retain(|_, s| now - s.last_seen < self.ttl);
        while map.len() >= self.capacity {
            let Some(oldest) = map
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            map.remove(&oldest);
        }
        if map.len() < before {
            debug!("Pruned {} session(s)", before - map.len());
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Run `f` against the session `id` if it exists.
    pub async fn read<T>(&self, id: &str, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.inner.read().await.get(id).map(f)
    }

    pub async fn destroy(&self, id: &str) {
        self.inner.write().await.remove(id);
    }
}

// ── Cookie signing ─────────────────────────────────────────────────────────────
// Cookie value: base64url(session_id + ":" + sha256(secret ":" session_id)).

fn keyed_hash(secret: &str, data: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut h = Sha256::new();
    h.update(secret.as_bytes());
    h.update(b":");
    h.update(data.as_bytes());
    hex::encode(h.finalize())
}

pub fn sign(session_id: &str, secret: &str) -> String {
    let mac = keyed_hash(secret, session_id);
    URL_SAFE_NO_PAD.encode(format!("{session_id}:{mac}"))
}

/// Return the session id if `value` was signed with `secret`.
pub fn verify(value: &str, secret: &str) -> Option<String> {
    let decoded = URL_SAFE_NO_PAD.decode(value).ok()?;
    let s = String::from_utf8(decoded).ok()?;
    let (session_id, mac) = s.split_once(':')?;
    let expected = keyed_hash(secret, session_id);
    constant_time_eq(expected.as_bytes(), mac.as_bytes()).then(|| session_id.to_string())
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Session id from the request cookies, if present and correctly signed.
pub fn session_id(jar: &CookieJar, secret: &str) -> Option<String> {
    jar.get(COOKIE_NAME).and_then(|c| verify(c.value(), secret))
}

/// Random value for the OAuth `state` parameter.
pub fn new_state() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

// ── Extractor: current session ─────────────────────────────────────────────────

/// The caller's session id, plus a cookie jar that sets the session cookie
/// when the request did not carry a valid one. Handlers must return `jar`
/// for a new session to stick.
#[derive(Debug)]
pub struct CurrentSession {
    pub id: String,
    pub jar: CookieJar,
}

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let secret = &state.config.session_secret;
        if let Some(id) = session_id(&jar, secret) {
            return Ok(Self { id, jar });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let cookie = Cookie::build((COOKIE_NAME, sign(&id, secret)))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax);
        Ok(Self {
            jar: jar.add(cookie),
            id,
        })
    }
}
