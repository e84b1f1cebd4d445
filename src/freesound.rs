/// Thin client for the Freesound apiv2 endpoints the service proxies.
///
/// Every call takes the bearer token explicitly; token lifetime is handled
/// by [`crate::token::TokenManager`].
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{config::AppConfig, error::SoundError};

/// Fields requested when the caller does not project its own.
pub const DEFAULT_FIELDS: &str = "id,name,duration,previews,download,license,username,type";

// ── Response shapes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub results: Vec<SoundSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundSummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Seconds. Missing durations sort as zero-length clips.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previews: Option<Previews>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Previews {
    #[serde(rename = "preview-hq-mp3", default, skip_serializing_if = "Option::is_none")]
    pub hq_mp3: Option<String>,
    #[serde(rename = "preview-lq-mp3", default, skip_serializing_if = "Option::is_none")]
    pub lq_mp3: Option<String>,
}

impl SoundSummary {
    /// File extension for the original upload. Accepts both `wav` and the
    /// MIME-style `audio/wav`; falls back to `wav`.
    pub fn extension(&self) -> &str {
        self.file_type
            .as_deref()
            .map(|t| t.rsplit('/').next().unwrap_or(t))
            .filter(|t| !t.is_empty())
            .unwrap_or("wav")
    }

    pub fn preview_url(&self) -> Option<&str> {
        self.previews.as_ref().and_then(|p| p.hq_mp3.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Avatar {
    #[serde(default)]
    pub medium: Option<String>,
}

// ── Search parameters ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub filter: Option<String>,
    pub fields: String,
    pub page: Option<u32>,
    pub page_size: u32,
    pub sort: Option<String>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: None,
            fields: DEFAULT_FIELDS.to_string(),
            page: None,
            page_size: 15,
            sort: None,
        }
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("query", self.query.clone()),
            ("fields", self.fields.clone()),
            ("page_size", self.page_size.to_string()),
        ];
        if let Some(f) = &self.filter {
            q.push(("filter", f.clone()));
        }
        if let Some(p) = self.page {
            q.push(("page", p.to_string()));
        }
        if let Some(s) = &self.sort {
            q.push(("sort", s.clone()));
        }
        q
    }
}

/// `duration:[min TO max]` around `target`, with `min` clamped at zero.
pub fn duration_filter(target: f64, tolerance: f64) -> String {
    let min = (target - tolerance).max(0.0);
    let max = target + tolerance;
    format!("duration:[{min:.1} TO {max:.1}]")
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FreesoundClient {
    http: reqwest::Client,
    api_base: String,
}

impl FreesoundClient {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!("soundbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            api_base: config.freesound_api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Canonical download endpoint for a sound, used when a search result
    /// carries no `download` link.
    pub fn download_endpoint(&self, sound_id: u64) -> String {
        format!("{}/sounds/{sound_id}/download/", self.api_base)
    }

    /// GET /search/text/
    pub async fn search(&self, token: &str, params: &SearchParams) -> Result<SearchPage, SoundError> {
        if params.query.trim().is_empty() {
            return Err(SoundError::Invalid("query must not be empty".into()));
        }

        let url = format!("{}/search/text/", self.api_base);
        tracing::debug!(
            "Freesound search {:?} (filter: {:?}, page_size: {})",
            params.query,
            params.filter,
            params.page_size
        );

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&params.to_query())
            .send()
            .await
            .map_err(|e| SoundError::Search {
                status: 502,
                body: e.to_string(),
            })?;

        let resp = check_status(resp).await?;
        resp.json::<SearchPage>().await.map_err(|e| SoundError::Search {
            status: 502,
            body: format!("malformed search response: {e}"),
        })
    }

    /// GET /sounds/{id}/, returned verbatim.
    pub async fn sound(&self, token: &str, id: u64) -> Result<serde_json::Value, SoundError> {
        let url = format!("{}/sounds/{id}/", self.api_base);
        self.get_json(&url, token).await
    }

    /// GET /sounds/{id}/, decoded into the fields the service uses.
    pub async fn summary(&self, token: &str, id: u64) -> Result<SoundSummary, SoundError> {
        let value = self.sound(token, id).await?;
        serde_json::from_value(value).map_err(|e| SoundError::Search {
            status: 502,
            body: format!("malformed sound #{id}: {e}"),
        })
    }

    /// GET /me/
    pub async fn me(&self, token: &str) -> Result<UserProfile, SoundError> {
        let url = format!("{}/me/", self.api_base);
        let value = self.get_json(&url, token).await?;
        serde_json::from_value(value).map_err(|e| SoundError::Search {
            status: 502,
            body: format!("malformed profile: {e}"),
        })
    }

    async fn get_json(&self, url: &str, token: &str) -> Result<serde_json::Value, SoundError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SoundError::Search {
                status: 502,
                body: e.to_string(),
            })?;
        let resp = check_status(resp).await?;
        resp.json().await.map_err(|e| SoundError::Search {
            status: 502,
            body: e.to_string(),
        })
    }
}

/// Map a non-2xx response to [`SoundError`], keeping the remote body.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SoundError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SoundError::Auth(body));
    }
    Err(SoundError::Search {
        status: status.as_u16(),
        body,
    })
}
