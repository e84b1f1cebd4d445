use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

/// How the service obtains Freesound bearer tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// One shared token from the client-credentials grant.
    ClientCredentials,
    /// Per-session tokens from the authorization-code flow (`/login`).
    Oauth2,
}

/// Application configuration, loaded from environment variables / .env.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Bind address for the HTTP server.
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub freesound_client_id: String,

    #[serde(default)]
    pub freesound_client_secret: String,

    /// Must match the redirect URI registered with the Freesound API credential.
    #[serde(default = "default_redirect_uri")]
    pub freesound_redirect_uri: String,

    /// Base URL of the Freesound API, without a trailing slash.
    #[serde(default = "default_api_base")]
    pub freesound_api_base: String,

    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,

    /// Directory for single and batch downloads.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Scene descriptor read by `/process-audio-json`.
    #[serde(default = "default_scene_file")]
    pub scene_file: PathBuf,

    /// The game client's StreamingAssets directory. The manifest is written
    /// here and scene sounds go under `Sounds/<scene_folder>`.
    #[serde(default = "default_unity_assets_dir")]
    pub unity_assets_dir: PathBuf,

    #[serde(default = "default_scene_folder")]
    pub scene_folder: String,

    /// Seconds either side of the target duration for the primary search.
    #[serde(default = "default_duration_tolerance")]
    pub duration_tolerance: f64,

    #[serde(default = "default_batch_page_size")]
    pub batch_page_size: u32,

    #[serde(default = "default_fallback_page_size")]
    pub fallback_page_size: u32,

    /// Retry an empty or failed primary search without the duration filter.
    #[serde(default = "default_search_fallback")]
    pub search_fallback: bool,

    /// Subtracted from the server-reported token lifetime.
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: i64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Key used to sign session cookies.
    #[serde(default = "default_session_secret")]
    pub session_secret: String,

    /// Sessions idle for longer than this are dropped.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,

    /// Upper bound on live sessions; the least recently used is evicted.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}
fn default_redirect_uri() -> String {
    "http://localhost:3000/callback".to_string()
}
fn default_api_base() -> String {
    "https://freesound.org/apiv2".to_string()
}
fn default_auth_mode() -> AuthMode {
    AuthMode::ClientCredentials
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloaded_sounds")
}
fn default_scene_file() -> PathBuf {
    PathBuf::from("audio.json")
}
fn default_unity_assets_dir() -> PathBuf {
    PathBuf::from("Unity/Assets/StreamingAssets")
}
fn default_scene_folder() -> String {
    "current_scene".to_string()
}
fn default_duration_tolerance() -> f64 {
    0.75
}
fn default_batch_page_size() -> u32 {
    20
}
fn default_fallback_page_size() -> u32 {
    15
}
fn default_search_fallback() -> bool {
    true
}
fn default_token_refresh_margin_secs() -> i64 {
    60
}
fn default_http_timeout_secs() -> u64 {
    60
}
fn default_session_secret() -> String {
    "change-me-in-production".to_string()
}
fn default_session_ttl_secs() -> i64 {
    86_400
}
fn default_max_sessions() -> usize {
    10_000
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present (ignore errors, it may not exist)
        let _ = dotenvy::dotenv();

        envy::from_env::<AppConfig>().context("Failed to load config from environment")
    }

    /// Folder that receives the sounds of the current scene.
    pub fn scene_dir(&self) -> PathBuf {
        self.unity_assets_dir.join("Sounds").join(&self.scene_folder)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.unity_assets_dir.join(crate::scene::MANIFEST_FILE_NAME)
    }

    /// A config with every default applied, pointed at `api_base`.
    #[cfg(test)]
    pub fn for_tests(api_base: &str, root: &std::path::Path) -> Self {
        let mut config: AppConfig =
            serde_json::from_str("{}").expect("defaults deserialize from an empty object");
        config.freesound_api_base = api_base.trim_end_matches('/').to_string();
        config.freesound_client_id = "client".into();
        config.freesound_client_secret = "secret".into();
        config.download_dir = root.join("downloads");
        config.scene_file = root.join("audio.json");
        config.unity_assets_dir = root.join("StreamingAssets");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_every_field() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bind, "0.0.0.0:3000");
        assert_eq!(config.auth_mode, AuthMode::ClientCredentials);
        assert_eq!(config.duration_tolerance, 0.75);
        assert_eq!(config.batch_page_size, 20);
        assert!(config.search_fallback);
        assert_eq!(config.session_ttl_secs, 86_400);
        assert_eq!(config.max_sessions, 10_000);
    }

    #[test]
    fn auth_mode_parses_snake_case() {
        let config: AppConfig = serde_json::from_str(r#"{"auth_mode":"oauth2"}"#).unwrap();
        assert_eq!(config.auth_mode, AuthMode::Oauth2);
    }

    #[test]
    fn scene_paths_derive_from_assets_dir() {
        let config: AppConfig =
            serde_json::from_str(r#"{"unity_assets_dir":"/game/StreamingAssets"}"#).unwrap();
        assert_eq!(
            config.scene_dir(),
            PathBuf::from("/game/StreamingAssets/Sounds/current_scene")
        );
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("/game/StreamingAssets/unity_sound_mappings.json")
        );
    }
}
