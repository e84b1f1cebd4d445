use axum::{
    Json,
    extract::{Path, Query, State},
    response::Html,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::info;

use crate::{
    auth::Authorized,
    download::{self, sanitize_filename, slug},
    error::{HtmlError, Result, SoundError},
    freesound::{SearchPage, SearchParams, SoundSummary},
    models::{DownloadInfo, DownloadRecord},
    routes::{FILES_ROUTE, pages},
    session::CurrentSession,
    state::AppState,
    token::{RetryBudget, TokenManager, with_token},
};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    pub filter: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
}

/// GET /search?query=&filter=&page=&page_size=
pub async fn search(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchPage>> {
    let mut params = SearchParams::new(q.query)
        .page(q.page.unwrap_or(1))
        .page_size(q.page_size.unwrap_or(15));
    if let Some(filter) = q.filter.filter(|f| !f.is_empty()) {
        params = params.filter(filter);
    }
    if let Some(sort) = q.sort {
        params = params.sort(sort);
    }

    info!("Searching for sounds with query: {:?}", params.query);
    let (client, params) = (&state.client, &params);
    let page = with_token(&tokens, move |token| async move {
        client.search(&token, params).await
    })
    .await?;

    info!("Found {} results", page.count);
    Ok(Json(page))
}

/// GET /sound/{id}
pub async fn sound_detail(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    Path(id): Path<u64>,
) -> Result<Json<serde_json::Value>> {
    let client = &state.client;
    let sound = with_token(&tokens, move |token| async move { client.sound(&token, id).await })
        .await?;
    Ok(Json(sound))
}

/// GET /api/sounds/{id}/download
///
/// The sound's name and the URL its original file can be fetched from, for
/// clients that download by themselves.
pub async fn download_info(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    Path(id): Path<u64>,
) -> Result<Json<DownloadInfo>> {
    info!("Getting download URL for sound #{id}");
    let client = &state.client;
    let sound = with_token(&tokens, move |token| async move { client.summary(&token, id).await })
        .await?;
    let download_url = sound
        .download
        .clone()
        .unwrap_or_else(|| client.download_endpoint(sound.id));
    info!("Download URL acquired for {:?}", sound.name);
    Ok(Json(DownloadInfo {
        name: sound.name,
        download_url,
    }))
}

/// GET /download/{id}
///
/// Saves the original file into the download directory and records it in
/// the session's history.
pub async fn download_sound(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    session: CurrentSession,
    Path(id): Path<u64>,
) -> std::result::Result<(CookieJar, Html<String>), HtmlError> {
    info!("Fetching download for sound #{id}");
    let budget = RetryBudget::default();
    let client = &state.client;
    let sound = budget
        .with_token(&tokens, move |token| async move { client.summary(&token, id).await })
        .await?;
    save_sound(&state, &tokens, &budget, session, sound).await
}

/// GET /download-random
///
/// Downloads one random sound between one and five seconds long.
pub async fn download_random(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    session: CurrentSession,
) -> std::result::Result<(CookieJar, Html<String>), HtmlError> {
    let budget = RetryBudget::default();
    let params = SearchParams::new(RANDOM_QUERY)
        .filter(RANDOM_DURATION_FILTER)
        .sort("random")
        .page_size(1);
    let (client, params) = (&state.client, &params);
    let page = budget
        .with_token(&tokens, move |token| async move { client.search(&token, params).await })
        .await?;
    let sound = page
        .results
        .into_iter()
        .next()
        .ok_or_else(|| SoundError::NoMatch(RANDOM_QUERY.into()))?;
    info!("Found random sound: {:?} (ID: {})", sound.name, sound.id);

    save_sound(&state, &tokens, &budget, session, sound).await
}

const RANDOM_QUERY: &str = "*";
const RANDOM_DURATION_FILTER: &str = "duration:[1 TO 5]";

/// Longest slug kept from a sound name, leaving room for the id and
/// extension within the 100-character file name cap.
const MAX_NAME_SLUG: usize = 72;

/// File name for a single download: the slugged sound name, its id and the
/// extension.
fn single_filename(sound: &SoundSummary) -> String {
    let name: String = slug(&sound.name).chars().take(MAX_NAME_SLUG).collect();
    sanitize_filename(&format!("{name}_{}.{}", sound.id, sound.extension()))
}

/// Download `sound` into the download directory, record it in the session's
/// history and render the result page.
async fn save_sound(
    state: &AppState,
    tokens: &TokenManager,
    budget: &RetryBudget,
    session: CurrentSession,
    sound: SoundSummary,
) -> std::result::Result<(CookieJar, Html<String>), HtmlError> {
    let client = &state.client;
    let url = sound
        .download
        .clone()
        .unwrap_or_else(|| client.download_endpoint(sound.id));
    let filename = single_filename(&sound);
    let dest = state.config.download_dir.join(&filename);

    let (http, url_ref, dest_ref) = (client.http(), url.as_str(), dest.as_path());
    let bytes = budget
        .with_token(tokens, move |token| async move {
            download::download(http, url_ref, &token, dest_ref).await
        })
        .await?;
    info!("Sound saved to {} ({bytes} bytes)", dest.display());

    let record = DownloadRecord {
        id: sound.id,
        name: sound.name.clone(),
        link: format!("{FILES_ROUTE}/{filename}"),
        path: filename.clone(),
        date: chrono::Utc::now().to_rfc3339(),
    };
    state
        .sessions
        .with(&session.id, |s| s.record_download(record))
        .await;

    Ok((session.jar, Html(pages::download_page(&sound, &filename))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sound(name: &str) -> SoundSummary {
        serde_json::from_value(serde_json::json!({
            "id": 42, "name": name, "duration": 1.0, "type": "flac",
        }))
        .unwrap()
    }

    #[test]
    fn single_filenames_are_slugged_and_capped() {
        assert_eq!(single_filename(&sound("Rain on Roof")), "rain_on_roof_42.flac");

        let long = single_filename(&sound(&"very long name ".repeat(40)));
        assert!(long.len() <= 100);
        assert!(long.starts_with("very_long_name_very_long_name_"));
        assert!(long.ends_with("_42.flac"));
    }
}
