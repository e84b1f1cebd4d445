use std::path::Path;

use axum::{Json, extract::State, response::Html};
use axum_extra::extract::cookie::CookieJar;
use tracing::{info, warn};

use crate::{
    auth::Authorized,
    error::{AppError, HtmlError, Result, SoundError},
    models::{
        BatchDownloadRequest, BatchDownloadResponse, BatchResultEntry, DownloadRecord,
        SelectedSound, SoundEffect,
    },
    pipeline::{DownloadOutcome, Pipeline, SearchPolicy, SoundKind, SoundRequest},
    routes::{SCENE_FILES_ROUTE, pages},
    scene,
    session::CurrentSession,
    state::AppState,
};

fn effect_request(effect: &SoundEffect) -> SoundRequest {
    SoundRequest {
        title: effect.title.clone(),
        kind: SoundKind::Effect {
            sequence: effect.sequence,
        },
        query: effect.title.clone(),
        target_duration: Some(effect.duration),
        volume: None,
        looped: None,
    }
}

fn result_entry(outcome: &DownloadOutcome) -> BatchResultEntry {
    let sequence = match outcome.request.kind {
        SoundKind::Effect { sequence } => sequence,
        _ => 0,
    };
    BatchResultEntry {
        sequence,
        title: outcome.request.title.clone(),
        status: outcome.status(),
        selected_sound: outcome.selected.as_ref().map(|s| SelectedSound {
            id: s.id,
            name: s.name.clone(),
            duration: s.duration,
            license: s.license.clone(),
            username: s.username.clone(),
        }),
        saved_path: outcome
            .saved_path
            .as_ref()
            .map(|p| p.display().to_string()),
        error: outcome.error.as_ref().map(|e| e.message.clone()),
    }
}

/// POST /api/batch-download-sounds
pub async fn batch_download(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    Json(req): Json<BatchDownloadRequest>,
) -> Result<Json<BatchDownloadResponse>> {
    let effects = req.sound_effects.filter(|e| !e.is_empty()).ok_or_else(|| {
        AppError::BadRequest(
            "Invalid input: expected a JSON object with a non-empty \"soundEffects\" array".into(),
        )
    })?;

    for effect in effects.iter().filter(|e| e.description.is_some()) {
        info!(
            "[#{}] {:?}: {}",
            effect.sequence,
            effect.title,
            effect.description.as_deref().unwrap_or_default()
        );
    }

    let requests = effects.iter().map(effect_request).collect();
    let report = Pipeline::new(
        &state.client,
        &tokens,
        SearchPolicy::from_config(&state.config),
        &state.config.download_dir,
    )
    .with_events(&state.events)
    .with_batch_id(req.batch_id)
    .run(requests)
    .await?;

    Ok(Json(BatchDownloadResponse {
        message: "Batch processing finished. Check results array for details.".into(),
        download_directory: state.config.download_dir.display().to_string(),
        results: report.outcomes.iter().map(result_entry).collect(),
    }))
}

/// GET /process-audio-json
///
/// Reads the scene descriptor, replaces the scene folder with freshly
/// downloaded sounds and writes the mapping manifest for the game client.
pub async fn process_scene(
    State(state): State<AppState>,
    Authorized(tokens): Authorized,
    session: CurrentSession,
) -> std::result::Result<(CookieJar, Html<String>), HtmlError> {
    let path = &state.config.scene_file;
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound(format!("{} file not found!", path.display())).into());
        }
        Err(e) => return Err(SoundError::from(e).into()),
    };
    let scene = scene::parse_scene(&text)?;

    // Fail before the scene folder is wiped if no token can be had at all.
    tokens.token().await?;

    let scene_dir = state.config.scene_dir();
    reset_dir(&scene_dir).await?;

    let report = Pipeline::new(
        &state.client,
        &tokens,
        SearchPolicy::from_config(&state.config),
        &scene_dir,
    )
    .with_events(&state.events)
    .run(scene.requests())
    .await?;

    let manifest = scene::emit(&report.outcomes, &state.config.manifest_path()).await?;

    let date = chrono::Utc::now().to_rfc3339();
    let records: Vec<DownloadRecord> = report
        .successful()
        .filter_map(|o| {
            let sound = o.selected.as_ref()?;
            let filename = o.saved_filename.clone()?;
            Some(DownloadRecord {
                id: sound.id,
                name: sound.name.clone(),
                link: format!("{SCENE_FILES_ROUTE}/{filename}"),
                path: filename,
                date: date.clone(),
            })
        })
        .collect();
    state
        .sessions
        .with(&session.id, |s| records.into_iter().for_each(|r| s.record_download(r)))
        .await;

    let page = pages::scene_page(&report, &manifest, &scene_dir.display().to_string());
    Ok((session.jar, Html(page)))
}

/// Remove `dir` and everything in it, then recreate it empty.
async fn reset_dir(dir: &Path) -> std::result::Result<(), SoundError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => info!("Removed existing scene folder: {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!("Could not remove {}: {e}", dir.display());
            return Err(SoundError::FileSystem(format!("remove {}: {e}", dir.display())));
        }
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SoundError::FileSystem(format!("create {}: {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reset_dir_empties_existing_folder() {
        let dir = tempfile::tempdir().unwrap();
        let scene_dir = dir.path().join("Sounds/current_scene");
        std::fs::create_dir_all(&scene_dir).unwrap();
        std::fs::write(scene_dir.join("stale.wav"), b"old").unwrap();

        reset_dir(&scene_dir).await.unwrap();

        assert!(scene_dir.is_dir());
        assert_eq!(std::fs::read_dir(&scene_dir).unwrap().count(), 0);

        let fresh = dir.path().join("never/existed");
        reset_dir(&fresh).await.unwrap();
        assert!(fresh.is_dir());
    }

    #[test]
    fn effects_search_by_title() {
        let request = effect_request(&SoundEffect {
            sequence: 7,
            title: "glass shatter".into(),
            description: Some("a wine glass".into()),
            duration: 1.25,
        });
        assert_eq!(request.query, "glass shatter");
        assert_eq!(request.kind, SoundKind::Effect { sequence: 7 });
        assert_eq!(request.target_duration, Some(1.25));
    }
}
