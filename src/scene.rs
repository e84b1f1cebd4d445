/// Scene descriptors in, sound-mapping manifests out.
///
/// A scene descriptor lists the interaction sounds wanted per game object
/// plus an optional background track. The manifest binds every downloaded
/// file back to its object for the game client.
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::SoundError,
    pipeline::{DownloadOutcome, SoundKind, SoundRequest},
};

pub const MANIFEST_FILE_NAME: &str = "unity_sound_mappings.json";

/// The only descriptor layout this build understands.
pub const SCENE_FORMAT_VERSION: u32 = 1;

pub const DEFAULT_VOLUME: f32 = 0.5;

// ── Descriptor ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SceneDescriptor {
    #[serde(default = "default_version")]
    version: u32,
    scene: Option<Scene>,
}

fn default_version() -> u32 {
    SCENE_FORMAT_VERSION
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub interactions: Vec<InteractionSpec>,
    #[serde(default)]
    pub background: Option<BackgroundSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionSpec {
    pub title: String,
    pub object: String,
    #[serde(alias = "freesound_query")]
    pub query: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(rename = "loop", default)]
    pub looped: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackgroundSpec {
    pub title: String,
    #[serde(alias = "freesound_query")]
    pub query: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub volume: Option<f32>,
    #[serde(rename = "loop", default)]
    pub looped: Option<bool>,
}

impl Scene {
    /// Interactions in descriptor order, then the background track.
    pub fn requests(&self) -> Vec<SoundRequest> {
        let mut requests: Vec<SoundRequest> = self
            .interactions
            .iter()
            .map(|i| SoundRequest {
                title: i.title.clone(),
                kind: SoundKind::Interaction {
                    object: i.object.clone(),
                },
                query: i.query.clone(),
                target_duration: i.duration,
                volume: i.volume,
                looped: i.looped,
            })
            .collect();

        if let Some(bg) = &self.background {
            requests.push(SoundRequest {
                title: bg.title.clone(),
                kind: SoundKind::Background,
                query: bg.query.clone(),
                target_duration: bg.duration,
                volume: bg.volume,
                looped: bg.looped,
            });
        }
        requests
    }
}

/// Parse a scene descriptor. Hand-written descriptors often carry `//`
/// comments and trailing commas, so both are stripped first.
pub fn parse_scene(text: &str) -> Result<Scene, SoundError> {
    let cleaned = strip_json_extras(text);
    let descriptor: SceneDescriptor = serde_json::from_str(&cleaned)
        .map_err(|e| SoundError::Invalid(format!("error parsing scene descriptor: {e}")))?;

    if descriptor.version != SCENE_FORMAT_VERSION {
        return Err(SoundError::Invalid(format!(
            "unsupported scene descriptor version {} (expected {SCENE_FORMAT_VERSION})",
            descriptor.version
        )));
    }

    descriptor.scene.ok_or_else(|| {
        SoundError::Invalid("invalid scene descriptor: must contain a \"scene\" object".into())
    })
}

fn strip_json_extras(text: &str) -> String {
    // A comment must start a line or follow whitespace, which keeps the
    // `//` inside URLs such as "https://..." intact.
    static RE_COMMENT: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"(?m)(^|\s)//.*$").unwrap());
    static RE_TRAILING_COMMA: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r",(\s*[\]}])").unwrap());

    let without_comments = RE_COMMENT.replace_all(text, "$1");
    RE_TRAILING_COMMA
        .replace_all(&without_comments, "$1")
        .into_owned()
}

// ── Manifest ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundMapping {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub object_name: String,
    pub filename: String,
    pub duration: f64,
    #[serde(rename = "loop")]
    pub looped: bool,
    pub volume: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundMappingManifest {
    pub sound_mappings: Vec<SoundMapping>,
}

fn mapping_for(outcome: &DownloadOutcome) -> Option<SoundMapping> {
    if !outcome.is_success() {
        return None;
    }
    let filename = outcome.saved_filename.clone()?;
    let selected = outcome.selected.as_ref()?;
    let request = &outcome.request;

    let (kind, object_name, default_loop) = match &request.kind {
        SoundKind::Interaction { object } => ("interaction", object.clone(), false),
        SoundKind::Background => ("background", "Background".to_string(), true),
        SoundKind::Effect { .. } => ("effect", "Unknown".to_string(), false),
    };

    Some(SoundMapping {
        title: request.title.clone(),
        kind: kind.to_string(),
        object_name,
        filename,
        duration: selected.duration,
        looped: request.looped.unwrap_or(default_loop),
        volume: request.volume.unwrap_or(DEFAULT_VOLUME),
    })
}

/// One mapping per successful outcome, in outcome order.
pub fn build_manifest<'a>(
    outcomes: impl IntoIterator<Item = &'a DownloadOutcome>,
) -> SoundMappingManifest {
    SoundMappingManifest {
        sound_mappings: outcomes.into_iter().filter_map(mapping_for).collect(),
    }
}

/// Build the manifest and write it, pretty-printed, to `dest`.
pub async fn emit<'a>(
    outcomes: impl IntoIterator<Item = &'a DownloadOutcome>,
    dest: &Path,
) -> Result<SoundMappingManifest, SoundError> {
    let manifest = build_manifest(outcomes);

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| SoundError::FileSystem(format!("serialize manifest: {e}")))?;
    tokio::fs::write(dest, json)
        .await
        .map_err(|e| SoundError::FileSystem(format!("write {}: {e}", dest.display())))?;

    tracing::info!(
        "Wrote {} sound mapping(s) to {}",
        manifest.sound_mappings.len(),
        dest.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        freesound::SoundSummary,
        pipeline::{FailureKind, ItemFailure},
    };

    fn success(request: SoundRequest, filename: &str, duration: f64) -> DownloadOutcome {
        DownloadOutcome {
            request,
            selected: Some(SoundSummary {
                id: 1,
                duration,
                ..Default::default()
            }),
            saved_filename: Some(filename.to_string()),
            saved_path: None,
            tier: None,
            error: None,
        }
    }

    fn request(kind: SoundKind, title: &str) -> SoundRequest {
        SoundRequest {
            title: title.into(),
            kind,
            query: title.into(),
            target_duration: None,
            volume: None,
            looped: None,
        }
    }

    #[test]
    fn defaults_differ_for_background_and_interaction() {
        let outcomes = vec![
            success(request(SoundKind::Background, "rain"), "background_rain_1.wav", 30.0),
            success(
                request(
                    SoundKind::Interaction {
                        object: "Door".into(),
                    },
                    "creak",
                ),
                "door_creak_1.wav",
                1.4,
            ),
        ];

        let manifest = build_manifest(&outcomes);

        assert_eq!(manifest.sound_mappings.len(), 2);
        let bg = &manifest.sound_mappings[0];
        assert_eq!(bg.kind, "background");
        assert_eq!(bg.object_name, "Background");
        assert!(bg.looped);
        assert_eq!(bg.volume, 0.5);
        let door = &manifest.sound_mappings[1];
        assert_eq!(door.kind, "interaction");
        assert_eq!(door.object_name, "Door");
        assert!(!door.looped);
        assert_eq!(door.volume, 0.5);
        assert_eq!(door.duration, 1.4);
    }

    #[test]
    fn explicit_values_win_and_failures_are_skipped() {
        let mut bg = request(SoundKind::Background, "wind");
        bg.looped = Some(false);
        bg.volume = Some(0.2);
        let failed = DownloadOutcome {
            request: request(SoundKind::Background, "thunder"),
            selected: None,
            saved_filename: None,
            saved_path: None,
            tier: None,
            error: Some(ItemFailure::new(FailureKind::NoMatch, "nothing")),
        };

        let outcomes = vec![success(bg, "background_wind_1.wav", 12.0), failed];
        let manifest = build_manifest(&outcomes);

        assert_eq!(manifest.sound_mappings.len(), 1);
        assert!(!manifest.sound_mappings[0].looped);
        assert_eq!(manifest.sound_mappings[0].volume, 0.2);
    }

    #[test]
    fn manifest_uses_game_client_keys() {
        let outcomes = vec![success(
            request(
                SoundKind::Interaction {
                    object: "Lamp".into(),
                },
                "click",
            ),
            "lamp_click_1.wav",
            0.3,
        )];
        let json = serde_json::to_value(build_manifest(&outcomes)).unwrap();
        let entry = &json["soundMappings"][0];
        assert_eq!(entry["objectName"], "Lamp");
        assert_eq!(entry["type"], "interaction");
        assert_eq!(entry["loop"], false);
        assert_eq!(entry["filename"], "lamp_click_1.wav");
    }

    #[tokio::test]
    async fn emit_writes_pretty_json_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("Assets/StreamingAssets").join(MANIFEST_FILE_NAME);
        let outcomes = vec![success(request(SoundKind::Background, "rain"), "rain.wav", 3.0)];

        emit(&outcomes, &dest).await.unwrap();

        let text = std::fs::read_to_string(&dest).unwrap();
        let parsed: SoundMappingManifest = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.sound_mappings[0].filename, "rain.wav");
        assert!(text.contains('\n'));
    }

    #[test]
    fn parse_accepts_comments_trailing_commas_and_legacy_keys() {
        let text = r#"{
            // kitchen scene
            "scene": {
                "interactions": [
                    {"title": "door creak", "object": "Door", "freesound_query": "door creak", "duration": 1.5,},
                ],
                "background": {"title": "hum", "query": "fridge hum", "volume": 0.3}, // quiet
            }
        }"#;

        let scene = parse_scene(text).unwrap();
        let requests = scene.requests();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].query, "door creak");
        assert_eq!(requests[0].target_duration, Some(1.5));
        assert_eq!(
            requests[0].kind,
            SoundKind::Interaction {
                object: "Door".into()
            }
        );
        assert_eq!(requests[1].kind, SoundKind::Background);
        assert_eq!(requests[1].volume, Some(0.3));
    }

    #[test]
    fn urls_inside_strings_survive_comment_stripping() {
        let text = r#"{"scene": {"background": {"title": "see https://freesound.org", "query": "rain"}}}"#;
        let scene = parse_scene(text).unwrap();
        assert_eq!(
            scene.background.unwrap().title,
            "see https://freesound.org"
        );
    }

    #[test]
    fn unknown_versions_and_missing_scene_are_rejected() {
        let err = parse_scene(r#"{"version": 2, "scene": {}}"#).unwrap_err();
        assert!(err.to_string().contains("version 2"));

        let err = parse_scene(r#"{"rooms": []}"#).unwrap_err();
        assert!(err.to_string().contains("\"scene\""));

        assert!(parse_scene("not json").is_err());
    }
}
