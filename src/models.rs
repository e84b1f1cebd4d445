use serde::{Deserialize, Serialize};

use crate::pipeline::ItemStage;

// ── Batch download API ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDownloadRequest {
    #[serde(default)]
    pub sound_effects: Option<Vec<SoundEffect>>,
    /// Id for the batch's `/ws` events; a random one is used when absent.
    #[serde(default)]
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoundEffect {
    pub sequence: u32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Target duration in seconds.
    pub duration: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDownloadResponse {
    pub message: String,
    pub download_directory: String,
    pub results: Vec<BatchResultEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultEntry {
    pub sequence: u32,
    pub title: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_sound: Option<SelectedSound>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedSound {
    pub id: u64,
    pub name: String,
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

// ── Single sounds ─────────────────────────────────────────────────────────────

/// Response of `GET /api/sounds/{id}/download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub name: String,
    pub download_url: String,
}

// ── Session history ───────────────────────────────────────────────────────────

/// One entry of a session's download history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub id: u64,
    pub name: String,
    /// File name relative to the directory it was saved in.
    pub path: String,
    /// URL path the file is served from.
    pub link: String,
    pub date: String,
}

// ── Live events ───────────────────────────────────────────────────────────────

/// Pipeline progress broadcast via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Stage {
        batch_id: String,
        index: usize,
        title: String,
        stage: ItemStage,
    },
    Finished {
        batch_id: String,
        successful: usize,
        failed: usize,
    },
    /// The run stopped at `index` because Freesound kept rejecting the token.
    Aborted {
        batch_id: String,
        index: usize,
        reason: String,
    },
}

impl PipelineEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            PipelineEvent::Stage { batch_id, .. }
            | PipelineEvent::Finished { batch_id, .. }
            | PipelineEvent::Aborted { batch_id, .. } => batch_id,
        }
    }

    /// No further events follow for this batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineEvent::Finished { .. } | PipelineEvent::Aborted { .. })
    }
}
