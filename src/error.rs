use axum::{
    Json,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Failures talking to Freesound or writing what it returns.
#[derive(Debug, Error)]
pub enum SoundError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("search failed with HTTP {status}: {body}")]
    Search { status: u16, body: String },

    #[error("no sounds found for query: {0}")]
    NoMatch(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("file system error: {0}")]
    FileSystem(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

impl SoundError {
    pub fn is_auth(&self) -> bool {
        matches!(self, SoundError::Auth(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            SoundError::Auth(_) => StatusCode::UNAUTHORIZED,
            SoundError::Search { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            SoundError::NoMatch(_) => StatusCode::NOT_FOUND,
            SoundError::Download(_) => StatusCode::BAD_GATEWAY,
            SoundError::FileSystem(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SoundError::Invalid(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<std::io::Error> for SoundError {
    fn from(e: std::io::Error) -> Self {
        SoundError::FileSystem(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Sound(#[from] SoundError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Sound(e) => {
                if e.status().is_server_error() {
                    tracing::error!("Freesound error: {e}");
                } else {
                    tracing::warn!("Freesound error: {e}");
                }
                (e.status(), e.to_string())
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            AppError::Internal(m) => {
                tracing::error!("Internal error: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m.clone())
            }
            AppError::Anyhow(e) => {
                tracing::error!("Unhandled error: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Browser-facing variant of [`AppError`]: renders an HTML page with
/// troubleshooting links instead of a JSON body.
#[derive(Debug)]
pub struct HtmlError(pub AppError);

impl<E: Into<AppError>> From<E> for HtmlError {
    fn from(e: E) -> Self {
        HtmlError(e.into())
    }
}

impl IntoResponse for HtmlError {
    fn into_response(self) -> Response {
        let (status, message) = self.0.status_and_message();
        let relogin = matches!(self.0, AppError::Sound(SoundError::Auth(_)));
        (status, Html(crate::routes::pages::error_page(&message, relogin))).into_response()
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
