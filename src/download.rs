/// Streaming downloads of original sound files.
use std::{fmt::Display, path::Path};

use futures_util::{Stream, StreamExt};
use regex::Regex;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::SoundError;

/// Download `url` to `dest`, authenticating with `token` in the
/// `Authorization` header. Returns the number of bytes written.
///
/// Parent directories are created as needed. If the transfer fails after the
/// file was created, the partial file is removed.
pub async fn download(
    http: &reqwest::Client,
    url: &str,
    token: &str,
    dest: &Path,
) -> Result<u64, SoundError> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SoundError::FileSystem(format!("create {}: {e}", parent.display())))?;
    }

    debug!("Downloading {url} to {}", dest.display());
    let resp = http
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| SoundError::Download(e.to_string()))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        // The token itself was refused; callers may refresh and retry.
        return Err(SoundError::Auth(format!("download rejected the token: HTTP {status}")));
    }
    if !status.is_success() {
        let mut message = format!("HTTP {status}");
        if status == reqwest::StatusCode::FORBIDDEN {
            message.push_str(" - possible permission issue (license restriction or token scope)");
        }
        return Err(SoundError::Download(message));
    }

    write_stream(resp.bytes_stream(), dest).await
}

/// Write every chunk of `stream` to a new file at `dest`. On a stream or
/// write error the file is deleted before the error is returned.
pub async fn write_stream<S, B, E>(stream: S, dest: &Path) -> Result<u64, SoundError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let file = File::create(dest)
        .await
        .map_err(|e| SoundError::FileSystem(format!("create {}: {e}", dest.display())))?;

    match copy_stream(stream, file).await {
        Ok(written) => Ok(written),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(dest).await {
                warn!("Could not remove partial download {}: {rm}", dest.display());
            }
            Err(e)
        }
    }
}

async fn copy_stream<S, B, E>(stream: S, mut file: File) -> Result<u64, SoundError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    futures_util::pin_mut!(stream);
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| SoundError::Download(format!("stream interrupted: {e}")))?;
        let bytes = chunk.as_ref();
        file.write_all(bytes).await?;
        written += bytes.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

// ── File names ────────────────────────────────────────────────────────────────

/// Replace characters that are not allowed in file names, collapse
/// whitespace into `_` and cap the length at 100 characters.
pub fn sanitize_filename(name: &str) -> String {
    static RE_RESERVED: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
    static RE_SPACE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\s+").unwrap());

    let cleaned = RE_RESERVED.replace_all(name, "_");
    RE_SPACE.replace_all(&cleaned, "_").chars().take(100).collect()
}

/// Lowercase `name` and turn every non-alphanumeric character into `_`.
pub fn slug(name: &str) -> String {
    static RE: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());
    RE.replace_all(name, "_").to_lowercase()
}
