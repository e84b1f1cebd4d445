/// Server-rendered HTML for the browser-facing routes.
use axum::{extract::State, response::Html};
use axum_extra::extract::cookie::CookieJar;
use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

use crate::{
    freesound::{SoundSummary, UserProfile},
    models::DownloadRecord,
    pipeline::BatchReport,
    scene::SoundMappingManifest,
    session::CurrentSession,
    state::AppState,
};

const STYLE: &str = "body { font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }
.button { display: inline-block; padding: 8px 15px; background: #4a90e2; color: white; text-decoration: none; border-radius: 4px; margin-right: 10px; }
.ok { background: #e7f7e7; border-left: 5px solid #4caf50; padding: 15px; }
.error-box { background: #ffebee; border-left: 5px solid #f44336; padding: 15px; }
pre { background: #f5f5f5; padding: 10px; overflow: auto; max-height: 400px; }
li { margin-bottom: 12px; }";

pub fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        text(title)
    )
}

fn home_link() -> &'static str {
    r#"<p style="margin-top: 30px;"><a href="/" class="button">Return to Home</a></p>"#
}

/// Error page with troubleshooting links. `relogin` adds a prompt to log in
/// again, for failures caused by a missing or rejected token.
pub fn error_page(message: &str, relogin: bool) -> String {
    let mut body = format!(
        "<div class=\"error-box\">\n<h1>Error</h1>\n<pre>{}</pre>\n</div>\n",
        text(message)
    );
    body.push_str("<h2>Troubleshooting Steps:</h2>\n<ol>\n");
    if relogin {
        body.push_str(
            "<li>Try <a href=\"/login\">logging in again</a> to refresh your access token.</li>\n",
        );
    }
    body.push_str("<li>Check the server log for the full Freesound response.</li>\n</ol>\n");
    body.push_str(home_link());
    layout("Error", &body)
}

/// A short page with a heading, one message and a link home.
pub fn notice_page(title: &str, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p>{}</p>\n{}",
        text(title),
        text(message),
        home_link()
    );
    layout(title, &body)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// GET /
pub async fn home(
    State(state): State<AppState>,
    session: CurrentSession,
) -> (CookieJar, Html<String>) {
    let logged_in = state
        .sessions
        .read(&session.id, |s| s.tokens.is_some())
        .await
        .unwrap_or(false);

    let mut body = String::from("<h1>Freesound Sound Bridge</h1>\n");
    if logged_in {
        body.push_str(
            "<p>You are logged in with Freesound.</p>\n\
             <p><a href=\"/me\">View your profile</a> | <a href=\"/logout\">Log out</a></p>\n",
        );
    } else {
        body.push_str(
            "<p>You are not logged in. <a href=\"/login\">Log in with Freesound</a> to download full sounds.</p>\n",
        );
    }
    body.push_str(
        "<ul>\n\
         <li><a href=\"/my-downloads\">View my downloaded sounds</a></li>\n\
         <li><a href=\"/download-random\">Download a random sound</a></li>\n\
         <li><a href=\"/process-audio-json\"><strong>Process the scene file</strong></a></li>\n\
         </ul>\n",
    );
    (session.jar, Html(layout("Freesound Sound Bridge", &body)))
}

/// GET /my-downloads
pub async fn my_downloads(
    State(state): State<AppState>,
    session: CurrentSession,
) -> (CookieJar, Html<String>) {
    let downloads: Vec<DownloadRecord> = state
        .sessions
        .read(&session.id, |s| s.downloads.iter().cloned().collect())
        .await
        .unwrap_or_default();
    (session.jar, Html(downloads_page(&downloads)))
}

// ── Renderers ─────────────────────────────────────────────────────────────────

pub fn downloads_page(downloads: &[DownloadRecord]) -> String {
    let mut body = String::from(
        "<h1>My Downloaded Sounds</h1>\n<p>Here are the sounds you've downloaded in this session:</p>\n",
    );
    if downloads.is_empty() {
        body.push_str("<p>You haven't downloaded any sounds yet.</p>\n");
    } else {
        body.push_str("<ul>\n");
        for d in downloads {
            body.push_str(&format!(
                "<li><strong>{}</strong> (ID: {})<br/>Downloaded: {}<br/>Saved as: <a href=\"{}\">{}</a></li>\n",
                text(&d.name),
                d.id,
                text(&d.date),
                attr(&d.link),
                text(&d.path),
            ));
        }
        body.push_str("</ul>\n");
    }
    body.push_str(home_link());
    layout("My Downloads", &body)
}

pub fn download_page(sound: &SoundSummary, filename: &str) -> String {
    let mut body = format!(
        "<div class=\"ok\">\n<h1>Download Successful!</h1>\n<p>Sound \"{}\" has been downloaded successfully.</p>\n</div>\n\
         <h2>Sound Details:</h2>\n\
         <p><strong>Name:</strong> {}</p>\n<p><strong>ID:</strong> {}</p>\n\
         <p><strong>By:</strong> {}</p>\n<p><strong>Saved as:</strong> {}</p>\n",
        text(&sound.name),
        text(&sound.name),
        sound.id,
        text(sound.username.as_deref().unwrap_or("Unknown")),
        text(filename),
    );
    if let Some(preview) = sound.preview_url() {
        body.push_str(&format!(
            "<h3>Listen to preview:</h3>\n<audio controls style=\"width: 100%;\"><source src=\"{}\" type=\"audio/mpeg\"></audio>\n",
            attr(preview)
        ));
    }
    body.push_str(
        "<p style=\"margin-top: 30px;\"><a href=\"/my-downloads\" class=\"button\">My Downloads</a>\
         <a href=\"/\" class=\"button\">Return to Home</a></p>\n",
    );
    layout("Download Successful", &body)
}

pub fn profile_page(profile: &UserProfile) -> String {
    let mut body = format!(
        "<h1>Your Freesound Profile</h1>\n<p><strong>Username:</strong> {}</p>\n\
         <p><strong>About:</strong> {}</p>\n<p><strong>Homepage:</strong> {}</p>\n",
        text(&profile.username),
        text(profile.about.as_deref().unwrap_or("Not provided")),
        text(profile.homepage.as_deref().unwrap_or("Not provided")),
    );
    if let Some(avatar) = profile.avatar.as_ref().and_then(|a| a.medium.as_deref()) {
        body.push_str(&format!(
            "<p><img src=\"{}\" alt=\"Avatar\" style=\"border-radius: 50%;\" /></p>\n",
            attr(avatar)
        ));
    }
    body.push_str(home_link());
    layout("Your Freesound Profile", &body)
}

pub fn scene_page(report: &BatchReport, manifest: &SoundMappingManifest, scene_dir: &str) -> String {
    let successful = report.successful().count();
    let failed = report.outcomes.len() - successful;

    let mut body = format!(
        "<h1>Scene Processed</h1>\n<p>{successful} sound(s) downloaded, {failed} failed.</p>\n\
         <p>Files saved to <code>{}</code>; {} mapping(s) written to the manifest.</p>\n",
        text(scene_dir),
        manifest.sound_mappings.len(),
    );

    if successful > 0 {
        body.push_str("<h2>Downloaded</h2>\n<ul>\n");
        for o in report.successful() {
            let (name, id) = o
                .selected
                .as_ref()
                .map(|s| (s.name.as_str(), s.id))
                .unwrap_or_default();
            body.push_str(&format!(
                "<li><strong>{}</strong>: {} (ID: {id}) saved as {}</li>\n",
                text(&o.request.title),
                text(name),
                text(o.saved_filename.as_deref().unwrap_or_default()),
            ));
        }
        body.push_str("</ul>\n");
    }

    if failed > 0 {
        body.push_str("<h2>Failed</h2>\n<ul>\n");
        for o in report.failed() {
            let message = o.error.as_ref().map(|e| e.message.as_str()).unwrap_or_default();
            body.push_str(&format!(
                "<li><strong>{}</strong> ({}): {}</li>\n",
                text(&o.request.title),
                o.status(),
                text(message),
            ));
        }
        body.push_str("</ul>\n");
    }

    body.push_str(home_link());
    layout("Scene Processed", &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_is_escaped() {
        let page = downloads_page(&[DownloadRecord {
            id: 1,
            name: "<script>alert(1)</script>".into(),
            path: "x\".wav".into(),
            link: "/files/x\".wav".into(),
            date: "today".into(),
        }]);
        assert!(!page.contains("<script>"));
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("/files/x&quot;.wav"));
    }

    #[test]
    fn error_page_offers_relogin_only_when_asked() {
        assert!(error_page("expired", true).contains("href=\"/login\""));
        assert!(!error_page("disk full", false).contains("href=\"/login\""));
    }

    #[test]
    fn empty_history_says_so() {
        assert!(downloads_page(&[]).contains("haven't downloaded any sounds"));
    }
}
