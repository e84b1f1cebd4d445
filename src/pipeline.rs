/// Sequential sound-acquisition pipeline.
///
/// Each request moves through `Searching → Selecting → Downloading → Done`,
/// or lands in `Failed` at whichever stage went wrong. Requests are processed
/// one at a time to stay inside Freesound's rate limits, and a failed request
/// never stops the ones after it. The exception is a token Freesound keeps
/// rejecting: the run gets one refresh, and a second rejection ends it.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    download::{self, sanitize_filename, slug},
    error::SoundError,
    freesound::{FreesoundClient, SearchPage, SearchParams, SoundSummary, duration_filter},
    matching::select_best,
    models::PipelineEvent,
    token::{RetryBudget, TokenManager},
};

// ── Requests and outcomes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SoundKind {
    /// Bound to a named object in the scene.
    Interaction { object: String },
    /// The scene's ambient track.
    Background,
    /// A numbered entry from a batch-download request.
    Effect { sequence: u32 },
}

#[derive(Debug, Clone)]
pub struct SoundRequest {
    pub title: String,
    pub kind: SoundKind,
    pub query: String,
    pub target_duration: Option<f64>,
    pub volume: Option<f32>,
    pub looped: Option<bool>,
}

impl SoundRequest {
    /// File name without extension for the chosen sound.
    pub fn file_stem(&self, sound_id: u64) -> String {
        match &self.kind {
            SoundKind::Interaction { object } => {
                format!("{}_{}_{sound_id}", slug(object), slug(&self.title))
            }
            SoundKind::Background => format!("background_{}_{sound_id}", slug(&self.title)),
            SoundKind::Effect { sequence } => {
                sanitize_filename(&format!("{sequence}_{}_{sound_id}", self.title))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Searching,
    Selecting,
    Downloading,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchTier {
    /// Duration-filtered search around the target.
    Primary,
    /// Unfiltered search, used when the primary tier errors or finds nothing.
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Search,
    NoMatch,
    Download,
    Processing,
}

impl FailureKind {
    pub fn status(&self) -> &'static str {
        match self {
            FailureKind::Search => "Search Failed",
            FailureKind::NoMatch => "No Match Found",
            FailureKind::Download => "Download Failed",
            FailureKind::Processing => "Processing Error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The terminal record for one request.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub request: SoundRequest,
    pub selected: Option<SoundSummary>,
    pub saved_filename: Option<String>,
    pub saved_path: Option<PathBuf>,
    pub tier: Option<SearchTier>,
    pub error: Option<ItemFailure>,
}

impl DownloadOutcome {
    fn new(request: SoundRequest) -> Self {
        Self {
            request,
            selected: None,
            saved_filename: None,
            saved_path: None,
            tier: None,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.saved_filename.is_some()
    }

    pub fn status(&self) -> &'static str {
        match &self.error {
            Some(failure) => failure.kind.status(),
            None => "Downloaded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub batch_id: String,
    /// One per request, in request order.
    pub outcomes: Vec<DownloadOutcome>,
}

impl BatchReport {
    pub fn successful(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

// ── Search policy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SearchPolicy {
    pub tolerance: f64,
    pub primary_page_size: u32,
    pub fallback_page_size: u32,
    pub fallback: bool,
}

impl SearchPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            tolerance: config.duration_tolerance,
            primary_page_size: config.batch_page_size,
            fallback_page_size: config.fallback_page_size,
            fallback: config.search_fallback,
        }
    }

    fn params(&self, tier: SearchTier, request: &SoundRequest) -> SearchParams {
        let params = SearchParams::new(request.query.clone());
        match (tier, request.target_duration) {
            (SearchTier::Primary, Some(target)) => params
                .filter(duration_filter(target, self.tolerance))
                .page_size(self.primary_page_size),
            (SearchTier::Primary, None) => params.page_size(self.primary_page_size),
            (SearchTier::Fallback, _) => params.page_size(self.fallback_page_size),
        }
    }

    /// The tier to try after `tier`. Without a target duration the primary
    /// search is already unfiltered, so there is nothing to fall back to.
    fn next(&self, tier: SearchTier, request: &SoundRequest) -> Option<SearchTier> {
        match tier {
            SearchTier::Primary if self.fallback && request.target_duration.is_some() => {
                Some(SearchTier::Fallback)
            }
            _ => None,
        }
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline<'a> {
    client: &'a FreesoundClient,
    tokens: &'a TokenManager,
    policy: SearchPolicy,
    dest_dir: PathBuf,
    events: Option<&'a broadcast::Sender<PipelineEvent>>,
    batch_id: Option<String>,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        client: &'a FreesoundClient,
        tokens: &'a TokenManager,
        policy: SearchPolicy,
        dest_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            tokens,
            policy,
            dest_dir: dest_dir.into(),
            events: None,
            batch_id: None,
        }
    }

    pub fn with_events(mut self, events: &'a broadcast::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use a caller-chosen batch id instead of a random one, so a client can
    /// subscribe to the batch's events before starting it.
    pub fn with_batch_id(mut self, batch_id: Option<String>) -> Self {
        self.batch_id = batch_id.filter(|id| !id.is_empty());
        self
    }

    /// Process every request in order and return one outcome per request.
    ///
    /// Item failures are recorded and the run moves on. An authentication
    /// failure that survives the run's single token retry stops the run and
    /// is returned instead, since every later item would fail the same way.
    pub async fn run(&self, requests: Vec<SoundRequest>) -> Result<BatchReport, SoundError> {
        let batch_id = self
            .batch_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!("Batch {batch_id}: processing {} request(s)", requests.len());

        let budget = RetryBudget::default();
        let mut outcomes = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let title = request.title.clone();
            let outcome = match self.process(&batch_id, index, request, &budget).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Batch {batch_id}: aborted at item #{index} ({title:?}): {e}");
                    self.emit_stage(&batch_id, index, &title, ItemStage::Failed);
                    self.emit(PipelineEvent::Aborted {
                        batch_id,
                        index,
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            };
            let stage = if outcome.is_success() {
                ItemStage::Done
            } else {
                ItemStage::Failed
            };
            self.emit_stage(&batch_id, index, &outcome.request.title, stage);
            outcomes.push(outcome);
        }

        let report = BatchReport { batch_id, outcomes };
        let successful = report.successful().count();
        let failed = report.outcomes.len() - successful;
        info!(
            "Batch {}: finished, {successful} downloaded, {failed} failed",
            report.batch_id
        );
        self.emit(PipelineEvent::Finished {
            batch_id: report.batch_id.clone(),
            successful,
            failed,
        });
        Ok(report)
    }

    async fn process(
        &self,
        batch_id: &str,
        index: usize,
        request: SoundRequest,
        budget: &RetryBudget,
    ) -> Result<DownloadOutcome, SoundError> {
        let mut outcome = DownloadOutcome::new(request);
        let title = outcome.request.title.clone();

        // Searching
        self.emit_stage(batch_id, index, &title, ItemStage::Searching);
        let (tier, page) = match self.search(&outcome.request, budget).await {
            Ok(found) => found,
            Err(e) if e.is_auth() => return Err(e),
            Err(e) => return Ok(fail(outcome, ItemFailure::new(FailureKind::Search, e.to_string()))),
        };
        outcome.tier = Some(tier);

        // Selecting
        self.emit_stage(batch_id, index, &title, ItemStage::Selecting);
        let selected = match outcome.request.target_duration {
            Some(target) => select_best(&page.results, target),
            None => page.results.first(),
        };
        let Some(selected) = selected.cloned() else {
            let message = SoundError::NoMatch(outcome.request.query.clone()).to_string();
            return Ok(fail(outcome, ItemFailure::new(FailureKind::NoMatch, message)));
        };
        info!(
            "[#{index}] Best match for {title:?}: {:?} (ID: {}, {:.2}s)",
            selected.name, selected.id, selected.duration
        );

        // Downloading
        self.emit_stage(batch_id, index, &title, ItemStage::Downloading);
        let url = selected
            .download
            .clone()
            .unwrap_or_else(|| self.client.download_endpoint(selected.id));
        let filename = format!(
            "{}.{}",
            outcome.request.file_stem(selected.id),
            selected.extension()
        );
        let dest = self.dest_dir.join(&filename);
        outcome.selected = Some(selected);

        let (http, url, dest_ref) = (self.client.http(), url.as_str(), dest.as_path());
        let result = budget
            .with_token(self.tokens, move |token| async move {
                download::download(http, url, &token, dest_ref).await
            })
            .await;

        match result {
            Ok(bytes) => {
                info!("[#{index}] Saved {filename} ({bytes} bytes)");
                outcome.saved_filename = Some(filename);
                outcome.saved_path = Some(dest);
                Ok(outcome)
            }
            Err(e) if e.is_auth() => Err(e),
            Err(e @ SoundError::FileSystem(_)) => Ok(fail(
                outcome,
                ItemFailure::new(FailureKind::Processing, e.to_string()),
            )),
            Err(e) => Ok(fail(outcome, ItemFailure::new(FailureKind::Download, e.to_string()))),
        }
    }

    /// Walk the search tiers until one returns results. Auth errors end the
    /// walk immediately; other errors move on to the next tier, and the last
    /// tier's error is returned.
    async fn search(
        &self,
        request: &SoundRequest,
        budget: &RetryBudget,
    ) -> Result<(SearchTier, SearchPage), SoundError> {
        let mut tier = SearchTier::Primary;
        loop {
            let params = self.policy.params(tier, request);
            let (client, params) = (self.client, &params);
            let result = budget
                .with_token(self.tokens, move |token| async move {
                    client.search(&token, params).await
                })
                .await;
            let next = self.policy.next(tier, request);

            match (result, next) {
                (Ok(page), Some(next)) if page.results.is_empty() => {
                    info!("{tier:?} search for {:?} found nothing, trying {next:?}", request.query);
                    tier = next;
                }
                (Ok(page), _) => return Ok((tier, page)),
                (Err(e), Some(next)) if !e.is_auth() => {
                    warn!("{tier:?} search for {:?} failed ({e}), trying {next:?}", request.query);
                    tier = next;
                }
                (Err(e), _) => return Err(e),
            }
        }
    }

    fn emit_stage(&self, batch_id: &str, index: usize, title: &str, stage: ItemStage) {
        self.emit(PipelineEvent::Stage {
            batch_id: batch_id.to_string(),
            index,
            title: title.to_string(),
            stage,
        });
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = self.events {
            let _ = events.send(event);
        }
    }
}

fn fail(mut outcome: DownloadOutcome, failure: ItemFailure) -> DownloadOutcome {
    error!(
        "Failed to process {:?}: {} ({})",
        outcome.request.title,
        failure.message,
        failure.kind.status()
    );
    outcome.error = Some(failure);
    outcome
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, path_regex, query_param, query_param_is_missing},
    };

    use super::*;

    struct Harness {
        server: MockServer,
        config: AppConfig,
        client: FreesoundClient,
        tokens: TokenManager,
        dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/access_token/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "tok", "expires_in": 3600})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/dl/\d+$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"audio".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_tests(&server.uri(), dir.path());
        let client = FreesoundClient::new(&config).unwrap();
        let tokens = TokenManager::client_credentials(&client, &config);
        Harness {
            server,
            config,
            client,
            tokens,
            dir,
        }
    }

    impl Harness {
        fn pipeline(&self) -> Pipeline<'_> {
            Pipeline::new(
                &self.client,
                &self.tokens,
                SearchPolicy::from_config(&self.config),
                self.dir.path().join("out"),
            )
        }

        fn sound(&self, id: u64, duration: f64) -> serde_json::Value {
            serde_json::json!({
                "id": id,
                "name": format!("sound {id}"),
                "duration": duration,
                "type": "wav",
                "download": format!("{}/dl/{id}", self.server.uri()),
            })
        }

        async fn search_returns(&self, query: &str, results: Vec<serde_json::Value>) {
            Mock::given(method("GET"))
                .and(path("/search/text/"))
                .and(query_param("query", query))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "count": results.len(),
                    "results": results,
                })))
                .mount(&self.server)
                .await;
        }
    }

    fn effect(sequence: u32, title: &str, duration: f64) -> SoundRequest {
        SoundRequest {
            title: title.into(),
            kind: SoundKind::Effect { sequence },
            query: title.into(),
            target_duration: Some(duration),
            volume: None,
            looped: None,
        }
    }

    #[tokio::test]
    async fn failing_middle_item_does_not_abort_the_batch() {
        let h = harness().await;
        h.search_returns("glass", vec![h.sound(1, 1.0)]).await;
        Mock::given(method("GET"))
            .and(path("/search/text/"))
            .and(query_param("query", "broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&h.server)
            .await;
        h.search_returns("steps", vec![h.sound(3, 2.0)]).await;

        let report = h
            .pipeline()
            .run(vec![
                effect(1, "glass", 1.0),
                effect(2, "broken", 1.0),
                effect(3, "steps", 2.0),
            ])
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.successful().count(), 2);
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.outcomes[1].status(), "Search Failed");
        assert!(report.outcomes[1].error.as_ref().unwrap().message.contains("boom"));
        assert_eq!(
            report.outcomes[2].saved_filename.as_deref(),
            Some("3_steps_3.wav")
        );
        assert!(h.dir.path().join("out/1_glass_1.wav").exists());
    }

    #[tokio::test]
    async fn closest_duration_is_downloaded() {
        let h = harness().await;
        h.search_returns("bell", vec![h.sound(10, 4.0), h.sound(11, 1.6), h.sound(12, 1.2)])
            .await;

        let report = h.pipeline().run(vec![effect(1, "bell", 1.5)]).await.unwrap();

        let outcome = &report.outcomes[0];
        assert!(outcome.is_success());
        assert_eq!(outcome.selected.as_ref().unwrap().id, 11);
        assert_eq!(outcome.tier, Some(SearchTier::Primary));
    }

    #[tokio::test]
    async fn empty_primary_search_falls_back_to_unfiltered() {
        let h = harness().await;
        Mock::given(method("GET"))
            .and(path("/search/text/"))
            .and(query_param("filter", "duration:[1.0 TO 2.0]"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 0, "results": []})),
            )
            .expect(1)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/text/"))
            .and(query_param_is_missing("filter"))
            .and(query_param("page_size", "15"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "count": 1,
                "results": [h.sound(5, 9.0)],
            })))
            .expect(1)
            .mount(&h.server)
            .await;

        let mut policy = SearchPolicy::from_config(&h.config);
        policy.tolerance = 0.5;
        let pipeline = Pipeline::new(&h.client, &h.tokens, policy, h.dir.path().join("out"));
        let report = pipeline.run(vec![effect(1, "whoosh", 1.5)]).await.unwrap();

        let outcome = &report.outcomes[0];
        assert!(outcome.is_success());
        assert_eq!(outcome.tier, Some(SearchTier::Fallback));
    }

    #[tokio::test]
    async fn no_results_anywhere_is_a_recorded_no_match() {
        let h = harness().await;
        h.search_returns("silence", vec![]).await;

        let report = h.pipeline().run(vec![effect(1, "silence", 3.0)]).await.unwrap();

        assert_eq!(report.outcomes[0].status(), "No Match Found");
        assert_eq!(report.successful().count(), 0);
    }

    #[tokio::test]
    async fn missing_download_link_uses_the_canonical_endpoint() {
        let h = harness().await;
        h.search_returns(
            "clap",
            vec![serde_json::json!({"id": 77, "name": "clap", "duration": 0.4, "type": "mp3"})],
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/sounds/77/download/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3".to_vec()))
            .expect(1)
            .mount(&h.server)
            .await;

        let report = h.pipeline().run(vec![effect(4, "clap", 0.5)]).await.unwrap();

        assert_eq!(
            report.outcomes[0].saved_filename.as_deref(),
            Some("4_clap_77.mp3")
        );
    }

    #[tokio::test]
    async fn forbidden_download_is_recorded_and_cleaned_up() {
        let h = harness().await;
        h.search_returns(
            "licensed",
            vec![serde_json::json!({
                "id": 8, "name": "licensed", "duration": 1.0,
                "download": format!("{}/restricted/8", h.server.uri()),
            })],
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/restricted/8"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&h.server)
            .await;

        let report = h.pipeline().run(vec![effect(1, "licensed", 1.0)]).await.unwrap();

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status(), "Download Failed");
        assert_eq!(outcome.selected.as_ref().unwrap().id, 8);
        assert!(!h.dir.path().join("out/1_licensed_8.wav").exists());
    }

    #[tokio::test]
    async fn stages_are_broadcast_in_order() {
        let h = harness().await;
        h.search_returns("tick", vec![h.sound(2, 0.1)]).await;
        let (tx, mut rx) = broadcast::channel(16);

        h.pipeline()
            .with_events(&tx)
            .run(vec![effect(1, "tick", 0.1)])
            .await
            .unwrap();

        let mut stages = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::Stage { stage, .. } => stages.push(stage),
                PipelineEvent::Finished {
                    successful, failed, ..
                } => {
                    assert_eq!((successful, failed), (1, 0));
                }
                PipelineEvent::Aborted { reason, .. } => panic!("unexpected abort: {reason}"),
            }
        }
        assert_eq!(
            stages,
            vec![
                ItemStage::Searching,
                ItemStage::Selecting,
                ItemStage::Downloading,
                ItemStage::Done,
            ]
        );
    }

    fn token_calls(requests: &[wiremock::Request]) -> usize {
        requests
            .iter()
            .filter(|r| r.url.path() == "/oauth2/access_token/")
            .count()
    }

    #[tokio::test]
    async fn rejected_token_stops_the_run_after_one_retry() {
        let h = harness().await;
        Mock::given(method("GET"))
            .and(path("/search/text/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid token"))
            .expect(2)
            .mount(&h.server)
            .await;
        let (tx, mut rx) = broadcast::channel(32);

        let err = h
            .pipeline()
            .with_events(&tx)
            .with_batch_id(Some("b-auth".into()))
            .run(vec![
                effect(1, "one", 1.0),
                effect(2, "two", 1.0),
                effect(3, "three", 1.0),
            ])
            .await
            .unwrap_err();

        assert!(err.is_auth());
        let requests = h.server.received_requests().await.unwrap();
        assert!(token_calls(&requests) <= 2);

        let mut aborted = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::Aborted { batch_id, index, .. } => aborted = Some((batch_id, index)),
                PipelineEvent::Finished { .. } => panic!("aborted run must not report finished"),
                PipelineEvent::Stage { .. } => {}
            }
        }
        assert_eq!(aborted, Some(("b-auth".to_string(), 0)));
    }

    #[tokio::test]
    async fn rejected_download_is_retried_then_stops_the_run() {
        let h = harness().await;
        h.search_returns(
            "gated",
            vec![serde_json::json!({
                "id": 6, "name": "gated", "duration": 1.0, "type": "wav",
                "download": format!("{}/gated/6", h.server.uri()),
            })],
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/gated/6"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&h.server)
            .await;

        let err = h
            .pipeline()
            .run(vec![effect(1, "gated", 1.0), effect(2, "gated", 1.0)])
            .await
            .unwrap_err();

        assert!(err.is_auth());
        assert!(!h.dir.path().join("out/1_gated_6.wav").exists());
    }

    #[test]
    fn file_stems_follow_request_kind() {
        let mut request = effect(2, "glass: break", 1.0);
        assert_eq!(request.file_stem(9), "2_glass__break_9");
        request.kind = SoundKind::Interaction {
            object: "Front Door".into(),
        };
        assert_eq!(request.file_stem(9), "front_door_glass__break_9");
        request.kind = SoundKind::Background;
        assert_eq!(request.file_stem(9), "background_glass__break_9");
    }
}
