pub mod batch;
pub mod oauth;
pub mod pages;
pub mod sounds;
pub mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::state::AppState;

/// Where single and random downloads are served from.
pub const FILES_ROUTE: &str = "/files";
/// Where the current scene's sounds are served from.
pub const SCENE_FILES_ROUTE: &str = "/scene-files";

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/batch-download-sounds", post(batch::batch_download))
        .route("/sounds/search", get(sounds::search))
        .route("/sounds/{id}", get(sounds::sound_detail))
        .route("/sounds/{id}/download", get(sounds::download_info));

    // CORS: restrict `allow_origin` to the game client origin in production
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Browser pages
        .route("/", get(pages::home))
        .route("/my-downloads", get(pages::my_downloads))
        .route("/process-audio-json", get(batch::process_scene))
        .route("/download/{id}", get(sounds::download_sound))
        .route("/download-random", get(sounds::download_random))
        // OAuth2
        .route("/login", get(oauth::login))
        .route("/callback", get(oauth::callback))
        .route("/logout", get(oauth::logout))
        .route("/me", get(oauth::me))
        // Freesound proxy
        .route("/search", get(sounds::search))
        .route("/sound/{id}", get(sounds::sound_detail))
        // Pipeline events
        .route("/ws", get(ws::ws_handler))
        .nest("/api", api)
        // Downloaded files
        .nest_service(FILES_ROUTE, ServeDir::new(&state.config.download_dir))
        .nest_service(SCENE_FILES_ROUTE, ServeDir::new(state.config.scene_dir()))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
