//! API 服务器模块
//!
//! 包含路由、handlers 与共享状态。

pub mod handlers;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

pub use state::{AppState, Collaborators};

use handlers::{database, dictionary, generation, media, prompts, sessions, system, workflow_sessions};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 构建完整路由
pub fn build_router(state: AppState) -> Router {
    let server = state.config.snapshot().server;
    let temp_dir = state.audio.temp_dir();

    let api = Router::new()
        .route("/health", get(system::health))
        .route("/config", get(system::get_config).post(system::update_config))
        .route("/logs", get(system::logs))
        .route("/test-gemini", post(system::test_gemini))
        .route("/prompts", get(prompts::get_prompt).post(prompts::update_prompt))
        .route("/skills", get(prompts::list_skills))
        .route("/skills/:name", post(prompts::update_skill))
        .route("/generate", post(generation::generate))
        .route("/research", post(generation::research))
        .route("/vocabulary", post(generation::vocabulary))
        .route("/podcast-script", post(generation::podcast_script))
        .route("/dictionary/scan", post(dictionary::scan))
        .route("/dictionary/generate", post(dictionary::generate))
        .route("/dictionary/add", post(dictionary::add))
        .route("/dictionary/stats", get(dictionary::stats))
        .route("/news/scan", get(media::scan_news))
        .route("/synthesize", post(media::synthesize))
        .route("/schema", post(database::schema))
        .route("/publish", post(database::publish))
        .route("/database/articles", get(database::list_articles))
        .route("/database/articles/:id", delete(database::delete_article))
        .route("/database/dictionary", get(dictionary::dump))
        .route("/database/test", get(database::test_connection))
        .route("/database/collections", get(database::collections))
        .route(
            "/database/collections/:name/records",
            get(database::collection_records),
        )
        .route(
            "/workflow-sessions",
            get(workflow_sessions::list).post(workflow_sessions::create),
        )
        .route(
            "/workflow-sessions/:id",
            axum::routing::patch(workflow_sessions::update).delete(workflow_sessions::remove),
        )
        .route("/sessions", get(sessions::list).post(sessions::create))
        .route(
            "/sessions/:id",
            get(sessions::get)
                .patch(sessions::update)
                .delete(sessions::remove),
        )
        .route("/sessions/:id/switch", post(sessions::switch))
        .route("/sessions/:id/steps/:step/:action", post(sessions::step_action))
        .route("/sessions/:id/regenerate/:field", post(sessions::regenerate))
        .route("/sessions/:id/flush", post(sessions::flush))
        .route("/sessions/:id/rewrite-step", post(sessions::rewrite_step))
        .route("/sessions/:id/run/:operation", post(sessions::run));

    Router::new()
        .nest("/api", api)
        .nest_service("/temp", ServeDir::new(temp_dir))
        .layer(DefaultBodyLimit::max(server.body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
