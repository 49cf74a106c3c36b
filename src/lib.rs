pub mod archive;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod files;
pub mod identity;
pub mod rooms;
pub mod sweep;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRef},
    http::{HeaderValue, Method, header},
    routing::get,
};
use serde_json::json;
use sqlx::SqlitePool;
use tower_http::cors::{self, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::archive::ArchiveCache;
use crate::config::Config;
use crate::files::FileArea;
use crate::rooms::submission::SubmissionLocks;

pub use crate::error::{AppError, AppResult};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Arc<Config>,
    pub files: FileArea,
    pub archives: ArchiveCache,
    pub locks: SubmissionLocks,
}

impl AppState {
    /// Open the store, run migrations and set up the on-disk areas.
    /// Built once at startup and injected into every handler; the pool
    /// is closed explicitly on shutdown.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let db_pool = db::connect(&config.database_url).await?;
        db::migrate(&db_pool).await?;

        let files = FileArea::new(config.data_dir.join("rooms"), config.max_file_bytes);
        let archives = ArchiveCache::new(config.data_dir.join("bundles"));

        Ok(Self {
            db_pool,
            config: Arc::new(config),
            files,
            archives,
            locks: SubmissionLocks::default(),
        })
    }
}

pub fn app(state: AppState) -> Router {
    // bounds the whole upload batch; the per-file ceiling is enforced
    // in FileArea::store
    let body_limit = DefaultBodyLimit::max(state.config.max_batch_bytes as usize);

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/rooms", rooms::router())
        .layer(body_limit)
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "success": true, "message": "API is running" }))
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods(cors::Any)
            .allow_headers(cors::Any);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
