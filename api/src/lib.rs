use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod db;
pub mod ingest;
pub mod mapper;
pub mod models;
pub mod stats;

use crate::config::Config;
use crate::db::Pool;
use crate::ingest::{IngestError, IngestSummary};

/// Rejections listed in an upload response; `skipped` still counts all of them.
const MAX_REPORTED_REJECTIONS: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool,
    pub chunk_size: usize,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    message: &'static str,
    summary: IngestSummary,
}

/// Error body returned to the browser; carries a message string only.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        let message = format!("Processing failed: {}", e);
        match e {
            IngestError::Parse(_) => ApiError::bad_request(message),
            IngestError::InvalidChunkSize | IngestError::Store { .. } => {
                ApiError::internal(message)
            }
        }
    }
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut contents = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError {
        status: e.status(),
        message: e.body_text(),
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("<unnamed>").to_string();
        let bytes = field.bytes().await.map_err(|e| ApiError {
            status: e.status(),
            message: e.body_text(),
        })?;
        tracing::info!("file received: {} ({} bytes)", file_name, bytes.len());
        contents = Some(bytes);
        break;
    }

    let Some(bytes) = contents else {
        return Err(ApiError::bad_request("No file uploaded"));
    };

    // large exports take a while to parse, keep it off the async workers
    let events = tokio::task::spawn_blocking(move || ingest::parse_events(&bytes))
        .await
        .map_err(|e| {
            tracing::error!("upload parser task failed: {}", e);
            ApiError::internal("Processing failed")
        })?
        .map_err(|e| {
            tracing::warn!("rejected upload: {}", e);
            ApiError::from(e)
        })?;

    let mut summary = ingest::ingest(&state.db, &events, state.chunk_size)
        .await
        .map_err(|e| {
            tracing::error!("failed to ingest upload: {}", e);
            ApiError::from(e)
        })?;
    summary.rejections.truncate(MAX_REPORTED_REJECTIONS);

    Ok(Json(UploadResponse {
        message: "File processed successfully",
        summary,
    }))
}

async fn get_top_artists(
    State(state): State<AppState>,
) -> Result<Json<Vec<stats::TopArtist>>, ApiError> {
    let artists = stats::top_artists(&state.db).await.map_err(|e| {
        tracing::error!("failed to fetch top artists: {}", e);
        ApiError::internal("Failed to fetch top artists")
    })?;
    Ok(Json(artists))
}

async fn get_time_patterns(
    State(state): State<AppState>,
) -> Result<Json<Vec<stats::HourlyPlays>>, ApiError> {
    let patterns = stats::time_patterns(&state.db).await.map_err(|e| {
        tracing::error!("failed to fetch time patterns: {}", e);
        ApiError::internal("Failed to fetch time patterns")
    })?;
    Ok(Json(patterns))
}

async fn health_check() -> &'static str {
    "ok"
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/upload", post(upload))
        .route("/api/stats/top-artists", get(get_top_artists))
        .route("/api/stats/time-patterns", get(get_time_patterns))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the fmt subscriber, preferring `RUST_LOG` over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("listening_stats_api=debug,tower_http=debug");

    let config = Config::from_env().context("invalid configuration")?;

    let db = db::init_db(&config)
        .await
        .context("failed to initialize database")?;
    tracing::info!("database initialized ({})", db.backend());

    let state = AppState {
        db,
        chunk_size: config.chunk_size,
    };
    let app = router(state, config.max_upload_bytes);

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
