//! API Router and Application State
//!
//! Central routing configuration and shared state.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::crypto::ChatCipher;
use crate::db::KvStore;
use crate::rooms::Registry;
use crate::{auth, rooms};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// In-memory room registry and fan-out engine
    pub registry: Arc<Registry>,
    /// Best-effort durable store
    pub kv: KvStore,
    /// Chat-at-rest cipher, keyed once per process
    pub cipher: Arc<ChatCipher>,
    /// Server configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(registry: Registry, kv: KvStore, cipher: ChatCipher, config: Config) -> Self {
        Self {
            registry: Arc::new(registry),
            kv,
            cipher: Arc::new(cipher),
            config: Arc::new(config),
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Body limit sits above the upload cap; the upload handler enforces the
    // cap itself with a 413, the slack covers multipart framing.
    let body_limit = state.config.max_file_size + 1024 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth::router(state.clone()))
        .nest("/rooms", rooms::router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
pub(crate) struct HealthResponse {
    /// Overall service status
    status: &'static str,
    /// Server time
    timestamp: DateTime<Utc>,
    /// Whether the KV store was reachable at boot
    kv_connected: bool,
}

/// Health check endpoint.
pub(crate) async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        kv_connected: state.kv.is_connected(),
    })
}
