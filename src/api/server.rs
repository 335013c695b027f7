use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_embed::Embed;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::storage::{CameraRecord, CameraStore, CameraUpdate, CrowdSummary};

use super::error::ApiError;

#[derive(Embed)]
#[folder = "src/assets/"]
struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub store: CameraStore,
    pub crowd_threshold: i64,
    pub video_feed_url: Option<String>,
}

impl AppState {
    pub fn new(store: CameraStore, crowd_threshold: i64) -> Self {
        Self {
            store,
            crowd_threshold,
            video_feed_url: None,
        }
    }

    /// Producer preview stream shown on the dashboard.
    pub fn with_video_feed(mut self, url: Option<String>) -> Self {
        self.video_feed_url = url;
        self
    }
}

#[derive(Serialize)]
struct DashboardSettings {
    crowd_threshold: i64,
    video_feed_url: Option<String>,
}

#[derive(Serialize)]
struct UpdateResponse {
    status: &'static str,
    data: CameraRecord,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(static_handler))
        .route("/update_count", post(update_count_handler))
        .route("/all_data", get(all_data_handler))
        .route("/cameras/{id}", get(camera_handler))
        .route("/summary", get(summary_handler))
        .route("/dashboard", get(dashboard_handler))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(state: AppState, addr: SocketAddr) -> Result<(), std::io::Error> {
    let app = router(state);

    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn update_count_handler(
    State(state): State<AppState>,
    payload: Result<Json<CameraUpdate>, JsonRejection>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let Json(update) = payload?;
    let data = state.store.update(update);

    Ok(Json(UpdateResponse { status: "ok", data }))
}

async fn all_data_handler(State(state): State<AppState>) -> Json<BTreeMap<String, CameraRecord>> {
    Json(state.store.list_all())
}

async fn camera_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CameraRecord>, ApiError> {
    state
        .store
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("camera {id} not found")))
}

async fn summary_handler(State(state): State<AppState>) -> Json<CrowdSummary> {
    Json(state.store.summary(state.crowd_threshold))
}

async fn dashboard_handler(State(state): State<AppState>) -> Json<DashboardSettings> {
    Json(DashboardSettings {
        crowd_threshold: state.crowd_threshold,
        video_feed_url: state.video_feed_url.clone(),
    })
}
