//! HTTP control surface (system specification §6.1), grounded on
//! `nyx_daemon`'s `spawn_http_server`/`AppState` pattern: a small `axum`
//! `Router` over a cloneable state struct, one async handler per route,
//! JSON in and out.

use crate::{content::DirectoryContentSource, metrics::MetricsCollector};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, sync::Arc};
use swarmlink_core::{ContentDigest, ContentId, PeerIdentity};
use swarmlink_sdk::{DownloadOutcome, DownloadRequest, Node, SdkEvent};
use swarmlink_signal::CoordinationStore;
use tokio::{
    sync::{mpsc, Mutex},
    task::AbortHandle,
};
use tracing::warn;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize)]
pub struct DownloadStatus {
    pub state: DownloadState,
    pub received_chunks: usize,
    pub total_chunks: u32,
    pub total_bytes: u64,
    pub error: Option<String>,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        Self { state: DownloadState::Running, received_chunks: 0, total_chunks: 0, total_bytes: 0, error: None }
    }
}

/// Shared daemon state reachable from every handler. `S` is the concrete
/// `CoordinationStore` the daemon picked at startup (see
/// [`crate::coordination::AnyCoordinationStore`]); `Node<S>` is otherwise the
/// same type an in-process embedder would use.
pub struct AppState<S: CoordinationStore + 'static> {
    pub node: Arc<Node<S>>,
    pub content: Arc<DirectoryContentSource>,
    pub metrics: Arc<MetricsCollector>,
    pub downloads: Arc<Mutex<HashMap<String, DownloadStatus>>>,
    pub tasks: Arc<Mutex<HashMap<String, AbortHandle>>>,
}

impl<S: CoordinationStore + 'static> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            content: self.content.clone(),
            metrics: self.metrics.clone(),
            downloads: self.downloads.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

impl<S: CoordinationStore + 'static> AppState<S> {
    pub fn new(node: Arc<Node<S>>, content: Arc<DirectoryContentSource>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            node,
            content,
            metrics,
            downloads: Arc::new(Mutex::new(HashMap::new())),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

pub fn router<S: CoordinationStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/v1/status", get(http_status::<S>))
        .route("/api/v1/peers/:content_id", get(http_peers::<S>))
        .route("/api/v1/content", post(http_register_content::<S>))
        .route("/api/v1/downloads", post(http_start_download::<S>))
        .route("/api/v1/downloads/:id", get(http_download_status::<S>))
        .route("/api/v1/downloads/:id/cancel", post(http_cancel_download::<S>))
        .route("/metrics", get(http_metrics::<S>))
        .with_state(state)
}

async fn http_status<S: CoordinationStore + 'static>(State(st): State<AppState<S>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "peer_id": st.node.self_id().as_str() }))
}

#[derive(Serialize)]
struct PeersResponse {
    peers: Vec<String>,
}

async fn http_peers<S: CoordinationStore + 'static>(
    State(st): State<AppState<S>>,
    Path(content_id): Path<String>,
) -> Json<PeersResponse> {
    let peers = st.node.find_peers(&ContentId::new(content_id)).await;
    Json(PeersResponse { peers: peers.into_iter().map(|p| p.as_str().to_string()).collect() })
}

#[derive(Deserialize)]
struct RegisterContentRequest {
    content_id: String,
    path: PathBuf,
    port: u16,
}

#[derive(Serialize)]
struct RegisterContentResponse {
    digest: String,
}

async fn http_register_content<S: CoordinationStore + 'static>(
    State(st): State<AppState<S>>,
    Json(req): Json<RegisterContentRequest>,
) -> Result<Json<RegisterContentResponse>, ApiError> {
    let content_id = ContentId::new(req.content_id);
    let digest = st.content.register(content_id.clone(), req.path).await.map_err(ApiError::from_io)?;
    st.node.announce(&content_id, digest, req.port).await;
    Ok(Json(RegisterContentResponse { digest: digest.to_string() }))
}

#[derive(Deserialize)]
struct StartDownloadRequest {
    content_id: String,
    digest: String,
    output_path: PathBuf,
    #[serde(default = "default_max_peers")]
    max_peers: usize,
}

fn default_max_peers() -> usize {
    8
}

#[derive(Serialize)]
struct StartDownloadResponse {
    download_id: String,
}

async fn http_start_download<S: CoordinationStore + 'static>(
    State(st): State<AppState<S>>,
    Json(req): Json<StartDownloadRequest>,
) -> Result<Json<StartDownloadResponse>, ApiError> {
    let digest: ContentDigest = req.digest.parse().map_err(ApiError::bad_request)?;
    let download_id = PeerIdentity::generate().as_str().to_string();

    st.downloads.lock().await.insert(download_id.clone(), DownloadStatus::default());
    st.metrics.record_download_started();

    let (events_tx, mut events_rx) = mpsc::channel::<SdkEvent>(64);
    let request = DownloadRequest::new(ContentId::new(req.content_id), digest)
        .with_max_peers(req.max_peers)
        .with_events(events_tx);

    let downloads = st.downloads.clone();
    let metrics = st.metrics.clone();
    let progress_id = download_id.clone();
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let mut downloads = downloads.lock().await;
            let Some(status) = downloads.get_mut(&progress_id) else { continue };
            match event {
                SdkEvent::Progress { received_chunks, total_chunks } => {
                    status.received_chunks = received_chunks;
                    status.total_chunks = total_chunks;
                }
                SdkEvent::Failed { reason } => {
                    status.state = DownloadState::Failed;
                    status.error = Some(reason);
                }
                SdkEvent::Completed { total_bytes } => {
                    status.total_bytes = total_bytes;
                }
                SdkEvent::PeerConnected { .. }
                | SdkEvent::PeerFailed { .. }
                | SdkEvent::PeerDropped { .. } => {}
            }
        }
        let _ = metrics;
    });

    let node = st.node.clone();
    let downloads = st.downloads.clone();
    let metrics = st.metrics.clone();
    let task_id = download_id.clone();
    let handle = tokio::spawn(async move {
        let outcome = node.download(request, req.output_path).await;
        let mut downloads = downloads.lock().await;
        let Some(status) = downloads.get_mut(&task_id) else { return };
        match outcome {
            Ok(DownloadOutcome { total_bytes, total_chunks }) => {
                status.state = DownloadState::Completed;
                status.total_bytes = total_bytes;
                status.total_chunks = total_chunks;
                status.received_chunks = total_chunks as usize;
                metrics.record_download_completed();
            }
            Err(err) => {
                if !matches!(status.state, DownloadState::Failed) {
                    status.state = DownloadState::Failed;
                    status.error = Some(err.to_string());
                }
                metrics.record_download_failed();
            }
        }
    });
    st.tasks.lock().await.insert(download_id.clone(), handle.abort_handle());

    Ok(Json(StartDownloadResponse { download_id }))
}

async fn http_download_status<S: CoordinationStore + 'static>(
    State(st): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadStatus>, ApiError> {
    st.downloads
        .lock()
        .await
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found("unknown download id"))
}

async fn http_cancel_download<S: CoordinationStore + 'static>(
    State(st): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(handle) = st.tasks.lock().await.remove(&id) {
        handle.abort();
        if let Some(status) = st.downloads.lock().await.get_mut(&id) {
            status.state = DownloadState::Failed;
            status.error.get_or_insert_with(|| "cancelled".to_string());
        }
        Ok(Json(serde_json::json!({ "cancelled": true })))
    } else {
        Err(ApiError::not_found("unknown download id"))
    }
}

async fn http_metrics<S: CoordinationStore + 'static>(State(st): State<AppState<S>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        st.metrics.render_prometheus(),
    )
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    fn bad_request(message: impl ToString) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.to_string() }
    }

    fn from_io(err: std::io::Error) -> Self {
        warn!(error = %err, "content registration failed");
        Self { status: StatusCode::BAD_REQUEST, message: err.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_status_defaults_to_running_with_no_error() {
        let status = DownloadStatus::default();
        assert!(matches!(status.state, DownloadState::Running));
        assert!(status.error.is_none());
    }
}
