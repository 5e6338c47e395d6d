use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sharenet_registry::{SearchRequest, SortKey};
use sharenet_types::{FileRecord, FileRegistration, NetworkStats, Peer, PeerRegistration};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use url::Url;

use crate::service::DirectoryService;

type SharedService = Arc<DirectoryService>;

/// Header carrying the caller's peer id on heartbeats.
pub const PEER_ID_HEADER: &str = "X-Peer-ID";

#[derive(Debug, Serialize)]
struct RegisterPeerResponse {
    status: &'static str,
    peer_id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct RegisterFileResponse {
    status: &'static str,
    file_id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<FileRecord>,
    count: usize,
    query: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    observers: usize,
    peers: usize,
    files: usize,
}

/// Raw search query; `sort` and `limit` are parsed leniently.
#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    limit: Option<String>,
}

impl SearchParams {
    fn into_request(self, default_limit: usize) -> SearchRequest {
        let limit = self
            .limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .unwrap_or(default_limit);
        SearchRequest {
            query: self.q,
            category: self.category,
            sort: self.sort.as_deref().map(SortKey::parse).unwrap_or_default(),
            limit,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

pub async fn start_server(service: SharedService, addr: &str) -> Result<()> {
    let app = build_router(service);
    let listener = bind_listener(addr).await?;
    info!(
        "Directory listening on http://{}",
        listener.local_addr().context("listener has no local address")?
    );
    axum::serve(listener, app)
        .await
        .context("directory server terminated unexpectedly")
}

pub async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind directory listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind directory listener on {addr}"))
    }
}

pub fn build_router(service: SharedService) -> Router {
    let api = Router::new()
        .route("/peers/register", post(handle_register_peer))
        .route("/peers/heartbeat", post(handle_heartbeat))
        .route("/peers", get(handle_list_peers))
        .route("/files/register", post(handle_register_file))
        .route("/files/search", get(handle_search))
        .route("/files", get(handle_list_files))
        .route("/stats", get(handle_stats))
        .route("/download/:file_id", get(handle_download))
        .route("/health", get(handle_health));

    Router::new()
        .nest("/api/v1", api)
        .route("/ws", get(handle_ws))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn handle_register_peer(
    State(service): State<SharedService>,
    payload: Result<Json<PeerRegistration>, JsonRejection>,
) -> Result<Json<RegisterPeerResponse>, ApiError> {
    let Json(registration) = payload?;
    let peer = service.register_peer(registration);
    Ok(Json(RegisterPeerResponse {
        status: "success",
        peer_id: peer.id,
        message: "Peer registered successfully",
    }))
}

/// Best effort: unknown ids still get 200.
async fn handle_heartbeat(
    State(service): State<SharedService>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let peer_id = headers
        .get(PEER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::bad_request("Peer ID required"))?;

    if let Err(err) = service.heartbeat(peer_id) {
        debug!("Ignoring heartbeat: {}", err);
    }
    Ok(StatusCode::OK)
}

async fn handle_list_peers(State(service): State<SharedService>) -> Json<Vec<Peer>> {
    Json(service.list_peers())
}

async fn handle_register_file(
    State(service): State<SharedService>,
    payload: Result<Json<FileRegistration>, JsonRejection>,
) -> Result<Json<RegisterFileResponse>, ApiError> {
    let Json(registration) = payload?;
    let record = service.register_file(registration);
    Ok(Json(RegisterFileResponse {
        status: "success",
        file_id: record.id,
        message: "File registered successfully",
    }))
}

async fn handle_search(
    State(service): State<SharedService>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let request = params.into_request(service.search_limit());
    let results = service.search(&request);
    Json(SearchResponse {
        count: results.len(),
        results,
        query: request.query,
    })
}

async fn handle_list_files(State(service): State<SharedService>) -> Json<Vec<FileRecord>> {
    Json(service.list_files())
}

async fn handle_stats(State(service): State<SharedService>) -> Json<NetworkStats> {
    Json(service.stats())
}

/// Count the download and redirect the client to the owning peer agent.
async fn handle_download(
    State(service): State<SharedService>,
    Path(file_id): Path<String>,
) -> Result<Response, ApiError> {
    let record = service
        .record_download(&file_id)
        .map_err(|_| ApiError::not_found("File not found"))?;

    let location = peer_download_url(&record)?;
    debug!("Redirecting download of {} to {}", record.id, location);
    Ok((StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response())
}

fn peer_download_url(record: &FileRecord) -> Result<Url, ApiError> {
    let mut url = Url::parse(&format!("http://{}/download", record.peer_address)).map_err(|err| {
        ApiError::internal(format!(
            "invalid peer address {}: {err}",
            record.peer_address
        ))
    })?;
    url.query_pairs_mut()
        .append_pair("filename", &record.filename);
    Ok(url)
}

async fn handle_health(State(service): State<SharedService>) -> Json<HealthResponse> {
    let stats = service.stats();
    Json(HealthResponse {
        status: "ok",
        uptime_secs: service.uptime_secs(),
        observers: service.hub().observer_count(),
        peers: stats.total_peers,
        files: stats.total_files,
    })
}

async fn handle_ws(State(service): State<SharedService>, ws: WebSocketUpgrade) -> Response {
    let hub = service.hub().clone();
    let initial = service.stats_event();
    ws.on_upgrade(move |socket| sharenet_notify::serve_socket(socket, hub, initial))
}
