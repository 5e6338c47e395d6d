use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sharenet_types::SharedFile;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeFile;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::agent::{AgentStats, DownloadTarget, PeerAgent, PeerInfo};
use crate::error::AgentError;

type SharedAgent = Arc<PeerAgent>;

/// Room for multipart framing on top of the file payload.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct ShareResponse {
    status: &'static str,
    file_id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct UnshareResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SharedFile>,
    count: usize,
    query: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    category: String,
}

#[derive(Debug, Default, Deserialize)]
struct UnshareParams {
    #[serde(default)]
    delete: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyDownloadParams {
    #[serde(default)]
    filename: Option<String>,
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

    fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        let status = match &err {
            AgentError::FileNotFound(_) | AgentError::FileUnavailable(_) => StatusCode::NOT_FOUND,
            AgentError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AgentError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
            AgentError::NotRegistered => StatusCode::SERVICE_UNAVAILABLE,
            AgentError::Directory(_) | AgentError::DirectoryStatus(_) => StatusCode::BAD_GATEWAY,
            AgentError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
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

pub async fn start_server(agent: SharedAgent, addr: &str) -> Result<()> {
    let app = build_router(agent);
    let listener = bind_listener(addr).await?;
    info!(
        "Agent listening on http://{}",
        listener.local_addr().context("listener has no local address")?
    );
    axum::serve(listener, app)
        .await
        .context("agent server terminated unexpectedly")
}

pub async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind agent listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind agent listener on {addr}"))
    }
}

pub fn build_router(agent: SharedAgent) -> Router {
    let body_limit = usize::try_from(agent.config().max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/info", get(handle_info))
        .route("/files", get(handle_list_files))
        .route("/files/share", post(handle_share))
        .route("/upload", post(handle_share))
        .route("/files/unshare/:file_id", delete(handle_unshare))
        .route("/download/:file_id", get(handle_download_by_id))
        .route("/download", get(handle_download_by_name))
        .route("/stats", get(handle_stats))
        .route("/search", get(handle_search));

    Router::new()
        .nest("/api/v1", api)
        .route("/download", get(handle_download_by_name))
        .route("/ws", get(handle_ws))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(agent)
}

async fn handle_info(State(agent): State<SharedAgent>) -> Json<PeerInfo> {
    Json(agent.peer_info())
}

async fn handle_list_files(State(agent): State<SharedAgent>) -> Json<Vec<SharedFile>> {
    Json(agent.index().list_available())
}

async fn handle_share(
    State(agent): State<SharedAgent>,
    mut multipart: Multipart,
) -> Result<Json<ShareResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("File name required"))?;
        let data = field
            .bytes()
            .await
            .map_err(|err| ApiError::new(err.status(), err.body_text()))?;

        let file = agent.share(&filename, &data).await?;
        return Ok(Json(ShareResponse {
            status: "success",
            file_id: file.id,
            message: "File shared successfully",
        }));
    }

    Err(ApiError::bad_request("File required"))
}

async fn handle_unshare(
    State(agent): State<SharedAgent>,
    Path(file_id): Path<String>,
    Query(params): Query<UnshareParams>,
) -> Result<Json<UnshareResponse>, ApiError> {
    let delete = params
        .delete
        .as_deref()
        .is_some_and(|value| value.eq_ignore_ascii_case("true"));
    agent.unshare(&file_id, delete).await?;
    Ok(Json(UnshareResponse {
        status: "success",
        message: "File unshared successfully",
    }))
}

async fn handle_download_by_id(
    State(agent): State<SharedAgent>,
    Path(file_id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    serve_download(&agent, DownloadTarget::Id(&file_id), request).await
}

async fn handle_download_by_name(
    State(agent): State<SharedAgent>,
    Query(params): Query<LegacyDownloadParams>,
    request: Request,
) -> Result<Response, ApiError> {
    let filename = params
        .filename
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("filename required"))?;
    serve_download(&agent, DownloadTarget::Filename(&filename), request).await
}

/// Stream the file bytes as an attachment.
///
/// Only a full `GET` answered with 200 counts as a download; range,
/// conditional and `HEAD` requests are served without touching the counters.
async fn serve_download(
    agent: &PeerAgent,
    target: DownloadTarget<'_>,
    request: Request,
) -> Result<Response, ApiError> {
    let _active = agent.index().begin_download();
    let file = agent.prepare_download(target).await?;
    let is_get = request.method() == Method::GET;

    let mut response = ServeFile::new(&file.file_path)
        .oneshot(request)
        .await
        .map_err(|err| ApiError::internal(format!("failed to serve {}: {err}", file.filename)))?
        .map(Body::new);

    if response.status() == StatusCode::NOT_FOUND {
        return Err(AgentError::FileUnavailable(file.filename).into());
    }

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&file.filename));

    if is_get && response.status() == StatusCode::OK {
        if let Err(err) = agent.complete_download(&file.id) {
            warn!("Served {} but could not count it: {}", file.filename, err);
        }
        info!("File downloaded: {}", file.filename);
    } else {
        debug!("Served {} with status {}", file.filename, response.status());
    }
    Ok(response)
}

fn content_disposition(filename: &str) -> HeaderValue {
    let escaped = filename.replace(['"', '\\'], "_");
    HeaderValue::from_str(&format!("attachment; filename=\"{escaped}\"")).unwrap_or_else(|err| {
        warn!("Filename {:?} is not a valid header value: {}", filename, err);
        HeaderValue::from_static("attachment")
    })
}

async fn handle_stats(State(agent): State<SharedAgent>) -> Json<AgentStats> {
    Json(agent.stats())
}

async fn handle_search(
    State(agent): State<SharedAgent>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let query = params.q.to_lowercase();
    let results = agent.index().search(&query, &params.category);
    Json(SearchResponse {
        count: results.len(),
        results,
        query,
    })
}

async fn handle_ws(State(agent): State<SharedAgent>, ws: WebSocketUpgrade) -> Response {
    let hub = agent.hub().clone();
    let initial = agent.peer_info_event();
    ws.on_upgrade(move |socket| sharenet_notify::serve_socket(socket, hub, initial))
}
