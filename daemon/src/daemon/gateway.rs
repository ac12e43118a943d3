// HTTP surface of the daemon: trigger endpoints, asset downloads, device socket

use crate::daemon::protocol::{Envelope, FileType, ShowRequest, WS_PATH};
use crate::daemon::socket;
use crate::daemon::state::AppState;
use crate::Error;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Prefix shared by the trigger endpoints
pub const TRIGGER_PREFIX: &str = "/api/v1/trigger";

/// Library error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Decode(_) | Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Io(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, self.0.to_string()).into_response()
    }
}

/// Full daemon router
pub fn router(state: AppState) -> Router {
    let trigger = Router::new()
        .route("/show", post(trigger_show))
        .route("/md", post(trigger_markdown))
        .layer(middleware::from_fn(loopback_only));

    Router::new()
        .route(WS_PATH, get(socket::ws_handler))
        .route("/assets/{id}", get(serve_asset))
        .nest(TRIGGER_PREFIX, trigger)
        .with_state(state)
}

/// Rejects trigger calls from anything but the local machine
async fn loopback_only(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if !peer.ip().to_canonical().is_loopback() {
        tracing::warn!(%peer, path = %request.uri().path(), "rejected non-loopback trigger");
        return ApiError(Error::Forbidden(format!("{} is not a local caller", peer.ip())))
            .into_response();
    }
    next.run(request).await
}

async fn trigger_show(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    trigger(&state, FileType::Image, &body).await
}

async fn trigger_markdown(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<String, ApiError> {
    trigger(&state, FileType::Markdown, &body).await
}

async fn trigger(state: &AppState, file_type: FileType, body: &[u8]) -> Result<String, ApiError> {
    let request: ShowRequest = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("invalid request body: {}", e)))?;

    let asset_id = state
        .assets
        .register(&request.file_path)
        .await
        .map_err(|e| Error::Validation(format!("failed to access file: {}", e)))?;

    let source = state
        .assets
        .lookup(&asset_id)
        .map(|entry| entry.absolute_path)
        .unwrap_or_else(|| PathBuf::from(&request.file_path));
    state.routes.record(&asset_id, source.clone());

    let title = if request.title.is_empty() {
        source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        request.title
    };

    let delivered = state
        .sessions
        .broadcast(&Envelope::open_view(&asset_id, file_type, &title));
    tracing::info!(
        %asset_id,
        path = %source.display(),
        %file_type,
        delivered,
        "triggered view"
    );

    Ok(format!("Showing {} (ID: {})", request.file_path, asset_id))
}

/// `GET /assets/{id}`
async fn serve_asset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let asset = state.assets.serve(&id).await?;
    tracing::debug!(asset_id = %id, bytes = asset.bytes.len(), "serving asset");
    Ok(([(header::CONTENT_TYPE, asset.content_type)], asset.bytes).into_response())
}
