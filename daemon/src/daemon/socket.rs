// Device session handler
// One read loop per connected device plus a writer task draining its outbound queue

use crate::daemon::protocol::{
    decode_envelope, encode_envelope, AnnotationAction, Envelope, Payload,
};
use crate::daemon::registry::SessionId;
use crate::daemon::sidecar::{sidecar_path, AnnotationRecord, UpsertOutcome};
use crate::daemon::state::AppState;
use crate::{Error, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::path::PathBuf;

/// `GET /ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, peer, state))
}

async fn handle_session(socket: WebSocket, peer: SocketAddr, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (registration, mut outbound) = state.sessions.register(peer);
    let session_id = registration.id();

    let hello = Envelope::keep_alive(chrono::Utc::now().timestamp());
    if let Err(e) = ws_tx
        .send(Message::Binary(Bytes::from(encode_envelope(&hello))))
        .await
    {
        tracing::warn!(%session_id, %peer, error = %e, "failed to send keep-alive");
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = ws_tx.send(Message::Binary(frame)).await {
                tracing::warn!(%session_id, error = %e, "write failed");
                break;
            }
        }
    });

    loop {
        match ws_rx.next().await {
            Some(Ok(Message::Binary(data))) => match decode_envelope(&data) {
                Ok(envelope) => handle_envelope(&state, session_id, envelope),
                Err(e) => {
                    tracing::warn!(%session_id, len = data.len(), error = %e, "skipping undecodable frame");
                }
            },
            Some(Ok(Message::Text(_))) => {
                tracing::warn!(%session_id, "skipping text frame");
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(%session_id, error = %e, "read failed");
                break;
            }
        }
    }

    drop(registration);
    writer.abort();
}

/// Act on one decoded envelope from a device
pub fn handle_envelope(state: &AppState, session_id: SessionId, envelope: Envelope) {
    match envelope.payload {
        Some(Payload::Ping(ping)) => {
            tracing::debug!(%session_id, timestamp = ping.timestamp, "keep-alive");
        }
        Some(Payload::OpenView(view)) => {
            tracing::info!(%session_id, asset_id = %view.asset_id, "device sent open_view, ignoring");
        }
        Some(Payload::Annotation(action)) => {
            let state = state.clone();
            tokio::spawn(async move {
                match apply_annotation(&state, action).await {
                    Ok((path, outcome)) => {
                        tracing::info!(%session_id, path = %path.display(), ?outcome, "annotation saved");
                    }
                    Err(Error::Validation(reason)) => {
                        tracing::warn!(%session_id, %reason, "annotation dropped");
                    }
                    Err(e) => {
                        tracing::error!(%session_id, error = %e, "failed to save annotation");
                    }
                }
            });
        }
        None => {
            tracing::debug!(%session_id, "envelope without payload");
        }
    }
}

/// Source document an annotation belongs to
///
/// A known asset id wins; otherwise a non-empty `file_path` is taken literally.
pub fn resolve_source(state: &AppState, action: &AnnotationAction) -> Option<PathBuf> {
    if !action.asset_id.is_empty() {
        if let Some(path) = state.routes.resolve(&action.asset_id) {
            return Some(path);
        }
    }
    if !action.file_path.is_empty() {
        return Some(PathBuf::from(&action.file_path));
    }
    None
}

/// Write an annotation into its document's sidecar; returns the sidecar path
pub async fn apply_annotation(
    state: &AppState,
    action: AnnotationAction,
) -> Result<(PathBuf, UpsertOutcome)> {
    let source = resolve_source(state, &action).ok_or_else(|| {
        Error::Validation(format!(
            "no document for asset id '{}' and no file path",
            action.asset_id
        ))
    })?;
    let data = action
        .data
        .as_ref()
        .ok_or_else(|| Error::Validation("annotation has no data".to_string()))?;
    if data.id.is_empty() {
        return Err(Error::Validation("annotation id is empty".to_string()));
    }

    tracing::debug!(action = %action.action(), id = %data.id, "applying annotation");

    let path = sidecar_path(&source);
    let outcome = state
        .sidecars
        .upsert_blocking(path.clone(), AnnotationRecord::from(data))
        .await?;
    Ok((path, outcome))
}
