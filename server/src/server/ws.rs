//! WebSocket log streaming

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use tokio::sync::broadcast;

use crate::models::LogLine;
use crate::server::state::ServerState;

/// Idle time before a keepalive ping is sent
const KEEPALIVE: Duration = Duration::from_secs(30);

/// Upgrade handler for `/ws/logs/{id}`
pub async fn logs_ws_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_logs(state, id, socket))
}

/// Send the accumulated backlog, then live lines as they are published,
/// with a keepalive ping whenever the stream goes quiet.
async fn stream_logs(state: Arc<ServerState>, deployment_id: String, mut socket: WebSocket) {
    // Subscribe before reading the backlog so no line falls in the gap;
    // lines seen twice at the seam are harmless for log viewers.
    let mut live = state.hub().subscribe(&deployment_id).await;

    match state.store().get_logs(&deployment_id).await {
        Ok(backlog) => {
            for line in backlog {
                if send_line(&mut socket, &line).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            tracing::warn!("Could not load log backlog for {}: {}", deployment_id, e);
        }
    }

    loop {
        tokio::select! {
            received = live.recv() => {
                match received {
                    Ok(line) => {
                        if send_line(&mut socket, &line).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(
                            "WebSocket for {} lagged, {} lines dropped",
                            deployment_id,
                            missed
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::time::sleep(KEEPALIVE) => {
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    drop(live);
    state.hub().reap(&deployment_id).await;
}

async fn send_line(socket: &mut WebSocket, line: &LogLine) -> Result<(), axum::Error> {
    let payload = match serde_json::to_string(line) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!("Unserializable log line: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(payload.into())).await
}
