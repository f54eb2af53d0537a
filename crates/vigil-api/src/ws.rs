//! WebSocket state stream.
//!
//! Each connection subscribes to the pipeline's watch channel and forwards
//! the latest snapshot at a bounded rate. Intermediate snapshots are skipped,
//! so a slow client never builds a backlog.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use vigil_models::PipelineState;

use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

const WS_SEND_INTERVAL: Duration = Duration::from_millis(250);
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const ENDPOINT: &str = "state";

/// WebSocket state endpoint.
pub async fn ws_state(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection(ENDPOINT);

    ws.on_upgrade(|socket| async move {
        handle_state_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn send_state(sender: &mut SplitSink<WebSocket, Message>, snapshot: &PipelineState) -> bool {
    let json = match serde_json::to_string(snapshot) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize pipeline state: {}", e);
            return false;
        }
    };
    if sender.send(Message::Text(json)).await.is_err() {
        return false;
    }
    metrics::record_ws_message_sent(ENDPOINT);
    true
}

async fn handle_state_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.pipeline.subscribe();
    info!("State WebSocket connected");

    let initial = updates.borrow_and_update().clone();
    if !send_state(&mut sender, &initial).await {
        return;
    }

    let mut ticker = interval(WS_SEND_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match updates.has_changed() {
                    Ok(true) => {
                        let snapshot = updates.borrow_and_update().clone();
                        if !send_state(&mut sender, &snapshot).await {
                            break;
                        }
                    }
                    Ok(false) => {}
                    // Pipeline dropped
                    Err(_) => break,
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("State WebSocket heartbeat failed");
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("State WebSocket disconnected");
}
