//! Telephony media-stream WebSocket handler
//!
//! Binds one telephony media connection to one [`BridgeController`]. All
//! outbound frames for the connection (media, marks, clears) pass through a
//! single channel drained by a dedicated sender task, so frames from the AI
//! side and from the controller never interleave on the socket.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::BridgeController;
use crate::core::telephony::MediaStreamRoute;
use crate::state::{AppState, ConnectionSlot};

/// Outbound frames buffered per connection
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Upper bound on how often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Time the sender task gets to flush the close frame
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Media stream WebSocket handler
///
/// Upgrades `GET /media-stream` to a WebSocket speaking the telephony
/// media-stream protocol (`connected`, `start`, `media`, `mark`, `stop`).
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    slot: Option<Extension<ConnectionSlot>>,
) -> Response {
    let slot = slot.map(|Extension(slot)| slot);
    debug!(ip = ?slot.as_ref().map(ConnectionSlot::ip), "Media stream upgrade requested");

    // The slot lives as long as the socket task; if the upgrade fails the
    // callback is dropped and the slot with it.
    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state, slot))
}

/// Resolves when `token` is cancelled; never resolves without one.
async fn superseded(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled_owned().await,
        None => std::future::pending().await,
    }
}

async fn handle_media_socket(socket: WebSocket, app_state: Arc<AppState>, slot: Option<ConnectionSlot>) {
    info!("Media stream connection established");

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<MediaStreamRoute>(CHANNEL_BUFFER_SIZE);

    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                MediaStreamRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MediaStreamRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut controller = BridgeController::new(Arc::clone(&app_state.registry), route_tx.clone());

    let idle_timeout = app_state.config.idle_timeout();
    let idle_check = idle_timeout.min(IDLE_CHECK_INTERVAL);
    let mut last_activity = std::time::Instant::now();

    loop {
        let close_requested = controller.close_requested();
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        if controller.handle_text(text.as_str()).await.is_break() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!(bytes = data.len(), "Ignoring binary frame on media stream");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Media stream closed by transport");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Media stream WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Media stream connection closed by transport");
                        break;
                    }
                }
            }
            _ = superseded(close_requested) => {
                info!("Leg superseded by a newer connection; closing");
                break;
            }
            _ = tokio::time::sleep(idle_check) => {
                if last_activity.elapsed() >= idle_timeout {
                    warn!(
                        "Media stream idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    break;
                }
                debug!("Media stream idle check - still active");
            }
        }
    }

    // Cleanup
    controller.close().await;

    let _ = tokio::time::timeout(SENDER_DRAIN_TIMEOUT, route_tx.send(MediaStreamRoute::Close)).await;
    drop(route_tx);
    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    drop(slot);
    info!("Media stream connection terminated");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_superseded_waits_for_cancel() {
        let token = CancellationToken::new();
        let wait = tokio::spawn(superseded(Some(token.clone())));
        tokio::task::yield_now().await;
        assert!(!wait.is_finished());
        token.cancel();
        assert!(wait.await.is_ok());
    }

    #[tokio::test]
    async fn test_superseded_without_token_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(20), superseded(None)).await;
        assert!(fired.is_err());
    }
}
