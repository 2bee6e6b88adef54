//! Websocket fan-out of relay events
//!
//! Each connection subscribes to the event bus and forwards every event as
//! a JSON text frame. Incoming frames are ignored apart from close and
//! ping handling; viewers only listen.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use super::handlers::ApiState;
use crate::types::RelayEvent;

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serialize one event into the wire frame
pub fn event_frame(event: &RelayEvent) -> Result<Message, serde_json::Error> {
    serde_json::to_string(event).map(Message::Text)
}

async fn handle_socket(socket: WebSocket, state: ApiState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let shutdown = state.shutdown.clone();

    info!(subscribers = state.events.subscriber_count(), "Viewer connected");

    let forward_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                result = events.recv() => match result {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Viewer lagged behind, events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            let frame = match event_frame(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(event = event.name(), error = %e, "Failed to serialize event");
                    continue;
                }
            };
            if let Err(e) = sender.send(frame).await {
                debug!(error = %e, "Viewer socket closed while forwarding");
                break;
            }
        }
    });

    // Drain the inbound side so pings are answered and close is noticed
    loop {
        let result = tokio::select! {
            () = state.shutdown.cancelled() => break,
            result = receiver.next() => result,
        };
        match result {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Viewer socket error");
                break;
            }
        }
    }

    if state.shutdown.is_cancelled() {
        // Let the forwarder send its close frame
        let _ = forward_task.await;
    } else {
        forward_task.abort();
    }
    info!("Viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_frame_is_text_json() {
        let frame = event_frame(&RelayEvent::DataCleared).unwrap();
        match frame {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(value["event"], "data-cleared");
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
