//! WebSocket handler for published camera events

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use ipcam_core::{DeviceId, NodeDiscovery, OutputHandle, PublishEvent, RunState};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// WebSocket message types
#[derive(Serialize)]
#[serde(tag = "type", content = "data")]
enum WsMessage {
    #[serde(rename = "device")]
    Device(NodeDiscovery),
    #[serde(rename = "output_value")]
    OutputValue { output: OutputHandle, value: String },
    /// Raw payloads travel base64 encoded
    #[serde(rename = "raw_output")]
    RawOutput {
        output: OutputHandle,
        signed: bool,
        size: usize,
        payload: String,
    },
    #[serde(rename = "status")]
    Status {
        device: DeviceId,
        key: String,
        value: String,
    },
    #[serde(rename = "run_state")]
    RunState {
        device: DeviceId,
        state: RunState,
        message: String,
    },
    #[serde(rename = "config_updated")]
    ConfigUpdated { device: DeviceId, attrs: Vec<String> },
    #[serde(rename = "pong")]
    Pong,
}

impl From<PublishEvent> for WsMessage {
    fn from(event: PublishEvent) -> Self {
        match event {
            PublishEvent::OutputValue { output, value } => WsMessage::OutputValue { output, value },
            PublishEvent::RawOutput {
                output,
                signed,
                payload,
            } => WsMessage::RawOutput {
                output,
                signed,
                size: payload.len(),
                payload: STANDARD.encode(&payload),
            },
            PublishEvent::Status { device, key, value } => WsMessage::Status { device, key, value },
            PublishEvent::RunState {
                device,
                state,
                message,
            } => WsMessage::RunState {
                device,
                state,
                message,
            },
            PublishEvent::ConfigUpdated { device, attrs } => {
                WsMessage::ConfigUpdated { device, attrs }
            }
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json<S>(sender: &mut S, msg: &WsMessage) -> bool
where
    S: SinkExt<Message> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to encode WebSocket message");
            true
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    info!("WebSocket client connected");

    // Send current camera list on connect
    for device in state.registry.discover_all() {
        if !send_json(&mut sender, &WsMessage::Device(device)).await {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if !send_json(&mut sender, &WsMessage::from(event)).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Publish event channel lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Publish event channel closed");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        if text.as_str() == "ping" && !send_json(&mut sender, &WsMessage::Pong).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}
