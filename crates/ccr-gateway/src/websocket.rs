//! WebSocket transport for console sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};

use crate::server_bootstrap::ConsoleServerState;
use crate::session_coordinator::{OutboundSink, SessionClosed};
use crate::ws_protocol::{build_console_error_frame, ConsoleResponseFrame, CONSOLE_WS_HEARTBEAT_INTERVAL_SECONDS};

fn console_ws_message_from_frame(frame: &ConsoleResponseFrame) -> WsMessage {
    match serde_json::to_string(frame) {
        Ok(raw) => WsMessage::Text(raw.into()),
        Err(error) => {
            let fallback =
                build_console_error_frame(format!("failed to serialize console frame: {error}"));
            WsMessage::Text(
                serde_json::to_string(&fallback)
                    .unwrap_or_else(|_| {
                        "{\"type\":\"log_error\",\"data\":\"failed to serialize console frame\"}"
                            .to_string()
                    })
                    .into(),
            )
        }
    }
}

#[async_trait]
impl OutboundSink for SplitSink<WebSocket, WsMessage> {
    async fn send_frame(&mut self, frame: ConsoleResponseFrame) -> Result<(), SessionClosed> {
        self.send(console_ws_message_from_frame(&frame))
            .await
            .map_err(|_| SessionClosed)
    }
}

pub(crate) async fn run_console_ws_connection(state: Arc<ConsoleServerState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(
        CONSOLE_WS_HEARTBEAT_INTERVAL_SECONDS.max(1),
    ));
    heartbeat.tick().await;
    tracing::info!("console websocket session opened");

    loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(inbound) = inbound else {
                    break;
                };
                let message = match inbound {
                    Ok(message) => message,
                    Err(error) => {
                        tracing::debug!(%error, "console websocket read failed");
                        break;
                    }
                };

                let outcome = match message {
                    WsMessage::Text(text) => {
                        state.coordinator.handle_text(text.as_str(), &mut sender).await
                    }
                    WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => state.coordinator.handle_text(text.as_str(), &mut sender).await,
                        Err(_) => {
                            sender
                                .send_frame(build_console_error_frame(
                                    "Invalid request: binary frames must be UTF-8 encoded JSON text",
                                ))
                                .await
                        }
                    },
                    WsMessage::Ping(payload) => sender
                        .send(WsMessage::Pong(payload))
                        .await
                        .map_err(|_| SessionClosed),
                    WsMessage::Pong(_) => Ok(()),
                    WsMessage::Close(_) => break,
                };
                if outcome.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("console websocket session closed");
}
