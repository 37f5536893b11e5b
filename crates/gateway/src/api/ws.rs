//! WebSocket channel endpoint.
//!
//! Flow:
//! 1. Client connects to `/ws/{channel_id}` and is subscribed to the
//!    channel's outbound frames.
//! 2. Client sends `{message, threadId?, runId?, agentId?}` JSON frames;
//!    each one triggers a run on this channel.
//! 3. Run frames (stream/close/error) fan out to every subscriber of
//!    the channel until the socket closes.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use relay_domain::message::ChatMessage;
use relay_runtime::connection::ConnectionManager;
use relay_runtime::{start_run, TriggerRun};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundFrame {
    message: String,
    thread_id: Option<Uuid>,
    run_id: Option<Uuid>,
    agent_id: Option<String>,
    tenant_id: Option<String>,
}

pub async fn channel_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, channel_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, channel_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (subscriber, mut frames) = state.manager.connect(&channel_id).await;
    tracing::debug!(%channel_id, "websocket subscriber connected");

    // Outbound: channel frames → socket.
    let forward = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Inbound: trigger frames → runs.
    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let inbound: InboundFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%channel_id, error = %e, "ignoring malformed inbound frame");
                continue;
            }
        };

        let mut trigger = TriggerRun::new(&channel_id, ChatMessage::user(inbound.message));
        trigger.thread_id = inbound.thread_id;
        trigger.run_id = inbound.run_id;
        trigger.agent_id = inbound.agent_id;
        trigger.tenant_id = inbound.tenant_id;

        let env = state.env.clone();
        let run_channel = channel_id.clone();
        tokio::spawn(async move {
            match start_run(trigger, &env).await {
                Ok(run) => {
                    tracing::debug!(channel_id = %run_channel, run_id = %run.id, status = ?run.status, "run finished");
                }
                Err(e) => {
                    tracing::warn!(channel_id = %run_channel, error = %e, "run rejected");
                }
            }
        });
    }

    state.manager.disconnect(&channel_id, subscriber).await;
    forward.abort();
    tracing::debug!(%channel_id, "websocket subscriber disconnected");
}
