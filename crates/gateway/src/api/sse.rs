//! Server-sent-events channel endpoint — the read-only sibling of the
//! WebSocket endpoint, for subscribers that only consume frames.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_core::Stream;

use relay_runtime::connection::ConnectionManager;

use crate::state::AppState;

/// GET /sse/{channel_id} — subscribe to a channel's outbound frames.
///
/// Dropping the HTTP connection drops the receiver; the channel manager
/// prunes the dead subscriber on its next broadcast.
pub async fn channel_sse(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (_subscriber, rx) = state.manager.connect(&channel_id).await;
    tracing::debug!(%channel_id, "sse subscriber connected");

    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        loop {
            let frame = rx.recv().await?;
            match Event::default().json_data(&frame) {
                Ok(event) => return Some((Ok(event), rx)),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize sse frame");
                    continue;
                }
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
