//! WebSocket endpoints: the operator session feed and per-playback
//! position tracking.

use anystream_core::UserId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Extension;
use futures::{SinkExt, StreamExt};
use tokio::time::MissedTickBehavior;

use super::parse_media_ref_id;
use super::state::PositionUpdate;
use crate::context::AppContext;
use crate::streaming::PlaybackSessionsResponse;

/// WS /ws/stream
pub async fn sessions_ws(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> Response {
    ws.on_upgrade(move |socket| feed_sessions(socket, ctx))
}

/// Send a snapshot every poll interval, skipping unchanged ones.
async fn feed_sessions(socket: WebSocket, ctx: AppContext) {
    let (mut sender, mut receiver) = socket.split();
    let mut ticker = tokio::time::interval(ctx.config.streaming.sessions_poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut previous: Option<PlaybackSessionsResponse> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let next = match ctx.streams.get_playback_sessions() {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::warn!("Failed to build session snapshot: {e}");
                        continue;
                    }
                };
                if previous.as_ref() == Some(&next) {
                    continue;
                }
                let Ok(text) = serde_json::to_string(&next) else {
                    continue;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
                previous = Some(next);
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = ctx.cancel.cancelled() => break,
        }
    }
    tracing::debug!("Session feed closed");
}

/// WS /ws/stream/{media_ref_id}/state
pub async fn state_ws(
    ws: WebSocketUpgrade,
    State(ctx): State<AppContext>,
    Extension(user_id): Extension<UserId>,
    Path(media_ref_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| track_playback(socket, ctx, user_id, media_ref_id))
}

/// Send the playback state once, apply position frames until the client
/// leaves, then settle completion with the last reported position.
async fn track_playback(mut socket: WebSocket, ctx: AppContext, user_id: UserId, media_ref_id: String) {
    let state = match parse_media_ref_id(&media_ref_id)
        .and_then(|id| ctx.streams.get_playback_state(id, user_id, true))
    {
        Ok(Some(state)) => state,
        Ok(None) => {
            tracing::debug!(media_ref_id, "No playable reference for state socket");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        Err(e) => {
            tracing::warn!(media_ref_id, "Failed to load playback state: {e}");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let text = match serde_json::to_string(&state) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(state_id = %state.id, "Failed to encode playback state: {e}");
            return;
        }
    };
    if socket.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    let mut final_position = state.position_secs;
    loop {
        let msg = tokio::select! {
            msg = socket.recv() => msg,
            _ = ctx.cancel.cancelled() => None,
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<PositionUpdate>(text.as_str()) {
                    Ok(update) => {
                        ctx.streams.update_state_position(state.id, update.position);
                        final_position = update.position;
                    }
                    Err(e) => tracing::debug!(state_id = %state.id, "Ignoring malformed position frame: {e}"),
                }
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }

    ctx.streams.finish_playback(&state, final_position).await;
}
