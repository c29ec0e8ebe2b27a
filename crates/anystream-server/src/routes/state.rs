//! Playback-state HTTP surface.

use anystream_core::{Error, UserId};
use anystream_db::models::PlaybackState;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use super::parse_media_ref_id;
use crate::context::AppContext;
use crate::error::AppError;

/// A client position report. Also accepts a full playback state echoed
/// back with an updated `position_secs`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PositionUpdate {
    #[serde(alias = "position_secs")]
    pub position: f64,
}

/// GET /stream/{media_ref_id}/state
pub async fn get_state(
    State(ctx): State<AppContext>,
    Extension(user_id): Extension<UserId>,
    Path(media_ref_id): Path<String>,
) -> Result<Json<PlaybackState>, AppError> {
    let media_ref_id = parse_media_ref_id(&media_ref_id)?;
    ctx.streams
        .get_playback_state(media_ref_id, user_id, false)?
        .map(Json)
        .ok_or_else(|| Error::not_found("playback_state", media_ref_id).into())
}

/// PUT /stream/{media_ref_id}/state
pub async fn put_state(
    State(ctx): State<AppContext>,
    Extension(user_id): Extension<UserId>,
    Path(media_ref_id): Path<String>,
    body: Result<Json<PositionUpdate>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(update) = body?;
    let media_ref_id = parse_media_ref_id(&media_ref_id)?;

    let state = ctx
        .streams
        .get_playback_state(media_ref_id, user_id, false)?
        .ok_or_else(|| Error::not_found("playback_state", media_ref_id))?;

    if ctx.streams.update_state_position(state.id, update.position) {
        Ok(StatusCode::OK)
    } else {
        Err(Error::Internal(format!("failed to store position for state {}", state.id)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_update_accepts_both_spellings() {
        let a: PositionUpdate = serde_json::from_str(r#"{"position": 12.5}"#).unwrap();
        let b: PositionUpdate =
            serde_json::from_str(r#"{"id": "x", "position_secs": 30, "runtime_secs": 60}"#).unwrap();
        assert_eq!(a.position, 12.5);
        assert_eq!(b.position, 30.0);
        assert!(serde_json::from_str::<PositionUpdate>(r#"{"position": "soon"}"#).is_err());
    }
}
