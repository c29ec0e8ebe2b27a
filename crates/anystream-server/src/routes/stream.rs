//! HLS delivery and session stop. Authorized by the streaming token only.

use anystream_core::Error;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use super::parse_media_ref_id;
use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

impl TokenQuery {
    fn require(self) -> Result<String, Error> {
        self.token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthorized("missing streaming token".into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    pub delete: bool,
}

/// GET /stream/{media_ref_id}/hls/playlist.m3u8?token=
pub async fn hls_playlist(
    State(ctx): State<AppContext>,
    Path(media_ref_id): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let token = query.require()?;
    let media_ref_id = parse_media_ref_id(&media_ref_id)?;
    let playlist = ctx.streams.get_playlist(media_ref_id, &token).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        playlist,
    )
        .into_response())
}

/// GET /stream/{media_ref_id}/hls/{segment_file}?token=
pub async fn hls_segment(
    State(ctx): State<AppContext>,
    Path((media_ref_id, segment_file)): Path<(String, String)>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, AppError> {
    let token = query.require()?;
    let media_ref_id = parse_media_ref_id(&media_ref_id)?;
    let not_found = || Error::not_found("segment", &segment_file);

    let session_matches = token
        .parse()
        .ok()
        .and_then(|t| ctx.streams.session(t))
        .is_some_and(|s| s.media_ref_id == media_ref_id);
    if !session_matches {
        return Err(not_found().into());
    }

    let path = ctx
        .streams
        .get_file_path_for_segment(&token, &segment_file)
        .await
        .ok_or_else(not_found)?;

    let file = tokio::fs::File::open(&path).await.map_err(|_| not_found())?;
    let len = file.metadata().await.map(|m| m.len()).ok();
    let body = Body::from_stream(ReaderStream::with_capacity(file, 64 * 1024));

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, segment_content_type(&segment_file))],
        body,
    )
        .into_response();
    if let Some(len) = len {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, len.into());
    }
    Ok(response)
}

/// GET /stream/stop/{token}?delete=
pub async fn stop_session(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
    Query(query): Query<StopQuery>,
) -> impl IntoResponse {
    let stopped = ctx.streams.stop_session(&token, query.delete).await;
    Json(serde_json::json!({ "stopped": stopped }))
}

/// GET /stream -- operator snapshot of live sessions.
pub async fn list_sessions(State(ctx): State<AppContext>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(ctx.streams.get_playback_sessions()?))
}

fn segment_content_type(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("ts") => "video/mp2t",
        Some("m4s") => "video/iso.segment",
        Some("mp4") => "video/mp4",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        _ => "application/octet-stream",
    }
}
