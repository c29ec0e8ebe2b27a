//! Catalog lookups and preview generation.

use anystream_core::events::{EventCategory, EventPayload};
use anystream_core::{Error, MediaId};
use anystream_db::models::{Media, MediaRef};
use anystream_db::pool::get_conn;
use anystream_db::queries::media_refs;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::parse_media_ref_id;
use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct MediaDetail {
    pub media: Media,
    pub media_refs: Vec<MediaRef>,
}

/// GET /api/media/{id}
pub async fn get_media(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<MediaDetail>, AppError> {
    let media_id: MediaId = id.parse().map_err(|_| Error::not_found("media", &id))?;
    let conn = get_conn(&ctx.db)?;
    let (media, media_refs) = media_refs::find_content_with_refs(&conn, media_id)?
        .ok_or_else(|| Error::not_found("media", media_id))?;
    Ok(Json(MediaDetail { media, media_refs }))
}

/// POST /api/media-refs/{id}/previews -- generate thumbnails in the
/// background.
pub async fn generate_previews(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let media_ref_id = parse_media_ref_id(&id)?;
    let media_ref = media_refs::get_media_ref(&*get_conn(&ctx.db)?, media_ref_id)?
        .ok_or_else(|| Error::not_found("media_ref", media_ref_id))?;
    let input = media_ref.file_path().cloned().ok_or_else(|| {
        Error::Validation(format!("media_ref {media_ref_id} is not a local file"))
    })?;
    ctx.tools.require("ffmpeg")?;

    let output_dir = ctx
        .config
        .streaming
        .previews_dir()
        .join(media_ref_id.to_string());

    let task_ctx = ctx.clone();
    let task_dir = output_dir.clone();
    tokio::spawn(async move {
        match anystream_av::generate_previews(&task_ctx.tools, &input, &task_dir).await {
            Ok(count) => {
                tracing::info!(media_ref_id = %media_ref_id, count, "Previews generated");
                task_ctx.event_bus.broadcast(
                    EventCategory::Admin,
                    EventPayload::PreviewsGenerated {
                        media_ref_id,
                        count,
                    },
                );
            }
            Err(e) => {
                tracing::warn!(media_ref_id = %media_ref_id, "Preview generation failed: {e}");
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "media_ref_id": media_ref_id,
            "output_dir": output_dir,
        })),
    ))
}
