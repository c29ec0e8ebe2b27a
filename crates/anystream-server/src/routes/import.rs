//! Import and refresh triggers.

use std::path::PathBuf;

use anystream_core::Error;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::parse_media_ref_id;
use crate::context::AppContext;
use crate::error::AppError;
use crate::importer::ImportSummary;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub path: PathBuf,
}

/// POST /api/import -- scan a directory and return the summary.
pub async fn run_import(
    State(ctx): State<AppContext>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<ImportSummary>, AppError> {
    let Json(request) = body?;
    if !request.path.is_absolute() {
        return Err(Error::Validation(format!(
            "import path must be absolute: {}",
            request.path.display()
        ))
        .into());
    }
    if !tokio::fs::metadata(&request.path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(Error::not_found("directory", request.path.display()).into());
    }

    Ok(Json(ctx.importer.import_all(request.path).await))
}

/// POST /api/media-refs/{id}/refresh -- re-probe one reference.
pub async fn refresh_media_ref(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<anystream_db::models::MediaRef>, AppError> {
    let media_ref_id = parse_media_ref_id(&id)?;
    Ok(Json(ctx.importer.refresh(media_ref_id).await?))
}
