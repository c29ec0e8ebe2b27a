//! Episode import: resolve the show/season/episode hierarchy and link the
//! file. Batches probe concurrently up to the configured limit and write
//! the catalog sequentially in candidate order.

use std::path::Path;
use std::sync::Arc;

use anystream_core::{ContentKind, Error, ProbeInfo, Result};
use anystream_db::pool::get_conn;
use anystream_db::queries::media::{self, NewMedia};
use anystream_db::queries::media_refs;
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::classifier::Classification;
use super::processor::{ImportCandidate, ImportContext, ImportProcessor};
use super::ImportResult;

pub struct TvProcessor;

/// Parsed episode coordinates borrowed from a candidate.
struct EpisodeInfo<'a> {
    show: &'a str,
    year: Option<i32>,
    season: i32,
    episode: i32,
    title: Option<&'a str>,
}

impl<'a> EpisodeInfo<'a> {
    fn from_candidate(candidate: &'a ImportCandidate) -> Option<Self> {
        match &candidate.classification {
            Classification::Episode {
                show,
                year,
                season,
                episode,
                title,
            } => Some(Self {
                show,
                year: *year,
                season: *season,
                episode: *episode,
                title: title.as_deref(),
            }),
            _ => None,
        }
    }
}

enum Pending {
    Done(ImportResult),
    Probing(JoinHandle<Result<Option<ProbeInfo>>>),
}

#[async_trait]
impl ImportProcessor for TvProcessor {
    fn name(&self) -> &'static str {
        "tv"
    }

    fn can_process(&self, candidate: &ImportCandidate) -> bool {
        matches!(candidate.classification, Classification::Episode { .. })
    }

    async fn process(&self, ctx: &ImportContext, candidate: &ImportCandidate) -> ImportResult {
        let path = &candidate.path;
        match is_known(ctx, path) {
            Ok(true) => return ImportResult::skipped(path, "already imported"),
            Ok(false) => {}
            Err(e) => return ImportResult::failed(path, &e),
        }
        let probed = ctx.prober.probe(path).await;
        finish(ctx, candidate, probed)
    }

    async fn process_batch(
        &self,
        ctx: &ImportContext,
        candidates: &[ImportCandidate],
    ) -> Vec<ImportResult> {
        let semaphore = Arc::new(Semaphore::new(ctx.probe_concurrency.max(1)));
        let mut pending = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match is_known(ctx, &candidate.path) {
                Ok(true) => {
                    pending.push(Pending::Done(ImportResult::skipped(
                        &candidate.path,
                        "already imported",
                    )));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    pending.push(Pending::Done(ImportResult::failed(&candidate.path, &e)));
                    continue;
                }
            }

            let sem = Arc::clone(&semaphore);
            let prober = Arc::clone(&ctx.prober);
            let cancel = ctx.cancel.clone();
            let path = candidate.path.clone();
            pending.push(Pending::Probing(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Err(Error::Internal("probe limiter closed".into()));
                };
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                prober.probe(&path).await.map(Some)
            })));
        }

        let mut results = Vec::with_capacity(candidates.len());
        for (candidate, item) in candidates.iter().zip(pending) {
            let probed = match item {
                Pending::Done(result) => {
                    results.push(result);
                    continue;
                }
                Pending::Probing(handle) => match handle.await {
                    Ok(probed) => probed,
                    Err(e) => Err(Error::Internal(format!("probe task failed: {e}"))),
                },
            };
            if ctx.cancel.is_cancelled() {
                tracing::debug!("Season import cancelled");
                break;
            }
            match probed {
                Ok(Some(probe)) => results.push(finish(ctx, candidate, Ok(probe))),
                Ok(None) => break,
                Err(e) => results.push(finish(ctx, candidate, Err(e))),
            }
        }
        results
    }
}

fn is_known(ctx: &ImportContext, path: &Path) -> Result<bool> {
    let conn = get_conn(&ctx.db)?;
    Ok(media_refs::get_media_ref_by_path(&conn, path)?.is_some())
}

fn finish(
    ctx: &ImportContext,
    candidate: &ImportCandidate,
    probed: Result<ProbeInfo>,
) -> ImportResult {
    let path = &candidate.path;
    let Some(info) = EpisodeInfo::from_candidate(candidate) else {
        return ImportResult::skipped(path, "not an episode");
    };
    let outcome = probed.and_then(|probe| write_episode(ctx, path, &info, &probe));
    match outcome {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Episode import failed: {e}");
            ImportResult::failed(path, &e)
        }
    }
}

fn write_episode(
    ctx: &ImportContext,
    path: &Path,
    info: &EpisodeInfo<'_>,
    probe: &ProbeInfo,
) -> Result<ImportResult> {
    if probe.primary_video().is_none() {
        return Err(Error::Probe(format!("no video stream in {}", path.display())));
    }

    let conn = get_conn(&ctx.db)?;
    let (show, show_created) = media::find_or_create_show(&conn, info.show, info.year)?;
    if show_created {
        tracing::info!(show_id = %show.id, title = info.show, "Created show");
    }
    let season = media::find_or_create_season(&conn, &show, info.season)?;

    let (episode, created) = match media::find_episode(&conn, season.id, info.episode)? {
        Some(episode) => (episode, false),
        None => {
            let fallback = format!("Episode {}", info.episode);
            let episode = media::create_media(
                &conn,
                ContentKind::Episode,
                &NewMedia {
                    title: info.title.unwrap_or(&fallback),
                    runtime_secs: probe.duration_secs,
                    parent_id: Some(season.id),
                    root_id: Some(show.id),
                    season_number: Some(info.season),
                    episode_number: Some(info.episode),
                    ..Default::default()
                },
            )?;
            (episode, true)
        }
    };

    match media_refs::create_local_ref(&conn, episode.id, Some(show.id), path, probe) {
        Ok(media_ref) => Ok(ImportResult::Success {
            path: path.to_path_buf(),
            content_id: episode.id,
            media_ref_id: media_ref.id,
            created_content: created,
        }),
        Err(Error::Conflict(_)) => Ok(ImportResult::skipped(path, "already imported")),
        Err(e) => Err(e),
    }
}
