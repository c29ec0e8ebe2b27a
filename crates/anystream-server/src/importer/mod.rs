//! Media importer: walk a root, classify files, and hand them to processors.
//!
//! [`MediaImporter::scan`] returns a lazy stream of [`ImportResult`]s, one
//! per candidate. Files already linked to a reference are skipped without
//! probing, so re-scanning an imported root creates nothing. Per-file
//! failures become `Failed` results and never end the scan. Cancellation
//! is checked between files and batches.

pub mod classifier;
pub mod movie;
pub mod processor;
pub mod tv;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anystream_av::Prober;
use anystream_core::config::ImportConfig;
use anystream_core::events::{EventBus, EventCategory, EventPayload};
use anystream_core::{Error, MediaId, MediaRefId, Result};
use anystream_db::models::MediaRef;
use anystream_db::pool::{get_conn, DbPool};
use anystream_db::queries::{media, media_refs};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use classifier::{classify, Classification};
pub use processor::{ImportCandidate, ImportContext, ImportProcessor, ProcessorRegistry};

/// Extensions left behind by download clients while a file is incomplete.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "tmp", "crdownload", "aria2"];

/// Outcome of one candidate file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImportResult {
    Success {
        path: PathBuf,
        content_id: MediaId,
        media_ref_id: MediaRefId,
        /// Whether the content entry was created by this import.
        created_content: bool,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
    Failed {
        path: PathBuf,
        error: String,
    },
}

impl ImportResult {
    pub fn skipped(path: &Path, reason: impl Into<String>) -> Self {
        Self::Skipped {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn failed(path: &Path, error: &Error) -> Self {
        Self::Failed {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Success { path, .. } | Self::Skipped { path, .. } | Self::Failed { path, .. } => {
                path
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Aggregate of a finished scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub root: PathBuf,
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
    pub results: Vec<ImportResult>,
}

impl ImportSummary {
    fn record(&mut self, result: ImportResult) {
        match &result {
            ImportResult::Success { .. } => self.imported += 1,
            ImportResult::Skipped { .. } => self.skipped += 1,
            ImportResult::Failed { .. } => self.failed += 1,
        }
        self.results.push(result);
    }
}

pub struct MediaImporter {
    db: DbPool,
    prober: Arc<dyn Prober>,
    config: ImportConfig,
    event_bus: Arc<EventBus>,
    registry: ProcessorRegistry,
    cancel: CancellationToken,
}

impl MediaImporter {
    pub fn new(
        db: DbPool,
        prober: Arc<dyn Prober>,
        config: ImportConfig,
        event_bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_registry(
            db,
            prober,
            config,
            event_bus,
            ProcessorRegistry::with_defaults(),
            cancel,
        )
    }

    pub fn with_registry(
        db: DbPool,
        prober: Arc<dyn Prober>,
        config: ImportConfig,
        event_bus: Arc<EventBus>,
        registry: ProcessorRegistry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            prober,
            config,
            event_bus,
            registry,
            cancel,
        }
    }

    fn context(&self) -> ImportContext {
        ImportContext {
            db: self.db.clone(),
            prober: Arc::clone(&self.prober),
            probe_concurrency: self.config.probe_concurrency.max(1),
            cancel: self.cancel.clone(),
        }
    }

    /// Scan `root` lazily. Nothing happens until the stream is polled.
    ///
    /// The root is canonicalized first; results carry paths under the
    /// canonical root. A root that cannot be resolved to a directory yields
    /// a single `Failed` result.
    pub fn scan(self: &Arc<Self>, root: impl Into<PathBuf>) -> BoxStream<'static, ImportResult> {
        let importer = Arc::clone(self);
        let requested = root.into();

        async_stream::stream! {
            // Every stored path descends from the canonical root, so two
            // spellings of one directory see the same known paths.
            let root = match tokio::fs::canonicalize(&requested).await {
                Ok(root) if tokio::fs::metadata(&root).await.map(|m| m.is_dir()).unwrap_or(false) => root,
                _ => {
                    let error = Error::not_found("import root", requested.display());
                    yield ImportResult::failed(&requested, &error);
                    return;
                }
            };

            tracing::info!(root = %root.display(), "Import started");
            importer.event_bus.broadcast(
                EventCategory::Admin,
                EventPayload::ImportStarted { root: root.display().to_string() },
            );

            let known = match importer.known_paths(&root) {
                Ok(known) => known,
                Err(e) => {
                    yield ImportResult::failed(&root, &e);
                    return;
                }
            };

            let walk_root = root.clone();
            let files = match tokio::task::spawn_blocking(move || walk(&walk_root)).await {
                Ok(files) => files,
                Err(e) => {
                    let error = Error::Internal(format!("directory walk failed: {e}"));
                    yield ImportResult::failed(&root, &error);
                    return;
                }
            };

            let ctx = importer.context();
            let mut counts = (0u64, 0u64, 0u64);
            let mut groups: BTreeMap<(usize, PathBuf), Vec<ImportCandidate>> = BTreeMap::new();
            let mut processors: Vec<Arc<dyn ImportProcessor>> = Vec::new();

            for path in files {
                let result = match importer.triage(&path, &root, &known) {
                    Triage::Ignore => continue,
                    Triage::Done(result) => result,
                    Triage::Candidate(candidate) => match importer.registry.select(&candidate) {
                        Some(processor) => {
                            let slot = match processors.iter().position(|p| p.name() == processor.name()) {
                                Some(i) => i,
                                None => {
                                    processors.push(processor);
                                    processors.len() - 1
                                }
                            };
                            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
                            groups.entry((slot, dir)).or_default().push(candidate);
                            continue;
                        }
                        None => ImportResult::skipped(&path, "no processor for file"),
                    },
                };
                tally(&mut counts, &result);
                yield result;
            }

            for ((slot, dir), candidates) in groups {
                if ctx.cancel.is_cancelled() {
                    tracing::info!(root = %root.display(), "Import cancelled");
                    break;
                }
                let processor = &processors[slot];
                tracing::debug!(
                    processor = processor.name(),
                    dir = %dir.display(),
                    files = candidates.len(),
                    "Processing batch"
                );
                for result in processor.process_batch(&ctx, &candidates).await {
                    tally(&mut counts, &result);
                    yield result;
                }
            }

            let (imported, skipped, failed) = counts;
            tracing::info!(root = %root.display(), imported, skipped, failed, "Import completed");
            importer.event_bus.broadcast(
                EventCategory::Admin,
                EventPayload::ImportCompleted {
                    root: root.display().to_string(),
                    imported,
                    skipped,
                    failed,
                },
            );
        }
        .boxed()
    }

    /// Run a scan to completion and collect its results.
    pub async fn import_all(self: &Arc<Self>, root: impl Into<PathBuf>) -> ImportSummary {
        let root = root.into();
        let mut summary = ImportSummary {
            root: root.clone(),
            ..Default::default()
        };
        let mut results = self.scan(root);
        while let Some(result) = results.next().await {
            summary.record(result);
        }
        summary
    }

    /// Re-probe a local reference and replace its encodings.
    ///
    /// Also refreshes the content runtime when the probe reports a duration.
    pub async fn refresh(&self, media_ref_id: MediaRefId) -> Result<MediaRef> {
        let media_ref = media_refs::get_media_ref(&*get_conn(&self.db)?, media_ref_id)?
            .ok_or_else(|| Error::not_found("media_ref", media_ref_id))?;
        let path = media_ref.file_path().cloned().ok_or_else(|| {
            Error::Validation(format!("media_ref {media_ref_id} is not a local file"))
        })?;

        let probe = self.prober.probe(&path).await?;

        let conn = get_conn(&self.db)?;
        if !media_refs::replace_encodings(&conn, media_ref_id, &probe)? {
            return Err(Error::not_found("media_ref", media_ref_id));
        }
        if let Some(duration) = probe.duration_secs.filter(|d| *d > 0.0) {
            media::update_runtime(&conn, media_ref.content_id, duration)?;
        }
        let refreshed = media_refs::get_media_ref(&conn, media_ref_id)?
            .ok_or_else(|| Error::not_found("media_ref", media_ref_id))?;

        tracing::info!(media_ref_id = %media_ref_id, streams = refreshed.streams.len(), "Refreshed media reference");
        self.event_bus.broadcast(
            EventCategory::Admin,
            EventPayload::MediaRefRefreshed { media_ref_id },
        );
        Ok(refreshed)
    }

    fn known_paths(&self, root: &Path) -> Result<HashSet<String>> {
        let conn = get_conn(&self.db)?;
        Ok(media_refs::list_paths_under(&conn, root)?.into_iter().collect())
    }

    fn triage(&self, path: &Path, root: &Path, known: &HashSet<String>) -> Triage {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Triage::Done(ImportResult::skipped(path, "file name is not valid UTF-8"));
        };
        if name.starts_with('.') {
            return Triage::Ignore;
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if PARTIAL_EXTENSIONS.contains(&ext.as_str()) {
            return Triage::Done(ImportResult::skipped(path, "partial download"));
        }
        if !self.config.extensions.is_empty() && !self.config.extensions.contains(&ext) {
            return Triage::Ignore;
        }

        if known.contains(path.to_string_lossy().as_ref()) {
            return Triage::Done(ImportResult::skipped(path, "already imported"));
        }

        match classify(path, root) {
            Classification::Unsupported { reason } => Triage::Done(ImportResult::skipped(path, reason)),
            classification => Triage::Candidate(ImportCandidate {
                path: path.to_path_buf(),
                classification,
            }),
        }
    }
}

enum Triage {
    /// Not a media file; not reported.
    Ignore,
    Done(ImportResult),
    Candidate(ImportCandidate),
}

fn tally(counts: &mut (u64, u64, u64), result: &ImportResult) {
    match result {
        ImportResult::Success { .. } => counts.0 += 1,
        ImportResult::Skipped { .. } => counts.1 += 1,
        ImportResult::Failed { .. } => counts.2 += 1,
    }
}

/// Every regular file under `root`, sorted, skipping hidden directories.
fn walk(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !e.file_type().is_dir()
                || !e.file_name().to_string_lossy().starts_with('.')
        })
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(error = %err, "Error walking directory");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_skips_hidden_dirs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".cache")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join(".cache/x.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("b/2.mkv"), b"").unwrap();
        std::fs::write(dir.path().join("a.mkv"), b"").unwrap();

        let files = walk(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("a.mkv"), dir.path().join("b/2.mkv")]
        );
    }

    #[test]
    fn summary_counts_by_status() {
        let mut summary = ImportSummary::default();
        summary.record(ImportResult::skipped(Path::new("/a"), "x"));
        summary.record(ImportResult::failed(
            Path::new("/b"),
            &Error::Probe("bad".into()),
        ));
        assert_eq!((summary.imported, summary.skipped, summary.failed), (0, 1, 1));
        assert_eq!(summary.results[1].path(), Path::new("/b"));
        assert!(summary.results[1].is_failed());
    }

    #[test]
    fn result_serializes_with_status_tag() {
        let json = serde_json::to_value(ImportResult::skipped(Path::new("/m/a.part"), "partial download"))
            .unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "partial download");
    }
}
