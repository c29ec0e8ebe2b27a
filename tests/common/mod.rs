//! Shared test harness for integration tests.
//!
//! [`TestHarness`] builds an in-memory DB, a scratch data directory, and a
//! full [`AppContext`] wired to a [`FakeProber`] and a [`FakeTranscoder`]
//! so no external tools are needed. [`TestHarness::with_server`] starts
//! Axum on a random port for HTTP and WebSocket tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anystream_av::{
    segment_file_name, Prober, ToolRegistry, TranscodeHandle, TranscodeOutcome, TranscodeRequest,
    Transcoder, COMPLETE_MARKER,
};
use anystream_core::config::Config;
use anystream_core::{
    ContentKind, Error, MediaRefId, ProbeInfo, Result, StreamEncoding, UserId,
};
use anystream_db::models::{MediaRef, PlaybackState};
use anystream_db::pool::{init_memory_pool, DbPool};
use anystream_db::queries::{media, media_refs};
use anystream_server::context::AppContext;
use anystream_server::router::build_router;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Runtime given to every probed file.
pub const RUNTIME_SECS: f64 = 3600.0;

// ---------------------------------------------------------------------------
// FakeProber
// ---------------------------------------------------------------------------

/// Reports one video and one audio stream for every file, except files
/// whose name is in `failing`.
#[derive(Default)]
pub struct FakeProber {
    failing: Vec<String>,
    calls: AtomicUsize,
}

impl FakeProber {
    pub fn failing_on(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn probe_info() -> ProbeInfo {
    ProbeInfo {
        container: Some("matroska,webm".into()),
        duration_secs: Some(RUNTIME_SECS),
        streams: vec![
            StreamEncoding::video(0, "h264", 1920, 1080),
            StreamEncoding::audio(1, "aac", Some("eng".into())),
        ],
    }
}

#[async_trait]
impl Prober for FakeProber {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if self.failing.contains(&name) {
            return Err(Error::Probe(format!("{name}: invalid data found")));
        }
        Ok(probe_info())
    }

    fn supports(&self, _path: &Path) -> bool {
        true
    }
}

// ---------------------------------------------------------------------------
// FakeTranscoder
// ---------------------------------------------------------------------------

/// Writes `segments` small segment files, then the completion marker.
/// With `fail_start` every launch fails. `start_delay` holds `start` back
/// before the output directory is created.
pub struct FakeTranscoder {
    pub segments: u64,
    pub segment_delay: Duration,
    pub start_delay: Duration,
    pub fail_start: bool,
    pub starts: AtomicUsize,
}

impl Default for FakeTranscoder {
    fn default() -> Self {
        Self {
            segments: 3,
            segment_delay: Duration::from_millis(20),
            start_delay: Duration::ZERO,
            fail_start: false,
            starts: AtomicUsize::new(0),
        }
    }
}

impl FakeTranscoder {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

/// Bytes the fake encoder writes for segment `n`.
pub fn segment_bytes(n: u64) -> Vec<u8> {
    format!("segment-{n}").into_bytes()
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    fn name(&self) -> &'static str {
        "fake-encoder"
    }

    async fn start(&self, request: &TranscodeRequest) -> Result<TranscodeHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(Error::tool("fake-encoder", "could not open input"));
        }
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| Error::Io { source: e })?;

        let output_dir = request.output_dir.clone();
        let segments = self.segments;
        let delay = self.segment_delay;
        Ok(TranscodeHandle::spawn(move |cancel: CancellationToken| async move {
            for n in 0..segments {
                let path = output_dir.join(segment_file_name(n));
                if let Err(e) = tokio::fs::write(&path, segment_bytes(n)).await {
                    return TranscodeOutcome::Failed(e.to_string());
                }
                tokio::select! {
                    _ = cancel.cancelled() => return TranscodeOutcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            match tokio::fs::write(output_dir.join(COMPLETE_MARKER), b"").await {
                Ok(()) => TranscodeOutcome::Completed,
                Err(e) => TranscodeOutcome::Failed(e.to_string()),
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// TestHarness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub ctx: AppContext,
    pub db: DbPool,
    pub prober: Arc<FakeProber>,
    pub transcoder: Arc<FakeTranscoder>,
    /// Holds transcode output and previews.
    pub data_dir: TempDir,
    /// Holds source media files.
    pub media_dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(Config::default(), FakeProber::default(), FakeTranscoder::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self::build(config, FakeProber::default(), FakeTranscoder::default())
    }

    pub fn build(mut config: Config, prober: FakeProber, transcoder: FakeTranscoder) -> Self {
        let db = init_memory_pool().expect("failed to create in-memory pool");
        let data_dir = tempfile::tempdir().expect("failed to create data dir");
        let media_dir = tempfile::tempdir().expect("failed to create media dir");
        config.streaming.data_dir = data_dir.path().to_path_buf();
        config.streaming.sessions_poll_interval_secs = 1;

        let prober = Arc::new(prober);
        let transcoder = Arc::new(transcoder);
        let ctx = AppContext::new(
            db.clone(),
            config,
            Arc::new(ToolRegistry::with_tools(std::iter::empty())),
            Arc::clone(&prober) as Arc<dyn Prober>,
            Arc::clone(&transcoder) as Arc<dyn Transcoder>,
            CancellationToken::new(),
        );

        Self {
            ctx,
            db,
            prober,
            transcoder,
            data_dir,
            media_dir,
        }
    }

    /// Start Axum on a random port for this harness.
    pub async fn serve(self) -> (Self, SocketAddr) {
        let app = build_router(self.ctx.clone(), None);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let cancel = self.ctx.cancel.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .ok();
        });

        (self, addr)
    }

    pub async fn with_server() -> (Self, SocketAddr) {
        Self::new().serve().await
    }

    pub fn conn(&self) -> anystream_db::pool::PooledConnection {
        anystream_db::pool::get_conn(&self.db).expect("failed to get db connection")
    }

    /// Write `file_name` into the media dir and catalog it as a movie with
    /// a probed local reference.
    pub fn add_movie(&self, title: &str, file_name: &str) -> MediaRef {
        let path = self.media_dir.path().join(file_name);
        std::fs::write(&path, b"not really a video").expect("failed to write media file");

        let conn = self.conn();
        let movie = media::create_media(
            &conn,
            ContentKind::Movie,
            &media::NewMedia {
                title,
                runtime_secs: Some(RUNTIME_SECS),
                ..Default::default()
            },
        )
        .expect("failed to create movie");
        media_refs::create_local_ref(&conn, movie.id, None, &path, &probe_info())
            .expect("failed to create media ref")
    }

    /// The anonymous user's state for a reference, created on demand.
    pub fn state_for(&self, media_ref_id: MediaRefId) -> PlaybackState {
        self.ctx
            .streams
            .get_playback_state(media_ref_id, UserId::anonymous(), true)
            .expect("failed to load playback state")
            .expect("reference should be playable")
    }

    /// Output directory of a session.
    pub fn session_dir(&self, token: &impl ToString) -> PathBuf {
        self.data_dir.path().join("transcode").join(token.to_string())
    }

    pub fn playlist_url(addr: SocketAddr, media_ref_id: MediaRefId, token: &impl ToString) -> String {
        format!(
            "http://{addr}/stream/{media_ref_id}/hls/playlist.m3u8?token={}",
            token.to_string()
        )
    }

    pub fn segment_url(
        addr: SocketAddr,
        media_ref_id: MediaRefId,
        segment: &str,
        token: &impl ToString,
    ) -> String {
        format!(
            "http://{addr}/stream/{media_ref_id}/hls/{segment}?token={}",
            token.to_string()
        )
    }
}

/// Poll `check` every 20ms for up to 5 seconds.
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
