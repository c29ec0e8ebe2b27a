//! Transcode adapter: background HLS encodes.
//!
//! A [`Transcoder`] launches an encode and hands back a [`TranscodeHandle`].
//! The handle reports the outcome through a `watch` channel and can stop
//! the encode; [`TranscodeHandle::stop`] does not return until the encoder
//! process has been killed and reaped.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anystream_core::config::StreamingConfig;
use anystream_core::{Error, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// Marker file written into an output directory once an encode finished.
pub const COMPLETE_MARKER: &str = ".complete";

/// Playlist the encoder maintains for itself. Clients get a generated one.
pub const ENCODER_PLAYLIST: &str = "encoder.m3u8";

/// Long encodes are bounded at 24 hours.
const ENCODE_TIMEOUT: Duration = Duration::from_secs(86400);

/// File name of the `n`th MPEG-TS segment.
pub fn segment_file_name(n: u64) -> String {
    format!("seg{n:05}.ts")
}

/// What to encode and how.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    /// Directory the segments are written to. Created if missing.
    pub output_dir: PathBuf,
    pub segment_duration_secs: u32,
    pub video_crf: u32,
    pub video_preset: String,
    pub audio_bitrate: String,
    /// Output is scaled down to at most this height.
    pub max_height: u32,
}

impl TranscodeRequest {
    /// A request using the quality settings of the streaming config.
    pub fn from_config(input: &Path, output_dir: &Path, config: &StreamingConfig) -> Self {
        Self {
            input: input.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            segment_duration_secs: config.segment_duration(),
            video_crf: config.video_crf,
            video_preset: config.video_preset.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
            max_height: config.max_height,
        }
    }

    /// The video filter graph applied to the source.
    pub fn video_filter(&self) -> String {
        format!("scale=-2:'min({},ih)'", self.max_height)
    }
}

/// Terminal result of an encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    /// The encoder reached end of stream.
    Completed,
    /// The encoder could not start or exited with an error.
    Failed(String),
    /// The encode was stopped through its handle.
    Cancelled,
}

/// Handle to a running encode.
#[derive(Debug)]
pub struct TranscodeHandle {
    cancel: CancellationToken,
    outcome: watch::Receiver<Option<TranscodeOutcome>>,
}

impl TranscodeHandle {
    /// Run `job` on the runtime and track it behind a handle.
    ///
    /// `job` receives the token that [`TranscodeHandle::stop`] cancels and
    /// must resolve promptly once it fires.
    pub fn spawn<F, Fut>(job: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = TranscodeOutcome> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(None);
        let fut = job(cancel.clone());
        tokio::spawn(async move {
            let outcome = fut.await;
            let _ = tx.send(Some(outcome));
        });
        Self {
            cancel,
            outcome: rx,
        }
    }

    /// The outcome, if the encode has finished.
    pub fn status(&self) -> Option<TranscodeOutcome> {
        self.outcome.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    /// Wait for the encode to finish.
    pub async fn wait(&self) -> TranscodeOutcome {
        let mut rx = self.outcome.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| TranscodeOutcome::Failed("encoder task ended without an outcome".into()))
    }

    /// Cancel the encode and wait until it has stopped.
    pub async fn stop(&self) -> TranscodeOutcome {
        self.cancel.cancel();
        self.wait().await
    }
}

/// Something that can run HLS encodes.
#[async_trait]
pub trait Transcoder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start an encode. Errors here mean nothing was launched.
    async fn start(&self, request: &TranscodeRequest) -> Result<TranscodeHandle>;
}

/// ffmpeg-backed [`Transcoder`] producing H.264/AAC MPEG-TS segments.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        Self { ffmpeg_path }
    }

    pub fn from_registry(tools: &ToolRegistry) -> Result<Self> {
        Ok(Self::new(tools.require("ffmpeg")?.path.clone()))
    }

    /// Build the ffmpeg invocation for `request`.
    ///
    /// Keyframes are forced on the segment grid so every segment starts
    /// with one and matches the generated playlist. `temp_file` makes a
    /// segment appear under its final name only once fully written.
    pub fn build_command(&self, request: &TranscodeRequest) -> ToolCommand {
        let seg = request.segment_duration_secs.max(1).to_string();
        let seg_pattern = request.output_dir.join("seg%05d.ts");
        let playlist = request.output_dir.join(ENCODER_PLAYLIST);

        let mut cmd = ToolCommand::new(self.ffmpeg_path.clone());
        cmd.timeout(ENCODE_TIMEOUT);
        cmd.args(["-hide_banner", "-nostats", "-loglevel", "error", "-y", "-i"]);
        cmd.arg(request.input.to_string_lossy().as_ref());
        cmd.args(["-map", "0:v:0", "-map", "0:a:0?"]);
        cmd.args(["-c:v", "libx264", "-profile:v", "high", "-pix_fmt", "yuv420p"]);
        cmd.args(["-crf", &request.video_crf.to_string()]);
        cmd.args(["-preset", &request.video_preset]);
        cmd.args(["-vf", &request.video_filter()]);
        cmd.args(["-force_key_frames", &format!("expr:gte(t,n_forced*{seg})")]);
        cmd.args(["-c:a", "aac", "-b:a", &request.audio_bitrate, "-ac", "2"]);
        cmd.args(["-f", "hls", "-hls_time", &seg]);
        cmd.args(["-hls_playlist_type", "vod", "-hls_segment_type", "mpegts"]);
        cmd.args(["-hls_flags", "temp_file"]);
        cmd.args(["-hls_segment_filename", &seg_pattern.to_string_lossy()]);
        cmd.arg(playlist.to_string_lossy().as_ref());
        cmd
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn start(&self, request: &TranscodeRequest) -> Result<TranscodeHandle> {
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "failed to create transcode dir {}: {e}",
                    request.output_dir.display()
                ))
            })?;

        let cmd = self.build_command(request);
        let output_dir = request.output_dir.clone();

        tracing::info!(
            input = %request.input.display(),
            output_dir = %output_dir.display(),
            segment_secs = request.segment_duration_secs,
            crf = request.video_crf,
            preset = %request.video_preset,
            "Starting HLS encode"
        );

        Ok(TranscodeHandle::spawn(move |cancel| async move {
            match cmd.execute_with_cancel(&cancel).await {
                Ok(Some(_)) => {
                    if let Err(e) = tokio::fs::write(output_dir.join(COMPLETE_MARKER), b"").await {
                        tracing::warn!(output_dir = %output_dir.display(), error = %e, "Failed to write completion marker");
                    }
                    TranscodeOutcome::Completed
                }
                Ok(None) => TranscodeOutcome::Cancelled,
                Err(e) => {
                    tracing::error!(output_dir = %output_dir.display(), error = %e, "HLS encode failed");
                    TranscodeOutcome::Failed(e.to_string())
                }
            }
        }))
    }
}
