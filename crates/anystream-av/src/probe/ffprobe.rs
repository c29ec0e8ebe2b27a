//! ffprobe-backed [`Prober`].
//!
//! Runs `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON into [`ProbeInfo`].

use std::path::{Path, PathBuf};

use anystream_core::{Error, ProbeInfo, Result, StreamEncoding, StreamKind};
use async_trait::async_trait;
use serde::Deserialize;

use super::Prober;
use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Use the ffprobe discovered by the registry.
    pub fn from_registry(tools: &ToolRegistry) -> Result<Self> {
        Ok(Self::new(tools.require("ffprobe")?.path.clone()))
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd.execute().await?;
        parse_ffprobe_json(&output.stdout)
    }

    fn supports(&self, path: &Path) -> bool {
        path.extension().is_some()
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    duration: Option<String>,
    #[serde(default)]
    disposition: FfprobeDisposition,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u8,
    #[serde(default)]
    forced: u8,
    #[serde(default)]
    attached_pic: u8,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse ffprobe's JSON report.
///
/// Streams of unknown type (data, attachments) and cover-art "video"
/// streams are dropped. Duration comes from the format section, falling
/// back to the longest stream duration.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeInfo> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let Some(format) = output.format else {
        return Err(Error::Probe(
            "ffprobe reported no format; not a media file?".into(),
        ));
    };

    let stream_duration = output
        .streams
        .iter()
        .filter_map(|s| s.duration.as_deref().and_then(parse_secs))
        .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))));

    let duration_secs = format
        .duration
        .as_deref()
        .and_then(parse_secs)
        .or(stream_duration);

    let streams = output
        .streams
        .into_iter()
        .filter_map(map_stream)
        .collect();

    Ok(ProbeInfo {
        container: format.format_name,
        duration_secs,
        streams,
    })
}

fn map_stream(stream: FfprobeStream) -> Option<StreamEncoding> {
    let kind = match stream.codec_type.as_deref() {
        Some("video") if stream.disposition.attached_pic == 0 => StreamKind::Video,
        Some("audio") => StreamKind::Audio,
        Some("subtitle") => StreamKind::Subtitle,
        _ => return None,
    };

    let language = stream
        .tags
        .language
        .filter(|l| !l.is_empty() && l != "und");

    Some(StreamEncoding {
        index: stream.index,
        kind,
        codec: stream.codec_name.unwrap_or_else(|| "unknown".into()),
        width: if kind == StreamKind::Video { stream.width } else { None },
        height: if kind == StreamKind::Video { stream.height } else { None },
        language: if kind == StreamKind::Video { None } else { language },
        channels: if kind == StreamKind::Audio { stream.channels } else { None },
        default: stream.disposition.default == 1,
        forced: stream.disposition.forced == 1,
    })
}

fn parse_secs(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}
