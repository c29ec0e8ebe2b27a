//! Media-domain value types: content kinds, asset locations, and the stream
//! encodings reported by the probe adapter.
//!
//! Enums serialize in lowercase and implement `Display`/`FromStr` with the
//! same spelling so they round-trip through TEXT columns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// ContentKind
// ---------------------------------------------------------------------------

/// Kind of catalog content entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Show,
    Season,
    Episode,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movie => write!(f, "movie"),
            Self::Show => write!(f, "show"),
            Self::Season => write!(f, "season"),
            Self::Episode => write!(f, "episode"),
        }
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(Self::Movie),
            "show" => Ok(Self::Show),
            "season" => Ok(Self::Season),
            "episode" => Ok(Self::Episode),
            other => Err(Error::Validation(format!("unknown content kind '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaLocation
// ---------------------------------------------------------------------------

/// Where the bytes of a media reference live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MediaLocation {
    /// A file on the server's filesystem.
    Local { path: PathBuf },
    /// A pending download identified by its info hash.
    Download { hash: String },
}

impl MediaLocation {
    /// The local path, if this is a local asset.
    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Local { path } => Some(path),
            Self::Download { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// StreamKind / StreamEncoding
// ---------------------------------------------------------------------------

/// Kind of elementary stream inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Subtitle => write!(f, "subtitle"),
        }
    }
}

impl FromStr for StreamKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "subtitle" => Ok(Self::Subtitle),
            other => Err(Error::Validation(format!("unknown stream kind '{other}'"))),
        }
    }
}

/// Technical description of one stream within a media reference.
///
/// Produced by the probe adapter. Never edited in place; a refresh replaces
/// the whole set for a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEncoding {
    /// Stream index inside the container.
    pub index: u32,
    pub kind: StreamKind,
    pub codec: String,
    /// Video only.
    pub width: Option<u32>,
    /// Video only.
    pub height: Option<u32>,
    /// Audio and subtitle streams.
    pub language: Option<String>,
    /// Audio only.
    pub channels: Option<u32>,
    pub default: bool,
    pub forced: bool,
}

impl StreamEncoding {
    pub fn video(index: u32, codec: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            index,
            kind: StreamKind::Video,
            codec: codec.into(),
            width: Some(width),
            height: Some(height),
            language: None,
            channels: None,
            default: false,
            forced: false,
        }
    }

    pub fn audio(index: u32, codec: impl Into<String>, language: Option<String>) -> Self {
        Self {
            index,
            kind: StreamKind::Audio,
            codec: codec.into(),
            width: None,
            height: None,
            language,
            channels: None,
            default: false,
            forced: false,
        }
    }

    pub fn subtitle(index: u32, codec: impl Into<String>, language: Option<String>) -> Self {
        Self {
            index,
            kind: StreamKind::Subtitle,
            codec: codec.into(),
            width: None,
            height: None,
            language,
            channels: None,
            default: false,
            forced: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ProbeInfo
// ---------------------------------------------------------------------------

/// Result of probing one media file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// Container format name as reported by the prober (e.g. "matroska,webm").
    pub container: Option<String>,
    /// Total duration in seconds.
    pub duration_secs: Option<f64>,
    pub streams: Vec<StreamEncoding>,
}

impl ProbeInfo {
    /// The first video stream, preferring one flagged as default.
    pub fn primary_video(&self) -> Option<&StreamEncoding> {
        let mut videos = self.streams.iter().filter(|s| s.kind == StreamKind::Video);
        let first = videos.clone().next();
        videos.find(|s| s.default).or(first)
    }

    /// Number of streams of the given kind.
    pub fn count(&self, kind: StreamKind) -> usize {
        self.streams.iter().filter(|s| s.kind == kind).count()
    }
}
