//! # anystream-av
//!
//! External media tooling for AnyStream.
//!
//! - **Tool discovery** ([`ToolRegistry`]) finds ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) runs a process with a timeout
//!   and optional cancellation that kills the child before returning.
//! - **Probe adapter** ([`Prober`], [`FfprobeProber`]) turns a file into a
//!   [`anystream_core::ProbeInfo`].
//! - **Transcode adapter** ([`Transcoder`], [`FfmpegTranscoder`]) runs an
//!   HLS encode in the background behind a [`TranscodeHandle`].
//! - **Previews** ([`generate_previews`]) writes seek thumbnails.

pub mod command;
pub mod preview;
pub mod probe;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use preview::generate_previews;
pub use probe::{FfprobeProber, Prober};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use transcode::{
    segment_file_name, FfmpegTranscoder, TranscodeHandle, TranscodeOutcome, TranscodeRequest,
    Transcoder, COMPLETE_MARKER,
};
