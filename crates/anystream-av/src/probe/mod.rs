//! Probe adapter: inspect a media file and report its streams.

pub mod ffprobe;

use std::path::Path;

use anystream_core::{ProbeInfo, Result};
use async_trait::async_trait;

pub use self::ffprobe::FfprobeProber;

/// A media file prober.
///
/// Implementations must be safe to share across tasks. Probing is a pure
/// query: it never touches the catalog.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this implementation.
    fn name(&self) -> &'static str;

    /// Probe the file at `path`.
    ///
    /// Fails with [`anystream_core::Error::Tool`] when the tool cannot run
    /// and [`anystream_core::Error::Probe`] when its output is unusable.
    async fn probe(&self, path: &Path) -> Result<ProbeInfo>;

    /// Whether this prober will attempt the given path. `true` does not
    /// guarantee [`Prober::probe`] succeeds.
    fn supports(&self, path: &Path) -> bool;
}
