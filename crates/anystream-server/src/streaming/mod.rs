//! Playback sessions and HLS delivery.

pub mod playlist;
pub mod service;
pub mod session;

pub use playlist::render_vod_playlist;
pub use service::{PlaybackSessionsResponse, StreamService};
pub use session::{PlaybackSession, SessionState, TranscodeSessionInfo};
