//! In-memory playback session.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anystream_av::TranscodeHandle;
use anystream_core::{MediaRefId, PlaybackStateId, UserId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Lifecycle of a playback session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Requested,
    Transcoding,
    Ready,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => write!(f, "requested"),
            Self::Transcoding => write!(f, "transcoding"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Operator-facing snapshot of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeSessionInfo {
    pub token: PlaybackStateId,
    pub media_ref_id: MediaRefId,
    pub user_id: UserId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub error: Option<String>,
}

/// A live session keyed by its token (the owning playback state's id).
pub struct PlaybackSession {
    pub token: PlaybackStateId,
    pub media_ref_id: MediaRefId,
    pub user_id: UserId,
    pub output_dir: PathBuf,
    pub runtime_secs: f64,
    pub created_at: DateTime<Utc>,
    state: watch::Sender<SessionState>,
    last_access: Mutex<Instant>,
    error: Mutex<Option<String>>,
    transcode: Mutex<Option<Arc<TranscodeHandle>>>,
    /// Set once the session is stopped; holds the stop's `delete` flag.
    stop_request: Mutex<Option<bool>>,
}

impl PlaybackSession {
    pub fn new(
        token: PlaybackStateId,
        media_ref_id: MediaRefId,
        user_id: UserId,
        output_dir: PathBuf,
        runtime_secs: f64,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Requested);
        Self {
            token,
            media_ref_id,
            user_id,
            output_dir,
            runtime_secs,
            created_at: Utc::now(),
            state,
            last_access: Mutex::new(Instant::now()),
            error: Mutex::new(None),
            transcode: Mutex::new(None),
            stop_request: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Move to `to` if it lies ahead of the current state. Returns whether the
    /// state changed.
    pub fn advance(&self, to: SessionState) -> bool {
        self.state.send_if_modified(|current| {
            if to > *current {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    /// Record a terminal error and stop.
    pub fn fail(&self, message: impl Into<String>) {
        let mut error = self.error.lock();
        if error.is_none() {
            *error = Some(message.into());
        }
        drop(error);
        self.advance(SessionState::Stopped);
    }

    pub fn error(&self) -> Option<String> {
        self.error.lock().clone()
    }

    /// Record client activity.
    pub fn touch(&self) {
        *self.last_access.lock() = Instant::now();
    }

    /// Time since the last playlist or segment access.
    pub fn idle_for(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub(crate) fn attach_transcode(&self, handle: Arc<TranscodeHandle>) {
        *self.transcode.lock() = Some(handle);
    }

    pub(crate) fn take_transcode(&self) -> Option<Arc<TranscodeHandle>> {
        self.transcode.lock().take()
    }

    /// Record a stop. A `delete` request is never downgraded by a later
    /// one that keeps the output.
    pub(crate) fn request_stop(&self, delete: bool) {
        let mut request = self.stop_request.lock();
        *request = Some(request.unwrap_or(false) || delete);
    }

    /// The `delete` flag of a recorded stop, or `None` while running.
    pub(crate) fn stop_requested(&self) -> Option<bool> {
        *self.stop_request.lock()
    }

    pub fn info(&self) -> TranscodeSessionInfo {
        TranscodeSessionInfo {
            token: self.token,
            media_ref_id: self.media_ref_id,
            user_id: self.user_id,
            state: self.state(),
            created_at: self.created_at,
            error: self.error(),
        }
    }
}

impl fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("token", &self.token)
            .field("media_ref_id", &self.media_ref_id)
            .field("state", &self.state())
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> PlaybackSession {
        PlaybackSession::new(
            PlaybackStateId::new(),
            MediaRefId::new(),
            UserId::anonymous(),
            PathBuf::from("/tmp/out"),
            120.0,
        )
    }

    #[test]
    fn transitions_only_move_forward() {
        let s = session();
        assert_eq!(s.state(), SessionState::Requested);
        assert!(s.advance(SessionState::Transcoding));
        assert!(s.advance(SessionState::Ready));
        assert!(!s.advance(SessionState::Transcoding));
        assert_eq!(s.state(), SessionState::Ready);
        assert!(s.advance(SessionState::Stopped));
        assert!(!s.advance(SessionState::Ready));
        assert_eq!(s.state(), SessionState::Stopped);
    }

    #[test]
    fn fail_keeps_first_error() {
        let s = session();
        s.fail("encoder exited with status 1");
        s.fail("second");
        assert_eq!(s.state(), SessionState::Stopped);
        assert_eq!(s.error().as_deref(), Some("encoder exited with status 1"));
        assert_eq!(s.info().error.as_deref(), Some("encoder exited with status 1"));
    }

    #[test]
    fn stop_request_keeps_delete() {
        let s = session();
        assert_eq!(s.stop_requested(), None);
        s.request_stop(false);
        assert_eq!(s.stop_requested(), Some(false));
        s.request_stop(true);
        s.request_stop(false);
        assert_eq!(s.stop_requested(), Some(true));
    }

    #[tokio::test]
    async fn watchers_see_changes() {
        let s = session();
        let mut rx = s.watch();
        s.advance(SessionState::Ready);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SessionState::Ready);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(SessionState::Transcoding).unwrap(),
            "transcoding"
        );
        assert_eq!(SessionState::Ready.to_string(), "ready");
    }
}
