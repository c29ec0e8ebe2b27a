//! The stream service: playback states, sessions, playlists and segments.
//!
//! Sessions live in a [`DashMap`] keyed by token. A token is the id of the
//! caller's [`PlaybackState`], so it is valid for exactly one
//! (user, media reference) pair and dies with the state. Each session owns
//! an output directory under `<data_dir>/transcode/<token>` and at most one
//! encoder. Readers of the table (segment requests, the operator snapshot)
//! never block writers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anystream_av::{
    segment_file_name, TranscodeHandle, TranscodeOutcome, TranscodeRequest, Transcoder,
    COMPLETE_MARKER,
};
use anystream_core::config::StreamingConfig;
use anystream_core::events::{EventBus, EventCategory, EventPayload};
use anystream_core::{Error, MediaRefId, PlaybackStateId, Result, UserId};
use anystream_db::models::{Media, PlaybackState, User};
use anystream_db::pool::{get_conn, DbPool};
use anystream_db::queries::{media, media_refs, playback_states, users};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::playlist::render_vod_playlist;
use super::session::{PlaybackSession, SessionState, TranscodeSessionInfo};

/// How often a session's watcher checks for the lead segment.
const READY_POLL: Duration = Duration::from_millis(250);

/// Snapshot of every live session for operator views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSessionsResponse {
    pub playback_states: Vec<PlaybackState>,
    pub users: BTreeMap<String, User>,
    pub media: BTreeMap<String, Media>,
    pub transcode_sessions: BTreeMap<String, TranscodeSessionInfo>,
}

pub struct StreamService {
    db: DbPool,
    config: StreamingConfig,
    transcoder: Arc<dyn Transcoder>,
    event_bus: Arc<EventBus>,
    sessions: DashMap<PlaybackStateId, Arc<PlaybackSession>>,
    cancel: CancellationToken,
}

impl StreamService {
    pub fn new(
        db: DbPool,
        config: StreamingConfig,
        transcoder: Arc<dyn Transcoder>,
        event_bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            config,
            transcoder,
            event_bus,
            sessions: DashMap::new(),
            cancel,
        }
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The live session for `token`, if any.
    pub fn session(&self, token: PlaybackStateId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&token).map(|s| Arc::clone(s.value()))
    }

    // -----------------------------------------------------------------------
    // Playback state
    // -----------------------------------------------------------------------

    /// Look up the user's progress on a reference.
    ///
    /// With `create`, a missing state is inserted at position 0 with the
    /// reference's runtime. Returns `None` when there is no state and none
    /// can be created: the reference is unknown, has no streams, or has no
    /// known runtime.
    pub fn get_playback_state(
        &self,
        media_ref_id: MediaRefId,
        user_id: UserId,
        create: bool,
    ) -> Result<Option<PlaybackState>> {
        let conn = get_conn(&self.db)?;
        if let Some(state) = playback_states::find_state(&conn, media_ref_id, user_id)? {
            return Ok(Some(state));
        }
        if !create {
            return Ok(None);
        }

        let Some(media_ref) = media_refs::get_media_ref(&conn, media_ref_id)? else {
            tracing::debug!(media_ref_id = %media_ref_id, "No media reference for playback state");
            return Ok(None);
        };
        if media_ref.streams.is_empty() {
            tracing::debug!(media_ref_id = %media_ref_id, "Media reference has no streams");
            return Ok(None);
        }

        let runtime = match media_ref.duration_secs.filter(|d| *d > 0.0) {
            Some(d) => Some(d),
            None => media::get_media(&conn, media_ref.content_id)?
                .and_then(|m| m.runtime_secs)
                .filter(|d| *d > 0.0),
        };
        let Some(runtime) = runtime else {
            tracing::debug!(media_ref_id = %media_ref_id, "Media reference has no runtime");
            return Ok(None);
        };

        let (state, created) = playback_states::get_or_create_state(
            &conn,
            user_id,
            media_ref_id,
            media_ref.content_id,
            runtime,
        )?;
        if created {
            tracing::info!(
                state_id = %state.id,
                media_ref_id = %media_ref_id,
                user_id = %user_id,
                "Created playback state"
            );
        }
        Ok(Some(state))
    }

    /// Persist a new position, clamped to `[0, runtime]`.
    ///
    /// Store failures are logged and reported as `false`; the caller should
    /// treat that as "position not guaranteed to have advanced".
    pub fn update_state_position(&self, state_id: PlaybackStateId, position: f64) -> bool {
        let result = get_conn(&self.db).and_then(|conn| {
            let Some(state) = playback_states::get_state(&conn, state_id)? else {
                return Ok(false);
            };
            let position = if position.is_finite() {
                position.clamp(0.0, state.runtime_secs)
            } else {
                0.0
            };
            playback_states::update_position(&conn, state_id, position)
        });

        match result {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(state_id = %state_id, "Failed to update playback position: {e}");
                false
            }
        }
    }

    /// Delete a playback state. Its token stops authorizing new sessions.
    pub fn delete_playback_state(&self, state: &PlaybackState) -> Result<bool> {
        let conn = get_conn(&self.db)?;
        let deleted = playback_states::delete_state(&conn, state.id)?;
        if deleted {
            tracing::info!(state_id = %state.id, media_ref_id = %state.media_ref_id, "Deleted playback state");
            self.event_bus.broadcast(
                EventCategory::User,
                EventPayload::PlaybackStateDeleted {
                    state_id: state.id,
                    media_ref_id: state.media_ref_id,
                },
            );
        }
        Ok(deleted)
    }

    /// End a client's playback: apply the completion rule to
    /// `final_position` and stop the session.
    ///
    /// A completed state is deleted and the session output removed.
    /// Otherwise the state is kept for resume and the output left in place.
    /// Returns whether the state was deleted.
    pub async fn finish_playback(&self, state: &PlaybackState, final_position: f64) -> bool {
        let percent = state.completion_percent(final_position);
        let complete = percent >= self.config.completion_threshold_percent;
        tracing::debug!(
            state_id = %state.id,
            final_position,
            percent,
            complete,
            "Playback finished"
        );

        let mut deleted = false;
        if complete {
            deleted = match self.delete_playback_state(state) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(state_id = %state.id, "Failed to delete completed state: {e}");
                    false
                }
            };
        }
        self.stop_token(state.id, complete).await;
        deleted
    }

    // -----------------------------------------------------------------------
    // Playlist and segments
    // -----------------------------------------------------------------------

    /// Return the playlist for `media_ref_id`, starting a session for
    /// `token` if none is live.
    ///
    /// Fails with `Unauthorized` when the token is malformed, unknown, or
    /// belongs to another reference, `NotFound` when the reference or its
    /// file is missing, and `Tool` when the session's encoder failed.
    pub async fn get_playlist(&self, media_ref_id: MediaRefId, token: &str) -> Result<String> {
        let token: PlaybackStateId = token
            .parse()
            .map_err(|_| Error::Unauthorized("malformed streaming token".into()))?;

        let session = match self.session(token) {
            Some(session) if session.media_ref_id == media_ref_id => session,
            Some(_) => {
                return Err(Error::Unauthorized(
                    "streaming token belongs to another media reference".into(),
                ))
            }
            None => self.open_session(media_ref_id, token).await?,
        };

        if let Some(error) = session.error() {
            return Err(Error::tool(self.transcoder.name(), error));
        }

        session.touch();
        Ok(render_vod_playlist(
            session.runtime_secs,
            self.config.segment_duration(),
            &token.to_string(),
        ))
    }

    /// Resolve a segment file inside the token's session directory.
    ///
    /// Returns `None` for names that could escape the directory, unknown
    /// tokens, failed sessions, and segments that do not exist yet. Only the
    /// session's activity time is touched.
    pub async fn get_file_path_for_segment(
        &self,
        token: &str,
        segment_file: &str,
    ) -> Option<PathBuf> {
        if !is_plain_file_name(segment_file) {
            tracing::warn!(segment = segment_file, "Rejected segment name");
            return None;
        }
        let token: PlaybackStateId = token.parse().ok()?;
        let session = self.session(token)?;
        if session.error().is_some() {
            return None;
        }

        let path = session.output_dir.join(segment_file);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }
        session.touch();
        Some(path)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Stop the session for `token_or_state_id`.
    ///
    /// Any encoder is terminated and awaited before this returns. With
    /// `delete` the session's output directory is removed. Returns whether a
    /// live session was found.
    pub async fn stop_session(&self, token_or_state_id: &str, delete: bool) -> bool {
        match token_or_state_id.parse::<PlaybackStateId>() {
            Ok(token) => self.stop_token(token, delete).await,
            Err(_) => {
                tracing::debug!(token = token_or_state_id, "Ignoring stop for malformed token");
                false
            }
        }
    }

    async fn stop_token(&self, token: PlaybackStateId, delete: bool) -> bool {
        let removed = self.sessions.remove(&token).map(|(_, s)| s);
        let output_dir = match &removed {
            Some(session) => session.output_dir.clone(),
            None => self.output_dir(token),
        };

        if let Some(session) = &removed {
            session.request_stop(delete);
            if let Some(handle) = session.take_transcode() {
                let outcome = handle.stop().await;
                tracing::debug!(token = %token, ?outcome, "Encoder stopped");
            }
            self.advance(session, SessionState::Stopped);
        }

        let output_deleted = delete && remove_output(token, &output_dir).await;

        if removed.is_some() || output_deleted {
            tracing::info!(token = %token, output_deleted, "Session stopped");
            self.event_bus.broadcast(
                EventCategory::Admin,
                EventPayload::SessionStopped {
                    token,
                    output_deleted,
                    error: removed.as_ref().and_then(|s| s.error()),
                },
            );
        }
        removed.is_some()
    }

    /// Stop every session idle for longer than the configured timeout.
    /// Returns how many were stopped.
    pub async fn cleanup_idle_sessions(&self) -> usize {
        let timeout = self.config.session_idle_timeout();
        let idle: Vec<PlaybackStateId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() >= timeout)
            .map(|entry| *entry.key())
            .collect();

        let mut stopped = 0;
        for token in idle {
            tracing::info!(token = %token, "Stopping idle session");
            if self.stop_token(token, true).await {
                stopped += 1;
            }
        }
        stopped
    }

    /// Run [`cleanup_idle_sessions`](Self::cleanup_idle_sessions) every
    /// `interval` until shutdown.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = service.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let stopped = service.cleanup_idle_sessions().await;
                        if stopped > 0 {
                            tracing::debug!(stopped, "Idle session cleanup");
                        }
                    }
                }
            }
        })
    }

    /// Stop every session, deleting its output, and clear the table.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tokens: Vec<PlaybackStateId> = self.sessions.iter().map(|e| *e.key()).collect();
        for token in tokens {
            self.stop_token(token, true).await;
        }
        tracing::info!("Stream service shut down");
    }

    // -----------------------------------------------------------------------
    // Operator view
    // -----------------------------------------------------------------------

    /// Snapshot of every live session with the states, users and content it
    /// refers to.
    pub fn get_playback_sessions(&self) -> Result<PlaybackSessionsResponse> {
        let sessions: Vec<TranscodeSessionInfo> =
            self.sessions.iter().map(|e| e.value().info()).collect();
        if sessions.is_empty() {
            return Ok(PlaybackSessionsResponse::default());
        }

        let conn = get_conn(&self.db)?;
        let state_ids: Vec<PlaybackStateId> = sessions.iter().map(|s| s.token).collect();
        let mut states = playback_states::get_states_by_ids(&conn, &state_ids)?;
        states.sort_by_key(|s| s.id.to_string());

        let mut user_ids: Vec<UserId> = sessions.iter().map(|s| s.user_id).collect();
        user_ids.sort_by_key(|id| id.to_string());
        user_ids.dedup();
        let users = users::get_users_by_ids(&conn, &user_ids)?
            .into_iter()
            .map(|u| (u.id.to_string(), u))
            .collect();

        let mut media_ids: Vec<_> = states.iter().map(|s| s.media_id).collect();
        media_ids.sort_by_key(|id| id.to_string());
        media_ids.dedup();
        let media = media::get_media_by_ids(&conn, &media_ids)?
            .into_iter()
            .map(|m| (m.id.to_string(), m))
            .collect();

        let transcode_sessions = sessions
            .into_iter()
            .map(|s| (s.token.to_string(), s))
            .collect();

        Ok(PlaybackSessionsResponse {
            playback_states: states,
            users,
            media,
            transcode_sessions,
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn output_dir(&self, token: PlaybackStateId) -> PathBuf {
        self.config.transcode_dir().join(token.to_string())
    }

    fn advance(&self, session: &PlaybackSession, to: SessionState) {
        if session.advance(to) {
            publish_state(&self.event_bus, session);
        }
    }

    async fn open_session(
        &self,
        media_ref_id: MediaRefId,
        token: PlaybackStateId,
    ) -> Result<Arc<PlaybackSession>> {
        let (media_ref, state) = {
            let conn = get_conn(&self.db)?;
            let media_ref = media_refs::get_media_ref(&conn, media_ref_id)?
                .ok_or_else(|| Error::not_found("media_ref", media_ref_id))?;
            let state = playback_states::get_state(&conn, token)?
                .ok_or_else(|| Error::Unauthorized("unknown streaming token".into()))?;
            (media_ref, state)
        };
        if state.media_ref_id != media_ref_id {
            return Err(Error::Unauthorized(
                "streaming token belongs to another media reference".into(),
            ));
        }

        let input = media_ref
            .file_path()
            .cloned()
            .ok_or_else(|| Error::not_found("local file for media_ref", media_ref_id))?;
        if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
            return Err(Error::not_found("media file", input.display()));
        }

        let session = match self.sessions.entry(token) {
            Entry::Occupied(existing) => return Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let session = Arc::new(PlaybackSession::new(
                    token,
                    media_ref_id,
                    state.user_id,
                    self.output_dir(token),
                    state.runtime_secs,
                ));
                slot.insert(Arc::clone(&session));
                session
            }
        };

        tracing::info!(token = %token, media_ref_id = %media_ref_id, "Session started");
        self.event_bus.broadcast(
            EventCategory::Admin,
            EventPayload::SessionStarted {
                token,
                media_ref_id,
                user_id: state.user_id,
            },
        );

        self.launch(&session, input).await?;
        Ok(session)
    }

    async fn launch(&self, session: &Arc<PlaybackSession>, input: PathBuf) -> Result<()> {
        let marker = session.output_dir.join(COMPLETE_MARKER);
        if tokio::fs::try_exists(&marker).await.unwrap_or(false) {
            tracing::info!(token = %session.token, "Serving existing encode");
            self.advance(session, SessionState::Ready);
            return Ok(());
        }

        let request = TranscodeRequest::from_config(&input, &session.output_dir, &self.config);
        let handle = match self.transcoder.start(&request).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                let error = if e.is_external_tool() {
                    e
                } else {
                    Error::tool(self.transcoder.name(), e.to_string())
                };
                tracing::error!(token = %session.token, "Failed to start encoder: {error}");
                if session.stop_requested() == Some(true) {
                    remove_output(session.token, &session.output_dir).await;
                }
                session.fail(error.to_string());
                publish_state(&self.event_bus, session);
                return Err(error);
            }
        };

        session.attach_transcode(Arc::clone(&handle));
        self.advance(session, SessionState::Transcoding);

        // A stop that raced the launch found no handle to take, and its
        // delete may have run before the encoder created the directory.
        if let Some(delete) = session.stop_requested() {
            if let Some(handle) = session.take_transcode() {
                handle.stop().await;
            }
            if delete {
                remove_output(session.token, &session.output_dir).await;
            }
            tracing::debug!(token = %session.token, "Session stopped while starting");
            return Err(Error::Conflict(
                "streaming session was stopped while starting".into(),
            ));
        }

        tokio::spawn(supervise(
            Arc::clone(session),
            handle,
            Arc::clone(&self.event_bus),
        ));
        Ok(())
    }
}

/// Follow an encode: mark the session ready when the lead segment lands and
/// stopped when the encoder exits.
async fn supervise(
    session: Arc<PlaybackSession>,
    handle: Arc<TranscodeHandle>,
    event_bus: Arc<EventBus>,
) {
    let lead = session.output_dir.join(segment_file_name(0));
    let mut ticker = tokio::time::interval(READY_POLL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome = loop {
        tokio::select! {
            outcome = handle.wait() => break outcome,
            _ = ticker.tick() => {
                if session.state() < SessionState::Ready
                    && tokio::fs::try_exists(&lead).await.unwrap_or(false)
                    && session.advance(SessionState::Ready)
                {
                    publish_state(&event_bus, &session);
                }
            }
        }
    };

    match outcome {
        TranscodeOutcome::Completed => {
            if tokio::fs::try_exists(&lead).await.unwrap_or(false)
                && session.advance(SessionState::Ready)
            {
                publish_state(&event_bus, &session);
            }
            tracing::info!(token = %session.token, "Encode completed");
        }
        TranscodeOutcome::Failed(message) => {
            tracing::error!(token = %session.token, "Encode failed: {message}");
            let was_stopped = session.state() == SessionState::Stopped;
            session.fail(message);
            if !was_stopped {
                publish_state(&event_bus, &session);
            }
            return;
        }
        TranscodeOutcome::Cancelled => {
            tracing::debug!(token = %session.token, "Encode cancelled");
        }
    }
    if session.advance(SessionState::Stopped) {
        publish_state(&event_bus, &session);
    }
}

/// Remove a session's output directory. Returns whether anything was
/// removed.
async fn remove_output(token: PlaybackStateId, output_dir: &Path) -> bool {
    match tokio::fs::remove_dir_all(output_dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(token = %token, "Failed to delete {}: {e}", output_dir.display());
            false
        }
    }
}

fn publish_state(event_bus: &EventBus, session: &PlaybackSession) {
    event_bus.broadcast(
        EventCategory::Admin,
        EventPayload::SessionStateChanged {
            token: session.token,
            state: session.state().to_string(),
        },
    );
}

/// A bare file name that cannot leave its directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains("..")
        && !name.starts_with('.')
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("seg00001.ts"));
        assert!(!is_plain_file_name("../../etc/passwd"));
        assert!(!is_plain_file_name("..\\x"));
        assert!(!is_plain_file_name("sub/seg00001.ts"));
        assert!(!is_plain_file_name(".complete"));
        assert!(!is_plain_file_name(""));
    }
}
