//! Per-user playback state: the resume point for one media reference.
//!
//! At most one state exists per `(user_id, media_ref_id)`; creation is
//! idempotent under concurrent callers via `ON CONFLICT DO NOTHING`.

use anystream_core::{Error, MediaId, MediaRefId, PlaybackStateId, Result, UserId};
use chrono::Utc;
use rusqlite::Connection;

use crate::models::PlaybackState;

const COLS: &str = "id, user_id, media_ref_id, media_id, runtime_secs, position_secs,
    created_at, updated_at";

/// Get a state by ID.
pub fn get_state(conn: &Connection, id: PlaybackStateId) -> Result<Option<PlaybackState>> {
    let q = format!("SELECT {COLS} FROM playback_states WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], PlaybackState::from_row) {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Get the state a user holds for a reference.
pub fn find_state(
    conn: &Connection,
    media_ref_id: MediaRefId,
    user_id: UserId,
) -> Result<Option<PlaybackState>> {
    let q = format!("SELECT {COLS} FROM playback_states WHERE media_ref_id = ?1 AND user_id = ?2");
    match conn.query_row(
        &q,
        rusqlite::params![media_ref_id.to_string(), user_id.to_string()],
        PlaybackState::from_row,
    ) {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Return the user's state for a reference, inserting a fresh one at
/// position 0 when none exists.
///
/// Returns the state and whether this call created it. Concurrent callers
/// for the same pair all observe the same row.
pub fn get_or_create_state(
    conn: &Connection,
    user_id: UserId,
    media_ref_id: MediaRefId,
    media_id: MediaId,
    runtime_secs: f64,
) -> Result<(PlaybackState, bool)> {
    let id = PlaybackStateId::new();
    let now = Utc::now().to_rfc3339();
    let inserted = conn
        .execute(
            "INSERT INTO playback_states (id, user_id, media_ref_id, media_id, runtime_secs,
                position_secs, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0.0, ?6, ?7)
             ON CONFLICT(user_id, media_ref_id) DO NOTHING",
            rusqlite::params![
                id.to_string(),
                user_id.to_string(),
                media_ref_id.to_string(),
                media_id.to_string(),
                runtime_secs,
                &now,
                &now,
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let state = find_state(conn, media_ref_id, user_id)?.ok_or_else(|| {
        Error::Internal(format!(
            "playback state for media_ref {media_ref_id} vanished after insert"
        ))
    })?;
    Ok((state, inserted > 0))
}

/// Set the position of a state. Returns `false` if the state does not exist.
pub fn update_position(conn: &Connection, id: PlaybackStateId, position_secs: f64) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE playback_states SET position_secs = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![position_secs, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete a state. Returns `false` if it did not exist.
pub fn delete_state(conn: &Connection, id: PlaybackStateId) -> Result<bool> {
    let n = conn
        .execute("DELETE FROM playback_states WHERE id = ?1", [id.to_string()])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Fetch every state whose id is in `ids`. Unknown ids are ignored.
pub fn get_states_by_ids(conn: &Connection, ids: &[PlaybackStateId]) -> Result<Vec<PlaybackState>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let q = format!(
        "SELECT {COLS} FROM playback_states WHERE id IN ({}) ORDER BY created_at ASC",
        super::placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(ids.iter().map(|id| id.to_string())),
            PlaybackState::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
