//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row` selected with the matching `COLS` list of its query
//! module.

use std::path::PathBuf;

use anystream_core::{
    ContentKind, MediaId, MediaLocation, MediaRefId, PlaybackStateId, StreamEncoding, StreamKind,
    UserId,
};
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse a UUID-based ID from a text column.
pub(crate) fn parse_id<T: From<Uuid>>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    let uuid = Uuid::parse_str(&s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))?;
    Ok(T::from(uuid))
}

pub(crate) fn parse_opt_id<T: From<Uuid>>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        Uuid::parse_str(&v)
            .map(T::from)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn parse_enum<T: std::str::FromStr<Err = anystream_core::Error>>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    s.parse()
        .map_err(|e: anystream_core::Error| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        })
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: String,
    pub created_at: String,
}

impl User {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Media (catalog content)
// ---------------------------------------------------------------------------

/// A catalog content entry: movie, show, season, or episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: MediaId,
    pub kind: ContentKind,
    pub title: String,
    #[serde(skip_serializing)]
    pub match_key: String,
    pub year: Option<i32>,
    pub overview: Option<String>,
    pub runtime_secs: Option<f64>,
    pub parent_id: Option<MediaId>,
    pub root_id: Option<MediaId>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
    pub created_at: String,
    pub updated_at: String,
}

impl Media {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            kind: parse_enum(row, 1)?,
            title: row.get(2)?,
            match_key: row.get(3)?,
            year: row.get(4)?,
            overview: row.get(5)?,
            runtime_secs: row.get(6)?,
            parent_id: parse_opt_id(row, 7)?,
            root_id: parse_opt_id(row, 8)?,
            season_number: row.get(9)?,
            episode_number: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

// ---------------------------------------------------------------------------
// MediaRef
// ---------------------------------------------------------------------------

/// A playable asset for one content entry, with its probed streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: MediaRefId,
    pub content_id: MediaId,
    pub root_content_id: Option<MediaId>,
    pub location: MediaLocation,
    pub container: Option<String>,
    pub duration_secs: Option<f64>,
    pub added_at: String,
    pub updated_at: String,
    /// Filled by the query layer from `stream_encodings`.
    pub streams: Vec<StreamEncoding>,
}

impl MediaRef {
    /// Build from a row; `streams` is left empty for the caller to attach.
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let location_kind: String = row.get(3)?;
        let location = match location_kind.as_str() {
            "local" => {
                let path: Option<String> = row.get(4)?;
                MediaLocation::Local {
                    path: PathBuf::from(path.unwrap_or_default()),
                }
            }
            _ => {
                let hash: Option<String> = row.get(5)?;
                MediaLocation::Download {
                    hash: hash.unwrap_or_default(),
                }
            }
        };

        Ok(Self {
            id: parse_id(row, 0)?,
            content_id: parse_id(row, 1)?,
            root_content_id: parse_opt_id(row, 2)?,
            location,
            container: row.get(6)?,
            duration_secs: row.get(7)?,
            added_at: row.get(8)?,
            updated_at: row.get(9)?,
            streams: Vec::new(),
        })
    }

    /// The local file path, if this reference is a local file.
    pub fn file_path(&self) -> Option<&PathBuf> {
        self.location.local_path()
    }
}

/// Build a [`StreamEncoding`] from a `stream_encodings` row.
pub(crate) fn stream_encoding_from_row(row: &rusqlite::Row) -> rusqlite::Result<StreamEncoding> {
    let kind: StreamKind = parse_enum(row, 1)?;
    Ok(StreamEncoding {
        index: row.get(0)?,
        kind,
        codec: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        language: row.get(5)?,
        channels: row.get(6)?,
        default: row.get::<_, i64>(7)? != 0,
        forced: row.get::<_, i64>(8)? != 0,
    })
}

// ---------------------------------------------------------------------------
// PlaybackState
// ---------------------------------------------------------------------------

/// A user's resume point for one media reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub id: PlaybackStateId,
    pub user_id: UserId,
    pub media_ref_id: MediaRefId,
    pub media_id: MediaId,
    pub runtime_secs: f64,
    pub position_secs: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl PlaybackState {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: parse_id(row, 0)?,
            user_id: parse_id(row, 1)?,
            media_ref_id: parse_id(row, 2)?,
            media_id: parse_id(row, 3)?,
            runtime_secs: row.get(4)?,
            position_secs: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    /// Progress through the content as a rounded percentage.
    pub fn completion_percent(&self, position_secs: f64) -> u32 {
        completion_percent(position_secs, self.runtime_secs)
    }
}

/// `round(position / runtime * 100)`, clamped to `0..=100`. A zero runtime
/// counts as not started.
pub fn completion_percent(position_secs: f64, runtime_secs: f64) -> u32 {
    if runtime_secs <= 0.0 || !position_secs.is_finite() {
        return 0;
    }
    ((position_secs / runtime_secs) * 100.0).round().clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_rounds() {
        // 3250 / 3600 = 90.27%
        assert_eq!(completion_percent(3250.0, 3600.0), 90);
        assert_eq!(completion_percent(3240.0, 3600.0), 90);
        assert_eq!(completion_percent(3238.0, 3600.0), 90);
        assert_eq!(completion_percent(3200.0, 3600.0), 89);
        assert_eq!(completion_percent(0.0, 3600.0), 0);
        assert_eq!(completion_percent(5000.0, 3600.0), 100);
    }

    #[test]
    fn completion_with_zero_runtime() {
        assert_eq!(completion_percent(10.0, 0.0), 0);
        assert_eq!(completion_percent(f64::NAN, 100.0), 0);
    }
}
