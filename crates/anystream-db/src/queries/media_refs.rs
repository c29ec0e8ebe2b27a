//! Media references and their stream encodings.

use std::path::Path;

use anystream_core::{
    ContentKind, Error, MediaId, MediaRefId, ProbeInfo, Result, StreamEncoding,
};
use chrono::Utc;
use rusqlite::Connection;

use crate::models::{stream_encoding_from_row, Media, MediaRef};
use crate::queries::media::{get_media, list_children};

const COLS: &str = "id, content_id, root_content_id, location_kind, file_path, download_hash,
    container, duration_secs, added_at, updated_at";

const ENCODING_COLS: &str =
    "stream_index, kind, codec, width, height, language, channels, is_default, forced";

/// Create a local-file reference together with its probed encodings.
///
/// Runs in a single transaction: either the reference and every encoding
/// are stored, or nothing is. A second reference for the same path fails
/// with [`Error::Conflict`].
pub fn create_local_ref(
    conn: &Connection,
    content_id: MediaId,
    root_content_id: Option<MediaId>,
    path: &Path,
    probe: &ProbeInfo,
) -> Result<MediaRef> {
    let id = MediaRefId::new();
    let now = Utc::now().to_rfc3339();
    let path_str = path.to_string_lossy().to_string();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    tx.execute(
        "INSERT INTO media_references (id, content_id, root_content_id, location_kind,
            file_path, download_hash, container, duration_secs, added_at, updated_at)
         VALUES (?1, ?2, ?3, 'local', ?4, NULL, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            id.to_string(),
            content_id.to_string(),
            root_content_id.map(|r| r.to_string()),
            &path_str,
            probe.container,
            probe.duration_secs,
            &now,
            &now,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("a media reference for '{path_str}' already exists"))
        }
        other => Error::database(other.to_string()),
    })?;

    insert_encodings(&tx, id, &probe.streams)?;
    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(MediaRef {
        id,
        content_id,
        root_content_id,
        location: anystream_core::MediaLocation::Local {
            path: path.to_path_buf(),
        },
        container: probe.container.clone(),
        duration_secs: probe.duration_secs,
        added_at: now.clone(),
        updated_at: now,
        streams: probe.streams.clone(),
    })
}

/// Create a reference to a pending download. It has no encodings until the
/// download lands and is imported as a local file.
pub fn create_download_ref(
    conn: &Connection,
    content_id: MediaId,
    root_content_id: Option<MediaId>,
    hash: &str,
) -> Result<MediaRef> {
    let id = MediaRefId::new();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO media_references (id, content_id, root_content_id, location_kind,
            file_path, download_hash, container, duration_secs, added_at, updated_at)
         VALUES (?1, ?2, ?3, 'download', NULL, ?4, NULL, NULL, ?5, ?6)",
        rusqlite::params![
            id.to_string(),
            content_id.to_string(),
            root_content_id.map(|r| r.to_string()),
            hash,
            &now,
            &now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(MediaRef {
        id,
        content_id,
        root_content_id,
        location: anystream_core::MediaLocation::Download {
            hash: hash.to_string(),
        },
        container: None,
        duration_secs: None,
        added_at: now.clone(),
        updated_at: now,
        streams: Vec::new(),
    })
}

/// Get a reference by ID, with its encodings attached.
pub fn get_media_ref(conn: &Connection, id: MediaRefId) -> Result<Option<MediaRef>> {
    let q = format!("SELECT {COLS} FROM media_references WHERE id = ?1");
    let found = match conn.query_row(&q, [id.to_string()], MediaRef::from_row) {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(Error::database(e.to_string())),
    };
    with_streams(conn, found).map(Some)
}

/// Get the reference for a local file path.
pub fn get_media_ref_by_path(conn: &Connection, path: &Path) -> Result<Option<MediaRef>> {
    let q = format!("SELECT {COLS} FROM media_references WHERE file_path = ?1");
    let found = match conn.query_row(&q, [path.to_string_lossy()], MediaRef::from_row) {
        Ok(r) => r,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(Error::database(e.to_string())),
    };
    with_streams(conn, found).map(Some)
}

/// Every local file path recorded under `root`.
pub fn list_paths_under(conn: &Connection, root: &Path) -> Result<Vec<String>> {
    let prefix = root.to_string_lossy().to_string();
    let mut stmt = conn
        .prepare(
            "SELECT file_path FROM media_references
             WHERE file_path IS NOT NULL AND substr(file_path, 1, ?2) = ?1",
        )
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params![&prefix, prefix.chars().count() as i64],
            |row| row.get::<_, String>(0),
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// References that point directly at a content entry.
pub fn list_refs_for_content(conn: &Connection, content_id: MediaId) -> Result<Vec<MediaRef>> {
    let q = format!(
        "SELECT {COLS} FROM media_references WHERE content_id = ?1 ORDER BY added_at ASC"
    );
    list_with_streams(conn, &q, [content_id.to_string()])
}

/// References whose root content is `root_id` (every episode file of a show).
pub fn list_refs_for_root(conn: &Connection, root_id: MediaId) -> Result<Vec<MediaRef>> {
    let q = format!(
        "SELECT {COLS} FROM media_references WHERE root_content_id = ?1 ORDER BY added_at ASC"
    );
    list_with_streams(conn, &q, [root_id.to_string()])
}

/// A content entry together with its references.
///
/// Movies and episodes list the references that point at them directly.
/// Shows and seasons list every reference rooted under the show.
pub fn find_content_with_refs(
    conn: &Connection,
    content_id: MediaId,
) -> Result<Option<(Media, Vec<MediaRef>)>> {
    let Some(content) = get_media(conn, content_id)? else {
        return Ok(None);
    };
    let refs = match content.kind {
        ContentKind::Movie | ContentKind::Episode => list_refs_for_content(conn, content.id)?,
        ContentKind::Show => list_refs_for_root(conn, content.id)?,
        ContentKind::Season => {
            let episodes = list_children(conn, content.id)?;
            let mut refs = Vec::new();
            for episode in &episodes {
                refs.extend(list_refs_for_content(conn, episode.id)?);
            }
            refs
        }
    };
    Ok(Some((content, refs)))
}

/// Replace a reference's encodings and container facts with a fresh probe.
///
/// The old encoding set is removed wholesale. Returns `false` if the
/// reference does not exist.
pub fn replace_encodings(conn: &Connection, id: MediaRefId, probe: &ProbeInfo) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| Error::database(e.to_string()))?;

    let n = tx
        .execute(
            "UPDATE media_references SET container = ?1, duration_secs = ?2, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![probe.container, probe.duration_secs, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    if n == 0 {
        return Ok(false);
    }

    tx.execute(
        "DELETE FROM stream_encodings WHERE media_ref_id = ?1",
        [id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    insert_encodings(&tx, id, &probe.streams)?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(true)
}

/// Delete a reference. Encodings and playback states cascade.
pub fn delete_media_ref(conn: &Connection, id: MediaRefId) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM media_references WHERE id = ?1",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

pub fn count_media_refs(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM media_references", [], |row| row.get(0))
        .map_err(|e| Error::database(e.to_string()))
}

/// The encodings of one reference, ordered by stream index.
pub fn list_encodings(conn: &Connection, id: MediaRefId) -> Result<Vec<StreamEncoding>> {
    let q = format!(
        "SELECT {ENCODING_COLS} FROM stream_encodings WHERE media_ref_id = ?1
         ORDER BY stream_index ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([id.to_string()], stream_encoding_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

fn insert_encodings(conn: &Connection, id: MediaRefId, streams: &[StreamEncoding]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO stream_encodings (media_ref_id, stream_index, kind, codec, width,
                height, language, channels, is_default, forced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    for s in streams {
        stmt.execute(rusqlite::params![
            id.to_string(),
            s.index,
            s.kind.to_string(),
            s.codec,
            s.width,
            s.height,
            s.language,
            s.channels,
            s.default as i64,
            s.forced as i64,
        ])
        .map_err(|e| Error::database(e.to_string()))?;
    }
    Ok(())
}

fn with_streams(conn: &Connection, mut media_ref: MediaRef) -> Result<MediaRef> {
    media_ref.streams = list_encodings(conn, media_ref.id)?;
    Ok(media_ref)
}

fn list_with_streams<P: rusqlite::Params>(
    conn: &Connection,
    q: &str,
    params: P,
) -> Result<Vec<MediaRef>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let refs = stmt
        .query_map(params, MediaRef::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    refs.into_iter().map(|r| with_streams(conn, r)).collect()
}
