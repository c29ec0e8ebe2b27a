//! Embedded SQL migrations and runner.
//!
//! Migrations are `&str` constants executed in order. A `schema_migrations`
//! table tracks which versions have been applied.

use anystream_core::{Error, Result};
use rusqlite::Connection;

/// V1: catalog, references, encodings, users, playback states.
const V1_INITIAL: &str = r#"
CREATE TABLE users (
    id           TEXT PRIMARY KEY,
    username     TEXT UNIQUE NOT NULL,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

-- Catalog content: movies, shows, seasons, episodes
CREATE TABLE media (
    id             TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,
    title          TEXT NOT NULL,
    match_key      TEXT NOT NULL,
    year           INTEGER,
    overview       TEXT,
    runtime_secs   REAL,
    parent_id      TEXT REFERENCES media(id) ON DELETE CASCADE,
    root_id        TEXT REFERENCES media(id) ON DELETE CASCADE,
    season_number  INTEGER,
    episode_number INTEGER,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

CREATE TABLE media_references (
    id              TEXT PRIMARY KEY,
    content_id      TEXT NOT NULL REFERENCES media(id) ON DELETE CASCADE,
    root_content_id TEXT REFERENCES media(id) ON DELETE CASCADE,
    location_kind   TEXT NOT NULL,
    file_path       TEXT UNIQUE,
    download_hash   TEXT,
    container       TEXT,
    duration_secs   REAL,
    added_at        TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE stream_encodings (
    media_ref_id  TEXT NOT NULL REFERENCES media_references(id) ON DELETE CASCADE,
    stream_index  INTEGER NOT NULL,
    kind          TEXT NOT NULL,
    codec         TEXT NOT NULL,
    width         INTEGER,
    height        INTEGER,
    language      TEXT,
    channels      INTEGER,
    is_default    INTEGER NOT NULL DEFAULT 0,
    forced        INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (media_ref_id, stream_index)
);

CREATE TABLE playback_states (
    id            TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    media_ref_id  TEXT NOT NULL REFERENCES media_references(id) ON DELETE CASCADE,
    media_id      TEXT NOT NULL REFERENCES media(id) ON DELETE CASCADE,
    runtime_secs  REAL NOT NULL,
    position_secs REAL NOT NULL DEFAULT 0.0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (user_id, media_ref_id)
);

CREATE INDEX idx_media_kind_key    ON media(kind, match_key);
CREATE INDEX idx_media_parent      ON media(parent_id);
CREATE INDEX idx_refs_content      ON media_references(content_id);
CREATE INDEX idx_refs_root_content ON media_references(root_content_id);
CREATE INDEX idx_states_user       ON playback_states(user_id);
"#;

/// V2: seed the anonymous user that requests run as when auth is disabled.
const V2_ANONYMOUS_USER: &str = r#"
INSERT OR IGNORE INTO users (id, username, display_name, created_at)
VALUES ('00000000-0000-0000-0000-000000000000', 'anonymous', 'Anonymous', datetime('now'));
"#;

/// Ordered list of `(version, sql)` migrations.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL), (2, V2_ANONYMOUS_USER)];

/// Apply every migration that has not been applied yet.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
