//! User lookups.

use anystream_core::{Error, Result, UserId};
use chrono::Utc;
use rusqlite::Connection;

use crate::models::User;

const COLS: &str = "id, username, display_name, created_at";

/// Create a user.
pub fn create_user(conn: &Connection, username: &str, display_name: &str) -> Result<User> {
    let id = UserId::new();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, username, display_name, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![id.to_string(), username, display_name, &now],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(format!("username '{username}' already exists"))
        }
        other => Error::database(other.to_string()),
    })?;

    Ok(User {
        id,
        username: username.to_string(),
        display_name: display_name.to_string(),
        created_at: now,
    })
}

/// Get a user by id.
pub fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    let q = format!("SELECT {COLS} FROM users WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], User::from_row) {
        Ok(u) => Ok(Some(u)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Fetch every user whose id is in `ids`. Unknown ids are ignored.
pub fn get_users_by_ids(conn: &Connection, ids: &[UserId]) -> Result<Vec<User>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let q = format!(
        "SELECT {COLS} FROM users WHERE id IN ({}) ORDER BY username",
        super::placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(ids.iter().map(|id| id.to_string())),
            User::from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
