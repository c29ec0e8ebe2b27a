//! Catalog content: movies, shows, seasons, and episodes.

use anystream_core::{ContentKind, Error, MediaId, Result};
use chrono::Utc;
use rusqlite::Connection;

use crate::models::Media;

const COLS: &str = "id, kind, title, match_key, year, overview, runtime_secs,
    parent_id, root_id, season_number, episode_number, created_at, updated_at";

/// Fields for a new content entry.
#[derive(Debug, Clone, Default)]
pub struct NewMedia<'a> {
    pub title: &'a str,
    pub year: Option<i32>,
    pub overview: Option<&'a str>,
    pub runtime_secs: Option<f64>,
    pub parent_id: Option<MediaId>,
    pub root_id: Option<MediaId>,
    pub season_number: Option<i32>,
    pub episode_number: Option<i32>,
}

/// Normalize a title for fuzzy matching.
///
/// Lower-cases, folds punctuation and separators to single spaces, and drops
/// a leading English article, so "The.Matrix" and "matrix" share a key.
pub fn match_key(title: &str) -> String {
    let folded: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c == '\'' {
                '\0'
            } else {
                ' '
            }
        })
        .filter(|c| *c != '\0')
        .collect();

    let words: Vec<&str> = folded.split_whitespace().collect();
    let words = match words.as_slice() {
        [first, rest @ ..] if !rest.is_empty() && matches!(*first, "the" | "a" | "an") => rest,
        all => all,
    };
    words.join(" ")
}

/// Create a content entry of the given kind.
pub fn create_media(conn: &Connection, kind: ContentKind, new: &NewMedia<'_>) -> Result<Media> {
    let id = MediaId::new();
    let now = Utc::now().to_rfc3339();
    let key = match_key(new.title);

    conn.execute(
        "INSERT INTO media (id, kind, title, match_key, year, overview, runtime_secs,
            parent_id, root_id, season_number, episode_number, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        rusqlite::params![
            id.to_string(),
            kind.to_string(),
            new.title,
            &key,
            new.year,
            new.overview,
            new.runtime_secs,
            new.parent_id.map(|p| p.to_string()),
            new.root_id.map(|p| p.to_string()),
            new.season_number,
            new.episode_number,
            &now,
            &now,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Media {
        id,
        kind,
        title: new.title.to_string(),
        match_key: key,
        year: new.year,
        overview: new.overview.map(String::from),
        runtime_secs: new.runtime_secs,
        parent_id: new.parent_id,
        root_id: new.root_id,
        season_number: new.season_number,
        episode_number: new.episode_number,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Get a content entry by ID.
pub fn get_media(conn: &Connection, id: MediaId) -> Result<Option<Media>> {
    let q = format!("SELECT {COLS} FROM media WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], Media::from_row) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Fetch every content entry whose id is in `ids`.
pub fn get_media_by_ids(conn: &Connection, ids: &[MediaId]) -> Result<Vec<Media>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let q = format!(
        "SELECT {COLS} FROM media WHERE id IN ({})",
        super::placeholders(ids.len())
    );
    query_list(
        conn,
        &q,
        rusqlite::params_from_iter(ids.iter().map(|id| id.to_string())),
    )
}

/// Movies whose normalized title equals `key`, oldest first.
pub fn find_movies_by_key(conn: &Connection, key: &str) -> Result<Vec<Media>> {
    let q = format!(
        "SELECT {COLS} FROM media WHERE kind = 'movie' AND match_key = ?1
         ORDER BY created_at ASC"
    );
    query_list(conn, &q, [key])
}

/// Find a show by normalized title, creating it when absent.
///
/// Returns the show and whether it was created by this call.
pub fn find_or_create_show(
    conn: &Connection,
    title: &str,
    year: Option<i32>,
) -> Result<(Media, bool)> {
    let key = match_key(title);
    let q = format!(
        "SELECT {COLS} FROM media WHERE kind = 'show' AND match_key = ?1
         ORDER BY created_at ASC LIMIT 1"
    );
    match conn.query_row(&q, [&key], Media::from_row) {
        Ok(show) => Ok((show, false)),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            let show = create_media(
                conn,
                ContentKind::Show,
                &NewMedia {
                    title,
                    year,
                    ..Default::default()
                },
            )?;
            Ok((show, true))
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Find a show's season by number, creating it when absent.
pub fn find_or_create_season(conn: &Connection, show: &Media, season_number: i32) -> Result<Media> {
    let q = format!(
        "SELECT {COLS} FROM media WHERE kind = 'season' AND parent_id = ?1 AND season_number = ?2"
    );
    match conn.query_row(
        &q,
        rusqlite::params![show.id.to_string(), season_number],
        Media::from_row,
    ) {
        Ok(season) => Ok(season),
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            let title = format!("Season {season_number}");
            create_media(
                conn,
                ContentKind::Season,
                &NewMedia {
                    title: &title,
                    parent_id: Some(show.id),
                    root_id: Some(show.id),
                    season_number: Some(season_number),
                    ..Default::default()
                },
            )
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Find an episode within a season.
pub fn find_episode(
    conn: &Connection,
    season_id: MediaId,
    episode_number: i32,
) -> Result<Option<Media>> {
    let q = format!(
        "SELECT {COLS} FROM media WHERE kind = 'episode' AND parent_id = ?1 AND episode_number = ?2"
    );
    match conn.query_row(
        &q,
        rusqlite::params![season_id.to_string(), episode_number],
        Media::from_row,
    ) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Direct children of a content entry (seasons of a show, episodes of a season).
pub fn list_children(conn: &Connection, parent_id: MediaId) -> Result<Vec<Media>> {
    let q = format!(
        "SELECT {COLS} FROM media WHERE parent_id = ?1
         ORDER BY season_number ASC, episode_number ASC, title ASC"
    );
    query_list(conn, &q, [parent_id.to_string()])
}

/// Set the runtime of a content entry.
pub fn update_runtime(conn: &Connection, id: MediaId, runtime_secs: f64) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE media SET runtime_secs = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![runtime_secs, &now, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

pub fn count_media(conn: &Connection, kind: ContentKind) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM media WHERE kind = ?1",
        [kind.to_string()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

fn query_list<P: rusqlite::Params>(conn: &Connection, q: &str, params: P) -> Result<Vec<Media>> {
    let mut stmt = conn.prepare(q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params, Media::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{get_conn, init_memory_pool};

    #[test]
    fn match_key_normalizes() {
        assert_eq!(match_key("The.Matrix"), "matrix");
        assert_eq!(match_key("  Ocean's   Eleven "), "oceans eleven");
        assert_eq!(match_key("Blade_Runner-2049"), "blade runner 2049");
        // A lone article is kept.
        assert_eq!(match_key("The"), "the");
    }

    #[test]
    fn create_and_get_movie() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let movie = create_media(
            &conn,
            ContentKind::Movie,
            &NewMedia {
                title: "Heat",
                year: Some(1995),
                runtime_secs: Some(10_200.0),
                ..Default::default()
            },
        )
        .unwrap();

        let fetched = get_media(&conn, movie.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Heat");
        assert_eq!(fetched.kind, ContentKind::Movie);
        assert_eq!(fetched.year, Some(1995));
        assert!(get_media(&conn, MediaId::new()).unwrap().is_none());
    }

    #[test]
    fn movies_found_by_key() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        for year in [1995, 2019] {
            create_media(
                &conn,
                ContentKind::Movie,
                &NewMedia {
                    title: "Heat",
                    year: Some(year),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        assert_eq!(find_movies_by_key(&conn, "heat").unwrap().len(), 2);
        assert!(find_movies_by_key(&conn, "cold").unwrap().is_empty());
    }

    #[test]
    fn show_and_season_are_reused() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();

        let (show, created) = find_or_create_show(&conn, "The Wire", None).unwrap();
        assert!(created);
        let (again, created) = find_or_create_show(&conn, "the.wire", None).unwrap();
        assert!(!created);
        assert_eq!(show.id, again.id);

        let s1 = find_or_create_season(&conn, &show, 1).unwrap();
        let s1b = find_or_create_season(&conn, &show, 1).unwrap();
        assert_eq!(s1.id, s1b.id);
        assert_eq!(s1.root_id, Some(show.id));
        assert_eq!(list_children(&conn, show.id).unwrap().len(), 1);
    }

    #[test]
    fn episode_lookup() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let (show, _) = find_or_create_show(&conn, "Lost", None).unwrap();
        let season = find_or_create_season(&conn, &show, 2).unwrap();
        assert!(find_episode(&conn, season.id, 3).unwrap().is_none());

        create_media(
            &conn,
            ContentKind::Episode,
            &NewMedia {
                title: "Orientation",
                parent_id: Some(season.id),
                root_id: Some(show.id),
                season_number: Some(2),
                episode_number: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        let ep = find_episode(&conn, season.id, 3).unwrap().unwrap();
        assert_eq!(ep.title, "Orientation");
        assert_eq!(count_media(&conn, ContentKind::Episode).unwrap(), 1);
    }

    #[test]
    fn runtime_update() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let movie = create_media(
            &conn,
            ContentKind::Movie,
            &NewMedia {
                title: "Alien",
                ..Default::default()
            },
        )
        .unwrap();
        assert!(update_runtime(&conn, movie.id, 7000.0).unwrap());
        let fetched = get_media(&conn, movie.id).unwrap().unwrap();
        assert_eq!(fetched.runtime_secs, Some(7000.0));
        assert!(!update_runtime(&conn, MediaId::new(), 1.0).unwrap());
    }
}
