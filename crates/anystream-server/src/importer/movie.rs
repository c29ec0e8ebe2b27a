//! Movie import: probe, match or create the movie, link the file.

use std::path::Path;

use anystream_core::{ContentKind, Error, Result};
use anystream_db::models::Media;
use anystream_db::pool::get_conn;
use anystream_db::queries::media::{self, NewMedia};
use anystream_db::queries::media_refs;
use async_trait::async_trait;
use rusqlite::Connection;

use super::classifier::Classification;
use super::processor::{ImportCandidate, ImportContext, ImportProcessor};
use super::ImportResult;

pub struct MovieProcessor;

#[async_trait]
impl ImportProcessor for MovieProcessor {
    fn name(&self) -> &'static str {
        "movie"
    }

    fn can_process(&self, candidate: &ImportCandidate) -> bool {
        matches!(candidate.classification, Classification::Movie { .. })
    }

    async fn process(&self, ctx: &ImportContext, candidate: &ImportCandidate) -> ImportResult {
        let Classification::Movie { title, year } = &candidate.classification else {
            return ImportResult::skipped(&candidate.path, "not a movie");
        };
        match import_movie(ctx, &candidate.path, title, *year).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(path = %candidate.path.display(), "Movie import failed: {e}");
                ImportResult::failed(&candidate.path, &e)
            }
        }
    }
}

async fn import_movie(
    ctx: &ImportContext,
    path: &Path,
    title: &str,
    year: Option<i32>,
) -> Result<ImportResult> {
    if media_refs::get_media_ref_by_path(&*get_conn(&ctx.db)?, path)?.is_some() {
        return Ok(ImportResult::skipped(path, "already imported"));
    }

    let probe = ctx.prober.probe(path).await?;
    if probe.primary_video().is_none() {
        return Err(Error::Probe(format!("no video stream in {}", path.display())));
    }

    let conn = get_conn(&ctx.db)?;
    let (movie, created) = match match_movie(&conn, title, year)? {
        Some(movie) => (movie, false),
        None => {
            let movie = media::create_media(
                &conn,
                ContentKind::Movie,
                &NewMedia {
                    title,
                    year,
                    runtime_secs: probe.duration_secs,
                    ..Default::default()
                },
            )?;
            tracing::info!(movie_id = %movie.id, title, year, "Created movie");
            (movie, true)
        }
    };

    match media_refs::create_local_ref(&conn, movie.id, None, path, &probe) {
        Ok(media_ref) => Ok(ImportResult::Success {
            path: path.to_path_buf(),
            content_id: movie.id,
            media_ref_id: media_ref.id,
            created_content: created,
        }),
        Err(Error::Conflict(_)) => Ok(ImportResult::skipped(path, "already imported")),
        Err(e) => Err(e),
    }
}

/// Find the catalog movie a file belongs to.
///
/// An exact year match wins. Otherwise a single candidate within one year
/// (or with no year on either side) is accepted, and several are a
/// [`Error::Conflict`].
pub(crate) fn match_movie(conn: &Connection, title: &str, year: Option<i32>) -> Result<Option<Media>> {
    let candidates = media::find_movies_by_key(conn, &media::match_key(title))?;
    if candidates.is_empty() {
        return Ok(None);
    }

    let near: Vec<Media> = match year {
        Some(year) => {
            if let Some(exact) = candidates.iter().find(|m| m.year == Some(year)) {
                return Ok(Some(exact.clone()));
            }
            candidates
                .into_iter()
                .filter(|m| m.year.map_or(true, |y| (y - year).abs() <= 1))
                .collect()
        }
        None => candidates,
    };

    match near.len() {
        0 => Ok(None),
        1 => Ok(near.into_iter().next()),
        n => Err(Error::Conflict(format!(
            "{n} catalog movies match '{title}'{}",
            year.map(|y| format!(" ({y})")).unwrap_or_default()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anystream_db::pool::init_memory_pool;

    fn movie(conn: &Connection, title: &str, year: Option<i32>) -> Media {
        media::create_media(
            conn,
            ContentKind::Movie,
            &NewMedia {
                title,
                year,
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn exact_year_wins_over_near() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        movie(&conn, "Dune", Some(2020));
        let exact = movie(&conn, "Dune", Some(2021));

        let found = match_movie(&conn, "dune", Some(2021)).unwrap().unwrap();
        assert_eq!(found.id, exact.id);
    }

    #[test]
    fn near_year_matches_single_candidate() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        let existing = movie(&conn, "The Thing", Some(1982));

        let found = match_movie(&conn, "Thing", Some(1983)).unwrap().unwrap();
        assert_eq!(found.id, existing.id);
        assert!(match_movie(&conn, "The Thing", Some(2011)).unwrap().is_none());
    }

    #[test]
    fn ambiguous_match_is_conflict() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        movie(&conn, "Solaris", Some(1972));
        movie(&conn, "Solaris", Some(2002));

        let err = match_movie(&conn, "Solaris", None).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(match_movie(&conn, "Solaris", Some(2002)).unwrap().is_some());
    }

    #[test]
    fn no_candidates_is_none() {
        let pool = init_memory_pool().unwrap();
        let conn = get_conn(&pool).unwrap();
        assert!(match_movie(&conn, "Brazil", Some(1985)).unwrap().is_none());
    }
}
