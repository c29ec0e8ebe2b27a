//! Path heuristics that decide what a candidate file is.
//!
//! [`classify`] is pure: it looks only at the file name and its parent
//! directories, never at the filesystem or the catalog.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// What a candidate file looks like.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    Movie {
        title: String,
        year: Option<i32>,
    },
    Episode {
        show: String,
        year: Option<i32>,
        season: i32,
        episode: i32,
        title: Option<String>,
    },
    Unsupported {
        reason: String,
    },
}

impl Classification {
    fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }
}

/// `S01E02`, `s1.e2`, `S01-E002`.
static SXXEYY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bs(\d{1,2})[ ._-]?e(\d{1,3})")
        .expect("season/episode regex should compile")
});

/// `1x02`.
static NXNN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").expect("NxNN regex should compile")
});

/// `Season 1`, `Series 02`, `S03`.
static SEASON_DIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:season|series|s)[ ._-]*(\d{1,3})$").expect("season dir regex should compile")
});

/// Bare episode number as a file stem: `05`, `E05`, `Episode 5 - Title`.
static EPISODE_STEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:e|ep|episode)?[ ._-]*(\d{1,3})(?:\b(.*))?$")
        .expect("episode stem regex should compile")
});

/// `Title (1999)`, `Title [1999]`. Checked first so a number inside the
/// title (`Blade Runner 2049 (2017)`) is not taken as the year.
static TITLE_BRACKETED_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+?)[ ._-]*[(\[]((?:19|20)\d{2})[)\]]")
        .expect("bracketed title/year regex should compile")
});

/// `Title.1999.1080p`. The greedy title keeps all but the last year-like
/// token.
static TITLE_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.+)[ ._-]+((?:19|20)\d{2})(?:[ ._-]|$)")
        .expect("title/year regex should compile")
});

/// Release tags that end the human-readable part of a name.
static RELEASE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:480p|576p|720p|1080p|2160p|4k|uhd|web[ .-]?dl|webrip|bluray|blu-ray|brrip|bdrip|hdtv|dvdrip|remux|x264|x265|h\.?264|h\.?265|hevc|proper|repack)\b",
    )
    .expect("release tag regex should compile")
});

static SAMPLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsample\b").expect("sample regex should compile"));

/// Directory names that hold bonus material rather than features.
const EXTRAS_DIRS: &[&str] = &[
    "extras",
    "featurettes",
    "samples",
    "sample",
    "trailers",
    "behind the scenes",
    "deleted scenes",
];

/// Classify a candidate path found under the import `root`.
///
/// Bonus-material directories only count below `root`; names above it
/// belong to the library's location, not to its content.
pub fn classify(path: &Path, root: &Path) -> Classification {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return Classification::unsupported("file name is not valid UTF-8");
    };

    if SAMPLE.is_match(stem) {
        return Classification::unsupported("sample file");
    }

    let dirs: Vec<&str> = path
        .parent()
        .map(|p| {
            p.components()
                .rev()
                .filter_map(|c| c.as_os_str().to_str())
                .collect()
        })
        .unwrap_or_default();

    let below_root = path
        .parent()
        .map(|p| p.strip_prefix(root).unwrap_or(p))
        .unwrap_or(Path::new(""));
    if below_root
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .any(|d| EXTRAS_DIRS.contains(&d.to_lowercase().as_str()))
    {
        return Classification::unsupported("bonus material");
    }

    if let Some(episode) = classify_episode(stem, &dirs) {
        return episode;
    }

    classify_movie(stem, dirs.first().copied())
}

fn classify_episode(stem: &str, dirs: &[&str]) -> Option<Classification> {
    let numbered = SXXEYY
        .captures(stem)
        .or_else(|| NXNN.captures(stem))
        .and_then(|caps| {
            let whole = caps.get(0)?;
            let season = caps.get(1)?.as_str().parse().ok()?;
            let episode = caps.get(2)?.as_str().parse().ok()?;
            Some((
                &stem[..whole.start()],
                &stem[whole.end()..],
                season,
                episode,
            ))
        });

    if let Some((prefix, rest, season, episode)) = numbered {
        let show_source = if clean(prefix).is_empty() {
            show_dir(dirs)?
        } else {
            prefix
        };
        let (show, year) = split_title_year(show_source);
        if show.is_empty() {
            return None;
        }
        return Some(Classification::Episode {
            show,
            year,
            season,
            episode,
            title: episode_title(rest),
        });
    }

    // `Show/Season 2/05 - Title.mkv`
    let season_dir = dirs.first()?;
    let season: i32 = SEASON_DIR.captures(season_dir)?.get(1)?.as_str().parse().ok()?;
    let caps = EPISODE_STEM.captures(stem)?;
    let episode: i32 = caps.get(1)?.as_str().parse().ok()?;
    let (show, year) = split_title_year(dirs.get(1)?);
    if show.is_empty() {
        return None;
    }
    Some(Classification::Episode {
        show,
        year,
        season,
        episode,
        title: caps.get(2).and_then(|m| episode_title(m.as_str())),
    })
}

fn classify_movie(stem: &str, parent: Option<&str>) -> Classification {
    if let Some((title, year)) = title_with_year(stem) {
        return Classification::Movie {
            title,
            year: Some(year),
        };
    }
    if let Some((title, year)) = parent.and_then(title_with_year) {
        return Classification::Movie {
            title,
            year: Some(year),
        };
    }

    let title = strip_release_tags(stem);
    if title.is_empty() {
        return Classification::unsupported("no title in file name");
    }
    Classification::Movie { title, year: None }
}

/// The show directory for an episode: the parent, or the grandparent when
/// the parent is a season folder.
fn show_dir<'a>(dirs: &[&'a str]) -> Option<&'a str> {
    let parent = *dirs.first()?;
    if SEASON_DIR.is_match(parent) || parent.eq_ignore_ascii_case("specials") {
        dirs.get(1).copied()
    } else {
        Some(parent)
    }
}

fn title_with_year(name: &str) -> Option<(String, i32)> {
    let caps = TITLE_BRACKETED_YEAR
        .captures(name)
        .or_else(|| TITLE_YEAR.captures(name))?;
    let title = clean(caps.get(1)?.as_str());
    let year = caps.get(2)?.as_str().parse().ok()?;
    (!title.is_empty()).then_some((title, year))
}

fn split_title_year(name: &str) -> (String, Option<i32>) {
    match title_with_year(name) {
        Some((title, year)) => (title, Some(year)),
        None => (strip_release_tags(name), None),
    }
}

fn episode_title(rest: &str) -> Option<String> {
    let title = strip_release_tags(rest);
    let title = title.trim_start_matches(['-', ' ']).trim();
    (!title.is_empty()).then(|| title.to_string())
}

fn strip_release_tags(name: &str) -> String {
    let cut = RELEASE_TAG.find(name).map_or(name.len(), |m| m.start());
    clean(&name[..cut])
}

/// Separators to spaces, whitespace collapsed, dangling punctuation trimmed.
fn clean(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();
    spaced
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == '-' || c == '(' || c == '[' || c.is_whitespace())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classify_str(p: &str) -> Classification {
        classify(&PathBuf::from(p), Path::new("/"))
    }

    #[test]
    fn movie_with_year_in_file_name() {
        assert_eq!(
            classify_str("/media/movies/The.Matrix.1999.1080p.BluRay.x264.mkv"),
            Classification::Movie {
                title: "The Matrix".into(),
                year: Some(1999)
            }
        );
        assert_eq!(
            classify_str("/media/movies/Heat (1995).mkv"),
            Classification::Movie {
                title: "Heat".into(),
                year: Some(1995)
            }
        );
    }

    #[test]
    fn movie_title_that_starts_with_a_number() {
        assert_eq!(
            classify_str("/m/2001.A.Space.Odyssey.1968.mkv"),
            Classification::Movie {
                title: "2001 A Space Odyssey".into(),
                year: Some(1968)
            }
        );
    }

    #[test]
    fn movie_year_from_parent_directory() {
        assert_eq!(
            classify_str("/media/movies/Alien (1979)/movie.mkv"),
            Classification::Movie {
                title: "Alien".into(),
                year: Some(1979)
            }
        );
    }

    #[test]
    fn movie_without_year() {
        assert_eq!(
            classify_str("/m/Some_Home_Video.mp4"),
            Classification::Movie {
                title: "Some Home Video".into(),
                year: None
            }
        );
    }

    #[test]
    fn episode_from_sxxeyy() {
        assert_eq!(
            classify_str("/tv/Breaking.Bad.S02E05.Breakage.720p.mkv"),
            Classification::Episode {
                show: "Breaking Bad".into(),
                year: None,
                season: 2,
                episode: 5,
                title: Some("Breakage".into()),
            }
        );
    }

    #[test]
    fn episode_show_from_directories() {
        assert_eq!(
            classify_str("/tv/Doctor Who (2005)/Season 01/S01E03.mkv"),
            Classification::Episode {
                show: "Doctor Who".into(),
                year: Some(2005),
                season: 1,
                episode: 3,
                title: None,
            }
        );
    }

    #[test]
    fn episode_from_nxnn() {
        let c = classify_str("/tv/Frasier/Frasier - 3x12 - Crane vs Crane.avi");
        assert_eq!(
            c,
            Classification::Episode {
                show: "Frasier".into(),
                year: None,
                season: 3,
                episode: 12,
                title: Some("Crane vs Crane".into()),
            }
        );
    }

    #[test]
    fn resolution_is_not_nxnn() {
        assert!(matches!(
            classify_str("/m/Clip 1920x1080.mkv"),
            Classification::Movie { .. }
        ));
    }

    #[test]
    fn numeric_stem_in_season_dir() {
        assert_eq!(
            classify_str("/tv/Severance/Season 2/03 - Who Is Alive.mkv"),
            Classification::Episode {
                show: "Severance".into(),
                year: None,
                season: 2,
                episode: 3,
                title: Some("Who Is Alive".into()),
            }
        );
    }

    #[test]
    fn multi_episode_takes_first() {
        assert!(matches!(
            classify_str("/tv/Show.S01E01E02.mkv"),
            Classification::Episode {
                season: 1,
                episode: 1,
                ..
            }
        ));
    }

    #[test]
    fn samples_and_extras_are_unsupported() {
        assert!(matches!(
            classify_str("/m/Heat (1995)/heat-sample.mkv"),
            Classification::Unsupported { .. }
        ));
        assert!(matches!(
            classify_str("/m/Heat (1995)/Featurettes/Making Of.mkv"),
            Classification::Unsupported { .. }
        ));
    }

    #[test]
    fn extras_above_the_root_do_not_count() {
        assert_eq!(
            classify(
                Path::new("/srv/Extras/Movies/Heat (1995).mkv"),
                Path::new("/srv/Extras/Movies")
            ),
            Classification::Movie {
                title: "Heat".into(),
                year: Some(1995)
            }
        );
        assert!(matches!(
            classify(
                Path::new("/mnt/trailers/Heat (1995)/Trailers/Teaser.mkv"),
                Path::new("/mnt/trailers")
            ),
            Classification::Unsupported { .. }
        ));
    }

    #[test]
    fn number_in_title_is_not_the_year() {
        assert_eq!(
            classify_str("/m/Blade Runner 2049 (2017).mkv"),
            Classification::Movie {
                title: "Blade Runner 2049".into(),
                year: Some(2017)
            }
        );
        assert_eq!(
            classify_str("/m/Blade.Runner.2049.2017.1080p.BluRay.mkv"),
            Classification::Movie {
                title: "Blade Runner 2049".into(),
                year: Some(2017)
            }
        );
        assert_eq!(
            classify_str("/m/1917.2019.2160p.mkv"),
            Classification::Movie {
                title: "1917".into(),
                year: Some(2019)
            }
        );
    }

    #[test]
    fn clean_collapses_separators() {
        assert_eq!(clean("  The_Thing.-  "), "The Thing");
        assert_eq!(clean("a..b"), "a b");
    }
}
