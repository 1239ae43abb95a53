//! Filename parser for episode numbering
//!
//! Recognizes filenames like:
//! - "Show.S01E03.1080p.mkv"
//! - "show.s01.e03.mkv"
//! - "Show 1x03.mkv"
//! - "Show Season 1 Episode 3.mkv"
//! - "Show.103.mkv" (bare three digits, seasons 1-9 only)
//!
//! Matching is table driven: each pattern pairs a regex with an extractor,
//! and the first matching pattern wins. Also generates canonical
//! "S01E03 - Title.ext" filenames that parse back to the same numbering.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::services::file_utils::sanitize_for_filename;

/// Season and episode numbers recovered from a filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeNumbering {
    pub season: u32,
    pub episode: u32,
}

type Extractor = fn(&Captures) -> Option<EpisodeNumbering>;

struct EpisodePattern {
    name: &'static str,
    regex: Regex,
    extract: Extractor,
}

/// Extractor for patterns capturing (season, episode) as groups 1 and 2
fn season_episode_groups(caps: &Captures) -> Option<EpisodeNumbering> {
    let season = caps.get(1)?.as_str().parse().ok()?;
    let episode = caps.get(2)?.as_str().parse().ok()?;
    Some(EpisodeNumbering { season, episode })
}

/// Recognized numbering patterns, tried in order. The bare three-digit form
/// must stay last: it only applies when nothing more explicit matched, and it
/// refuses digits embedded in a longer run so resolutions ("1080p") and years
/// never read as episode numbers.
static EPISODE_PATTERNS: Lazy<Vec<EpisodePattern>> = Lazy::new(|| {
    vec![
        EpisodePattern {
            name: "sxxexx",
            regex: Regex::new(r"(?i)s(\d{1,2})e(\d{1,2})").unwrap(),
            extract: season_episode_groups,
        },
        EpisodePattern {
            name: "sxx.exx",
            regex: Regex::new(r"(?i)s(\d{1,2})[. _-]e(\d{1,2})").unwrap(),
            extract: season_episode_groups,
        },
        EpisodePattern {
            name: "nxnn",
            regex: Regex::new(r"(?i)\b(\d{1,2})x(\d{1,2})\b").unwrap(),
            extract: season_episode_groups,
        },
        EpisodePattern {
            name: "season-episode-words",
            // Anything may sit between the season and episode tokens
            // ("Season 1, Episode 3", "Season 1 of ... Episode 3")
            regex: Regex::new(r"(?i)season[\s._-]*(\d{1,2}).*?episode[\s._-]*(\d{1,2})").unwrap(),
            extract: season_episode_groups,
        },
        EpisodePattern {
            name: "bare-three-digit",
            regex: Regex::new(r"(?:^|\D)([1-9])(\d{2})(?:\D|$)").unwrap(),
            extract: season_episode_groups,
        },
    ]
});

/// Parse a filename to extract season and episode numbers
///
/// Operates on the bare filename, not a full path. Returns `None` when no
/// pattern matches.
pub fn parse_episode_numbering(filename: &str) -> Option<EpisodeNumbering> {
    for pattern in EPISODE_PATTERNS.iter() {
        if let Some(caps) = pattern.regex.captures(filename) {
            if let Some(numbering) = (pattern.extract)(&caps) {
                debug!(
                    filename = filename,
                    pattern = pattern.name,
                    season = numbering.season,
                    episode = numbering.episode,
                    "Parsed filename"
                );
                return Some(numbering);
            }
        }
    }

    None
}

/// Build the canonical "S01E03 - Title.ext" filename for an episode
///
/// The extension is carried over from the original filename; the title is
/// sanitized for the filesystem. The result always parses back to the same
/// season and episode.
pub fn generate_filename(
    original_filename: &str,
    season: u32,
    episode: u32,
    title: &str,
) -> String {
    let extension = std::path::Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    format!(
        "S{:02}E{:02} - {}{}",
        season,
        episode,
        sanitize_for_filename(title),
        extension
    )
}
