//! Transcript-to-synopsis matching
//!
//! Scores the combined transcripts of a file's audio segments against every
//! episode synopsis of a series and picks the best candidate. The scoring
//! strategy is pluggable behind [`SynopsisScorer`]; the default is Jaccard
//! similarity over case-folded word tokens, which is order-insensitive and
//! cheap. Ties resolve to the earliest (season, episode).

use std::collections::HashSet;

use tracing::debug;

use crate::db::EpisodeRecord;

/// Scores how well a transcript matches one episode synopsis (0.0 to 1.0)
pub trait SynopsisScorer: Send + Sync {
    fn score(&self, transcript: &str, synopsis: &str) -> f64;
}

/// Split into lowercase word tokens, dropping empties
fn word_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity over word token sets
pub struct TokenOverlapScorer;

impl SynopsisScorer for TokenOverlapScorer {
    fn score(&self, transcript: &str, synopsis: &str) -> f64 {
        let a = word_tokens(transcript);
        let b = word_tokens(synopsis);

        if a.is_empty() && b.is_empty() {
            return 0.0;
        }

        let intersection = a.intersection(&b).count();
        let union = a.union(&b).count();
        intersection as f64 / union as f64
    }
}

/// Best matching episode for a set of transcripts
#[derive(Debug)]
pub struct MatchResult<'a> {
    pub episode: Option<&'a EpisodeRecord>,
    pub score: f64,
}

impl MatchResult<'_> {
    fn none() -> Self {
        MatchResult {
            episode: None,
            score: 0.0,
        }
    }
}

/// Matches transcripts against episode synopses
pub struct TranscriptMatcher {
    scorer: Box<dyn SynopsisScorer>,
}

impl TranscriptMatcher {
    pub fn new() -> Self {
        Self {
            scorer: Box::new(TokenOverlapScorer),
        }
    }

    pub fn with_scorer(scorer: Box<dyn SynopsisScorer>) -> Self {
        Self { scorer }
    }

    /// Find the best matching episode for the combined transcripts
    ///
    /// Transcripts are concatenated before scoring. With no transcripts, no
    /// word content, or no episodes the result carries score 0 and no
    /// episode. A score of 0 against real content still names the earliest
    /// candidate; callers decide what score is good enough.
    pub fn find_best_match<'a>(
        &self,
        transcripts: &[String],
        episodes: &'a [EpisodeRecord],
    ) -> MatchResult<'a> {
        if transcripts.is_empty() || episodes.is_empty() {
            return MatchResult::none();
        }

        let combined = transcripts.join(" ");
        if combined.trim().is_empty() {
            return MatchResult::none();
        }

        let mut ordered: Vec<&EpisodeRecord> = episodes.iter().collect();
        ordered.sort_by_key(|e| (e.season_number, e.episode_number));

        let mut best: Option<&EpisodeRecord> = None;
        let mut best_score = -1.0;

        for episode in ordered {
            let synopsis = episode.synopsis.as_deref().unwrap_or("");
            let score = self.scorer.score(&combined, synopsis);
            if score > best_score {
                best_score = score;
                best = Some(episode);
            }
        }

        debug!(
            candidates = episodes.len(),
            best_score,
            season = ?best.map(|e| e.season_number),
            episode = ?best.map(|e| e.episode_number),
            "Scored transcripts against episode synopses"
        );

        MatchResult {
            episode: best,
            score: best_score,
        }
    }
}

impl Default for TranscriptMatcher {
    fn default() -> Self {
        Self::new()
    }
}
