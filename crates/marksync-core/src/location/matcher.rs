//! Best-matching-line fallback for markers whose committed text is gone.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::guards::{truncate_snippet, MIN_LINE_MATCH_SCORE};
use crate::location::diff::split_lines;
use crate::models::{LocationMeta, MarkerLocation};

// Identifier-ish tokens; punctuation is ignored when scoring.
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap());

fn tokens(text: &str) -> HashSet<&str> {
    TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Fraction of `wanted`'s tokens present in `line`.
fn overlap_score(wanted: &HashSet<&str>, line: &str) -> f64 {
    if wanted.is_empty() {
        return 0.0;
    }
    let have = tokens(line);
    let hits = wanted.iter().filter(|token| have.contains(*token)).count();
    hits as f64 / wanted.len() as f64
}

/// Find the 1-based line in `text` that best matches `snippet`'s first
/// non-blank line. Ties go to the earliest line.
pub fn best_matching_line(text: &str, snippet: &str) -> Option<(u32, f64)> {
    let snippet = truncate_snippet(snippet);
    let first = snippet.lines().find(|line| !line.trim().is_empty())?;
    let wanted = tokens(first);

    let mut best: Option<(u32, f64)> = None;
    for (idx, line) in split_lines(text).iter().enumerate() {
        let score = overlap_score(&wanted, line);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((idx as u32 + 1, score));
        }
    }
    best.filter(|(_, score)| *score >= MIN_LINE_MATCH_SCORE)
}

/// Locate a marker in `text` by its recorded code. The span covers as many
/// lines as the snippet, clipped to the text. Inexact matches are flagged
/// `content_changed`.
pub fn locate_by_code(marker_id: &str, text: &str, code: &str) -> Option<MarkerLocation> {
    let (line, score) = best_matching_line(text, code)?;
    let lines = split_lines(text);
    let span = truncate_snippet(code)
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .count()
        .max(1) as u32;
    let line_end = (line + span - 1).min(lines.len() as u32);
    let col_end = lines
        .get(line_end as usize - 1)
        .map_or(1, |l| l.chars().count() as u32 + 1);

    let mut location = MarkerLocation::new(marker_id, line, 1, line_end, col_end);
    if score < 1.0 {
        location.meta = Some(LocationMeta {
            content_changed: true,
            ..LocationMeta::default()
        });
    }
    Some(location)
}
