//! Structured line diff over `similar`.
//!
//! Output hunks carry no context lines. Line numbers are 1-based.

use similar::{Algorithm, DiffTag, TextDiff};

use crate::guards::DIFF_TIMEOUT;

/// One contiguous change between two texts.
///
/// For a pure insertion (`old_lines == 0`), `old_start` is the old line the
/// added lines are inserted before. For a pure deletion (`new_lines == 0`),
/// `new_start` is the first new line after the deletion point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl Hunk {
    /// Last old line this hunk removes, if any.
    pub fn old_end(&self) -> Option<u32> {
        (self.old_lines > 0).then(|| self.old_start + self.old_lines - 1)
    }

    /// Whether old line `line` is removed by this hunk.
    pub fn removes(&self, line: u32) -> bool {
        self.old_lines > 0 && self.old_start <= line && line < self.old_start + self.old_lines
    }

    /// Whether this hunk lies entirely before old line `line`, so that it
    /// only shifts the line. Insertions at `line` count as before it.
    pub fn precedes(&self, line: u32) -> bool {
        self.old_start + self.old_lines <= line
    }

    pub fn line_delta(&self) -> i64 {
        i64::from(self.new_lines) - i64::from(self.old_lines)
    }
}

/// Split text into lines, dropping the terminator. A trailing newline does
/// not produce an extra empty line.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.lines().collect()
}

/// Diff `old` against `new` line by line.
pub fn diff_text(old: &str, new: &str) -> Vec<Hunk> {
    diff_lines(&split_lines(old), &split_lines(new))
}

/// Adjacent delete and insert ops are folded into one hunk. Past
/// [`DIFF_TIMEOUT`] the diff degrades to coarser hunks, never an error.
pub fn diff_lines(old: &[&str], new: &[&str]) -> Vec<Hunk> {
    let diff = TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .timeout(DIFF_TIMEOUT)
        .diff_slices(old, new);

    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;
    for op in diff.ops() {
        let (tag, old_range, new_range) = op.as_tag_tuple();
        if tag == DiffTag::Equal {
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            continue;
        }
        let hunk = current.get_or_insert_with(|| Hunk {
            old_start: (old_range.start + 1) as u32,
            old_lines: 0,
            new_start: (new_range.start + 1) as u32,
            new_lines: 0,
            removed: Vec::new(),
            added: Vec::new(),
        });
        hunk.old_lines += old_range.len() as u32;
        hunk.new_lines += new_range.len() as u32;
        hunk.removed.extend(old[old_range].iter().map(|line| line.to_string()));
        hunk.added.extend(new[new_range].iter().map(|line| line.to_string()));
    }
    if let Some(hunk) = current {
        hunks.push(hunk);
    }
    hunks
}
