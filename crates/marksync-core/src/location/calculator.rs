//! Relocation of marker spans through a line diff.

use indexmap::IndexMap;
use tracing::debug;

use crate::location::diff::Hunk;
use crate::models::{LocationMeta, MarkerLocation};

/// Where one old line ends up in the new text.
#[derive(Debug)]
enum LineFate<'a> {
    Kept(u32),
    Removed(&'a Hunk),
}

fn line_fate(line: u32, hunks: &[Hunk]) -> LineFate<'_> {
    let mut delta = 0i64;
    for hunk in hunks {
        if hunk.removes(line) {
            return LineFate::Removed(hunk);
        }
        if hunk.precedes(line) {
            delta += hunk.line_delta();
        } else {
            break;
        }
    }
    LineFate::Kept((i64::from(line) + delta).max(1) as u32)
}

fn char_len(line: &str) -> u32 {
    line.chars().count() as u32
}

/// Map `location` from the diff's old text onto its new text.
///
/// Lines untouched by the diff keep their columns. A start line that was
/// removed moves to the first line the removing hunk produced; a removed end
/// line moves past the last line that hunk produced. When every line of the
/// span is removed and nothing replaces it, the result collapses to a point
/// flagged `entirely_deleted`.
pub fn relocate(location: &MarkerLocation, hunks: &[Hunk]) -> MarkerLocation {
    let line_start = location.line_start.max(1);
    let line_end = location.line_end.max(line_start);

    let mut meta = location.meta.unwrap_or_default();
    meta.content_changed |= hunks.iter().any(|hunk| {
        let removes_inside = hunk.old_lines > 0
            && hunk.old_start <= line_end
            && hunk.old_start + hunk.old_lines > line_start;
        let inserts_inside = hunk.old_lines == 0
            && hunk.new_lines > 0
            && hunk.old_start > line_start
            && hunk.old_start <= line_end;
        removes_inside || inserts_inside
    });

    let all_removed = (line_start..=line_end)
        .all(|line| matches!(line_fate(line, hunks), LineFate::Removed(_)));
    if all_removed {
        let touching: Vec<&Hunk> = hunks
            .iter()
            .filter(|hunk| {
                hunk.old_lines > 0
                    && hunk.old_start <= line_end
                    && hunk.old_start + hunk.old_lines > line_start
            })
            .collect();
        if touching.iter().all(|hunk| hunk.new_lines == 0) {
            let anchor = touching.first().map_or(1, |hunk| hunk.new_start.max(1));
            return MarkerLocation {
                id: location.id.clone(),
                line_start: anchor,
                col_start: 1,
                line_end: anchor,
                col_end: 1,
                meta: Some(LocationMeta {
                    start_was_deleted: true,
                    end_was_deleted: true,
                    entirely_deleted: true,
                    content_changed: true,
                }),
            };
        }
    }

    let (new_line_start, new_col_start) = match line_fate(line_start, hunks) {
        LineFate::Kept(line) => (line, location.col_start),
        LineFate::Removed(hunk) => {
            meta.start_was_deleted = true;
            (hunk.new_start.max(1), 1)
        }
    };
    let (mut new_line_end, mut new_col_end) = match line_fate(line_end, hunks) {
        LineFate::Kept(line) => (line, location.col_end),
        LineFate::Removed(hunk) => {
            meta.end_was_deleted = true;
            match hunk.added.last() {
                Some(last) => (hunk.new_start + hunk.new_lines - 1, char_len(last) + 1),
                None => (hunk.new_start.max(1), 1),
            }
        }
    };
    if new_line_end < new_line_start {
        new_line_end = new_line_start;
        new_col_end = new_col_start;
    }

    MarkerLocation {
        id: location.id.clone(),
        line_start: new_line_start,
        col_start: new_col_start,
        line_end: new_line_end,
        col_end: new_col_end,
        meta: (!meta.is_empty()).then_some(meta),
    }
}

/// Relocate a batch of locations through one diff, logging each move.
pub fn relocate_all(
    locations: &IndexMap<String, MarkerLocation>,
    hunks: &[Hunk],
) -> IndexMap<String, MarkerLocation> {
    locations
        .iter()
        .map(|(id, location)| {
            let moved = relocate(location, hunks);
            debug!(marker_id = %id, "{location} => {moved}");
            (id.clone(), moved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::diff::diff_text;

    fn numbered(count: u32) -> String {
        (1..=count).map(|i| format!("line {i}\n")).collect()
    }

    fn loc(a: u32, b: u32, c: u32, d: u32) -> MarkerLocation {
        MarkerLocation::new("m1", a, b, c, d)
    }

    fn coords(location: &MarkerLocation) -> (u32, u32, u32, u32) {
        (location.line_start, location.col_start, location.line_end, location.col_end)
    }

    #[test]
    fn insertion_above_shifts_the_span() {
        let old = numbered(20);
        let new = format!("a\nb\nc\n{old}");
        let moved = relocate(&loc(10, 0, 10, 5), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (13, 0, 13, 5));
        assert_eq!(moved.meta, None);
    }

    #[test]
    fn edits_below_leave_the_span_alone() {
        let old = numbered(20);
        let new = old.replace("line 15\n", "");
        let moved = relocate(&loc(3, 2, 5, 7), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (3, 2, 5, 7));
        assert_eq!(moved.meta, None);
    }

    #[test]
    fn deletion_above_moves_up() {
        let old = numbered(20);
        let new = old.replace("line 2\nline 3\n", "");
        let moved = relocate(&loc(10, 1, 12, 4), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (8, 1, 10, 4));
    }

    #[test]
    fn insertion_inside_flags_content_change() {
        let old = numbered(20);
        let new = old.replace("line 11\n", "line 11\ninserted\n");
        let moved = relocate(&loc(10, 1, 12, 4), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (10, 1, 13, 4));
        let meta = moved.meta.unwrap();
        assert!(meta.content_changed);
        assert!(!meta.entirely_deleted);
    }

    #[test]
    fn replaced_single_line_keeps_a_span() {
        let old = numbered(20);
        let new = old.replace("line 10\n", "line ten\n");
        let moved = relocate(&loc(10, 1, 10, 7), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (10, 1, 10, 9));
        let meta = moved.meta.unwrap();
        assert!(meta.start_was_deleted && meta.end_was_deleted && meta.content_changed);
        assert!(!meta.entirely_deleted);
    }

    #[test]
    fn removed_span_is_entirely_deleted() {
        let old = numbered(20);
        let new = old.replace("line 9\nline 10\nline 11\n", "");
        let moved = relocate(&loc(10, 1, 10, 7), &diff_text(&old, &new));
        assert!(moved.is_entirely_deleted());
        assert_eq!(coords(&moved), (9, 1, 9, 1));
    }

    #[test]
    fn partially_removed_start_moves_to_hunk() {
        let old = numbered(20);
        let new = old.replace("line 9\nline 10\n", "");
        let moved = relocate(&loc(10, 3, 12, 4), &diff_text(&old, &new));
        assert_eq!(coords(&moved), (9, 1, 10, 4));
        let meta = moved.meta.unwrap();
        assert!(meta.start_was_deleted);
        assert!(!meta.end_was_deleted);
        assert!(meta.content_changed);
    }

    #[test]
    fn round_trip_restores_untouched_span() {
        let a = numbered(30);
        let b = a
            .replace("line 2\nline 3\n", "")
            .replace("line 20\n", "line 20\nextra 1\nextra 2\n")
            .replace("line 5\n", "intro\nline 5\n");
        let original = loc(12, 4, 15, 9);
        let forward = relocate(&original, &diff_text(&a, &b));
        assert_eq!(coords(&forward), (11, 4, 14, 9));
        let back = relocate(&forward, &diff_text(&b, &a));
        assert_eq!(coords(&back), coords(&original));
        assert!(!back.is_entirely_deleted());
    }

    #[test]
    fn relocate_all_keeps_ids() {
        let old = numbered(5);
        let new = format!("top\n{old}");
        let mut batch = IndexMap::new();
        batch.insert("m1".to_string(), MarkerLocation::new("m1", 1, 1, 1, 3));
        batch.insert("m2".to_string(), MarkerLocation::new("m2", 4, 1, 5, 3));
        let moved = relocate_all(&batch, &diff_text(&old, &new));
        assert_eq!(moved["m1"].line_start, 2);
        assert_eq!(moved["m2"].line_end, 6);
        assert_eq!(moved["m2"].id, "m2");
    }
}
