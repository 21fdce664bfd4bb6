use crate::error::{Result, StageError};
use crate::types::{DiffLine, Hunk, LineKind};

/// Which way a selection moves between the two sides of a hunk.
///
/// `Stage` rewrites the old side (the index for an unstaged diff) towards the
/// new side. `Unstage` rewrites the new side back towards the old side; it is
/// also how selected work tree changes are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Stage,
    Unstage,
}

impl Direction {
    /// Kind of line that is inserted into the base.
    fn inserted(self) -> LineKind {
        match self {
            Direction::Stage => LineKind::Added,
            Direction::Unstage => LineKind::Removed,
        }
    }

    /// Kind of line that is deleted from the base.
    fn deleted(self) -> LineKind {
        match self {
            Direction::Stage => LineKind::Removed,
            Direction::Unstage => LineKind::Added,
        }
    }

    /// Position of a line in the base's coordinates.
    fn coordinate(self, line: &DiffLine) -> usize {
        match self {
            Direction::Stage => line.old_index,
            Direction::Unstage => line.new_index,
        }
    }
}

/// Apply every change of `hunk` to `base`.
pub fn apply_hunk(base: &[&str], hunk: &Hunk, direction: Direction) -> Result<Vec<u8>> {
    let mask = hunk.lines.iter().map(|l| l.kind.is_change()).collect::<Vec<_>>();
    apply_mask(base, hunk, &mask, direction)
}

/// Apply only the `selected` changes of `hunk` to `base`.
///
/// `base` holds the lines of the side being rewritten, each with its own
/// terminator. Unselected changes are left as they are in `base`. A selected
/// added line whose removed partner is not selected is inserted before that
/// partner, so staging `+X` of `-b +X` yields `X` followed by `b`.
///
/// Fails with [`StageError::InvalidSelection`] for context lines or lines not
/// in `hunk`, and with [`StageError::ConcurrentModification`] when `base` no
/// longer holds the hunk's source lines. If `base` already holds the result,
/// it is returned unchanged.
pub fn apply_selection(
    base: &[&str],
    hunk: &Hunk,
    selected: &[DiffLine],
    direction: Direction,
) -> Result<Vec<u8>> {
    let mask = selection_mask(hunk, selected)?;
    apply_mask(base, hunk, &mask, direction)
}

/// Resolve `selected` to positions in `hunk.lines`.
pub fn selection_mask(hunk: &Hunk, selected: &[DiffLine]) -> Result<Vec<bool>> {
    let mut mask = vec![false; hunk.lines.len()];

    for line in selected {
        if line.kind == LineKind::Context {
            return Err(StageError::InvalidSelection(format!(
                "context line {:?} cannot be selected",
                line.text()
            )));
        }
        let pos = hunk
            .lines
            .iter()
            .position(|l| l == line)
            .ok_or_else(|| {
                StageError::InvalidSelection(format!(
                    "line {:?} does not belong to hunk {}",
                    line.text(),
                    hunk.header
                ))
            })?;
        mask[pos] = true;
    }

    Ok(mask)
}

fn apply_mask(base: &[&str], hunk: &Hunk, mask: &[bool], direction: Direction) -> Result<Vec<u8>> {
    let Some(first) = hunk.lines.first() else {
        return Ok(base.concat().into_bytes());
    };
    let start = direction.coordinate(first);

    // Lines of the hunk that exist in the base, in order.
    let region: Vec<&str> = hunk
        .lines
        .iter()
        .filter(|l| l.kind == LineKind::Context || l.kind == direction.deleted())
        .map(|l| l.content.as_str())
        .collect();

    let edited = edit_region(&region, start, hunk, mask, direction)?;

    match locate(base, start, &region, &edited) {
        Some(Placement::Apply(at)) => {
            if at != start {
                tracing::debug!(
                    "hunk {} applied at line {} (offset {})",
                    hunk.header,
                    at,
                    at as isize - start as isize
                );
            }
            let mut out = Vec::with_capacity(base.len() + edited.len());
            out.extend_from_slice(&base[..at]);
            out.extend_from_slice(&edited);
            out.extend_from_slice(&base[at + region.len()..]);
            Ok(out.concat().into_bytes())
        }
        Some(Placement::AlreadyApplied) => {
            tracing::debug!("hunk {} already applied, leaving content as is", hunk.header);
            Ok(base.concat().into_bytes())
        }
        None => Err(StageError::ConcurrentModification(format!(
            "hunk {} no longer matches the current content",
            hunk.header
        ))),
    }
}

/// Apply the selected lines of `hunk` to its own source region.
fn edit_region<'a>(
    region: &[&'a str],
    start: usize,
    hunk: &'a Hunk,
    mask: &[bool],
    direction: Direction,
) -> Result<Vec<&'a str>> {
    // (position in base coordinates, inserts before deletes, line)
    let mut edits: Vec<(usize, u8, &DiffLine)> = Vec::new();
    let mut block_anchor: Option<usize> = None;

    for (line, &selected) in hunk.lines.iter().zip(mask) {
        if line.kind == LineKind::Context {
            block_anchor = None;
            continue;
        }
        let anchor = *block_anchor.get_or_insert(direction.coordinate(line));
        if !selected {
            continue;
        }
        if line.kind == direction.inserted() {
            edits.push((anchor, 0, line));
        } else {
            edits.push((direction.coordinate(line), 1, line));
        }
    }
    edits.sort_by_key(|(pos, rank, _)| (*pos, *rank));

    let mut out: Vec<&str> = region.to_vec();
    let mut offset: isize = 0;

    for (pos, rank, line) in edits {
        let at = (pos as isize - start as isize + offset) as usize;
        if rank == 0 {
            out.insert(at.min(out.len()), line.content.as_str());
            offset += 1;
        } else {
            if out.get(at) != Some(&line.content.as_str()) {
                return Err(StageError::InvalidSelection(format!(
                    "line {:?} is not at its recorded position in hunk {}",
                    line.text(),
                    hunk.header
                )));
            }
            out.remove(at);
            offset -= 1;
        }
    }

    Ok(out)
}

enum Placement {
    Apply(usize),
    AlreadyApplied,
}

/// Find where the hunk's source region sits in `base`, searching outwards
/// from `start` when earlier edits shifted it.
fn locate(base: &[&str], start: usize, region: &[&str], edited: &[&str]) -> Option<Placement> {
    let changes = region != edited;

    if matches_at(base, start, region) {
        // An empty region matches anywhere; only the edited lines tell.
        if region.is_empty() && changes && matches_at(base, start, edited) {
            return Some(Placement::AlreadyApplied);
        }
        return Some(Placement::Apply(start));
    }
    if changes && !edited.is_empty() && matches_at(base, start, edited) {
        return Some(Placement::AlreadyApplied);
    }

    for distance in 1..=base.len() {
        let candidates = [start.checked_sub(distance), Some(start + distance)];
        for at in candidates.into_iter().flatten() {
            if !region.is_empty() && matches_at(base, at, region) {
                return Some(Placement::Apply(at));
            }
            if changes && !edited.is_empty() && matches_at(base, at, edited) {
                return Some(Placement::AlreadyApplied);
            }
        }
    }

    // A whole-file deletion that already happened.
    if changes && edited.is_empty() && base.is_empty() {
        return Some(Placement::AlreadyApplied);
    }

    None
}

fn matches_at(base: &[&str], at: usize, lines: &[&str]) -> bool {
    at + lines.len() <= base.len() && base[at..at + lines.len()] == *lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff_lines, split_lines};

    fn hunks(old: &str, new: &str) -> Vec<Hunk> {
        diff_lines(&split_lines(old), &split_lines(new), 3)
    }

    fn stage(base: &str, hunk: &Hunk, selected: &[DiffLine]) -> String {
        let out = apply_selection(&split_lines(base), hunk, selected, Direction::Stage).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn pick(hunk: &Hunk, kind: LineKind, text: &str) -> DiffLine {
        hunk.lines
            .iter()
            .find(|l| l.kind == kind && l.text() == text)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_apply_whole_hunk() {
        let old = "a\nb\nc\n";
        let new = "a\nB\nc\nd\n";
        let h = hunks(old, new);
        assert_eq!(h.len(), 1);
        let out = apply_hunk(&split_lines(old), &h[0], Direction::Stage).unwrap();
        assert_eq!(out, new.as_bytes());
    }

    #[test]
    fn test_added_line_goes_before_unselected_removal() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let x = pick(&h[0], LineKind::Added, "X");
        assert_eq!(stage(old, &h[0], &[x]), "a\nX\nb\nc\n");
    }

    #[test]
    fn test_stage_only_removal() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let b = pick(&h[0], LineKind::Removed, "b");
        assert_eq!(stage(old, &h[0], &[b]), "a\nc\n");
    }

    #[test]
    fn test_empty_selection_is_identity() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        assert_eq!(stage(old, &h[0], &[]), old);
    }

    #[test]
    fn test_context_line_is_rejected() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let a = pick(&h[0], LineKind::Context, "a");
        let err = apply_selection(&split_lines(old), &h[0], &[a], Direction::Stage).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_foreign_line_is_rejected() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let stray = DiffLine {
            kind: LineKind::Added,
            old_index: 7,
            new_index: 7,
            content: "nope\n".to_string(),
        };
        let err =
            apply_selection(&split_lines(old), &h[0], &[stray], Direction::Stage).unwrap_err();
        assert!(matches!(err, StageError::InvalidSelection(_)));
    }

    #[test]
    fn test_unstage_restores_old_side() {
        let old = "a\nb\nc\n";
        let new = "a\nX\nc\n";
        let h = hunks(old, new);
        let out = apply_hunk(&split_lines(new), &h[0], Direction::Unstage).unwrap();
        assert_eq!(out, old.as_bytes());
    }

    #[test]
    fn test_unstage_single_added_line() {
        let old = "a\nc\n";
        let new = "a\nX\nY\nc\n";
        let h = hunks(old, new);
        let y = pick(&h[0], LineKind::Added, "Y");
        let out = apply_selection(&split_lines(new), &h[0], &[y], Direction::Unstage).unwrap();
        assert_eq!(out, b"a\nX\nc\n");
    }

    #[test]
    fn test_reapplying_is_a_no_op() {
        let old = "a\nb\nc\n";
        let new = "a\nX\nc\n";
        let h = hunks(old, new);
        assert_eq!(stage(new, &h[0], &h[0].changes().cloned().collect::<Vec<_>>()), new);
    }

    #[test]
    fn test_stale_base_is_rejected() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let x = pick(&h[0], LineKind::Added, "X");
        let err =
            apply_selection(&split_lines("q\nr\ns\n"), &h[0], &[x], Direction::Stage).unwrap_err();
        assert!(matches!(err, StageError::ConcurrentModification(_)));
    }

    #[test]
    fn test_shifted_region_is_found() {
        let old = "a\nb\nc\n";
        let h = hunks(old, "a\nX\nc\n");
        let x = pick(&h[0], LineKind::Added, "X");
        assert_eq!(stage("top\na\nb\nc\n", &h[0], &[x]), "top\na\nX\nb\nc\n");
    }

    #[test]
    fn test_missing_final_newline_is_kept() {
        let old = "a\nb";
        let new = "a\nb\nc";
        let h = hunks(old, new);
        let out = apply_hunk(&split_lines(old), &h[0], Direction::Stage).unwrap();
        assert_eq!(out, new.as_bytes());
    }

    #[test]
    fn test_new_file_from_empty_base() {
        let new = "one\ntwo\n";
        let h = hunks("", new);
        let two = pick(&h[0], LineKind::Added, "two");
        assert_eq!(stage("", &h[0], &[two]), "two\n");
    }

    #[test]
    fn test_crlf_lines_keep_their_terminator() {
        let old = "a\r\nb\r\n";
        let new = "a\r\nB\r\n";
        let h = hunks(old, new);
        let out = apply_hunk(&split_lines(old), &h[0], Direction::Stage).unwrap();
        assert_eq!(out, new.as_bytes());
    }

    #[test]
    fn test_deletion_on_unrelated_content_is_rejected() {
        let h = hunks("a\nb\nc\n", "");
        let err = apply_hunk(&split_lines("q\nr\n"), &h[0], Direction::Stage).unwrap_err();
        assert!(matches!(err, StageError::ConcurrentModification(_)));

        let h = diff_lines(&split_lines("a\nb\nc\n"), &split_lines("a\nc\n"), 0);
        let err = apply_hunk(&split_lines("x\ny\nz\n"), &h[0], Direction::Stage).unwrap_err();
        assert!(matches!(err, StageError::ConcurrentModification(_)));
    }

    #[test]
    fn test_whole_file_deletion_on_empty_base_is_noop() {
        let h = hunks("a\nb\nc\n", "");
        assert_eq!(apply_hunk(&[], &h[0], Direction::Stage).unwrap(), b"");
    }
}
