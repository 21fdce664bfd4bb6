use similar::{Algorithm, DiffOp, capture_diff_slices, group_diff_ops};

use crate::types::{DiffLine, Hunk, LineKind, SplitHunk, SplitRow};

/// Outcome of diffing two byte sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDiff {
    Hunks(Vec<Hunk>),
    /// At least one side is not text; no line diff is produced.
    Binary,
}

/// Check the first `probe_bytes` bytes for a NUL byte.
pub fn is_binary(content: &[u8], probe_bytes: usize) -> bool {
    let end = content.len().min(probe_bytes);
    content[..end].contains(&0)
}

/// Decode content as UTF-8 text, or `None` if it should be treated as binary.
pub fn decode_text(content: &[u8], probe_bytes: usize) -> Option<&str> {
    if is_binary(content, probe_bytes) {
        return None;
    }
    std::str::from_utf8(content).ok()
}

/// Split text into lines, each keeping its own terminator.
/// The final line has no terminator when the text does not end with `\n`.
pub fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    text.split_inclusive('\n').collect()
}

/// Diff two contents line by line.
///
/// Binary detection runs first; content that is not valid UTF-8 degrades to
/// [`LineDiff::Binary`] instead of failing.
pub fn diff_contents(old: &[u8], new: &[u8], context_lines: usize, probe_bytes: usize) -> LineDiff {
    let (Some(old_text), Some(new_text)) = (
        decode_text(old, probe_bytes),
        decode_text(new, probe_bytes),
    ) else {
        tracing::debug!("content is binary or not UTF-8, skipping line diff");
        return LineDiff::Binary;
    };

    let old_lines = split_lines(old_text);
    let new_lines = split_lines(new_text);
    LineDiff::Hunks(diff_lines(&old_lines, &new_lines, context_lines))
}

/// Myers diff over two line sequences, grouped into hunks with
/// `context_lines` of unchanged lines around each change. Changes closer
/// than `2 * context_lines` share a hunk.
pub fn diff_lines(old: &[&str], new: &[&str], context_lines: usize) -> Vec<Hunk> {
    let ops = renumber(capture_diff_slices(Algorithm::Myers, old, new));

    group_diff_ops(ops, context_lines)
        .into_iter()
        .filter(|group| group.iter().any(|op| !matches!(op, DiffOp::Equal { .. })))
        .map(|group| build_hunk(&group, old, new))
        .collect()
}

/// Recompute every op's start positions from the running cursors.
///
/// The replace hook can report a stale `old_index` on an insert that
/// follows a delete; only the lengths are reliable.
fn renumber(ops: Vec<DiffOp>) -> Vec<DiffOp> {
    let (mut old_at, mut new_at) = (0, 0);
    ops.into_iter()
        .map(|op| {
            let op = match op {
                DiffOp::Equal { len, .. } => DiffOp::Equal {
                    old_index: old_at,
                    new_index: new_at,
                    len,
                },
                DiffOp::Delete { old_len, .. } => DiffOp::Delete {
                    old_index: old_at,
                    old_len,
                    new_index: new_at,
                },
                DiffOp::Insert { new_len, .. } => DiffOp::Insert {
                    old_index: old_at,
                    new_index: new_at,
                    new_len,
                },
                DiffOp::Replace {
                    old_len, new_len, ..
                } => DiffOp::Replace {
                    old_index: old_at,
                    old_len,
                    new_index: new_at,
                    new_len,
                },
            };
            old_at = op.old_range().end;
            new_at = op.new_range().end;
            op
        })
        .collect()
}

fn build_hunk(ops: &[DiffOp], old: &[&str], new: &[&str]) -> Hunk {
    let mut lines = Vec::new();

    for op in ops {
        match *op {
            DiffOp::Equal {
                old_index,
                new_index,
                len,
            } => {
                for (i, text) in old[old_index..old_index + len].iter().enumerate() {
                    lines.push(DiffLine {
                        kind: LineKind::Context,
                        old_index: old_index + i,
                        new_index: new_index + i,
                        content: text.to_string(),
                    });
                }
            }
            DiffOp::Delete {
                old_index,
                old_len,
                new_index,
            } => push_removed(&mut lines, old, old_index, old_len, new_index),
            DiffOp::Insert {
                old_index,
                new_index,
                new_len,
            } => push_added(&mut lines, new, old_index, new_index, new_len),
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                push_removed(&mut lines, old, old_index, old_len, new_index);
                push_added(&mut lines, new, old_index + old_len, new_index, new_len);
            }
        }
    }

    // Groups are never empty: `diff_lines` only keeps groups with a change.
    let old_begin = ops.first().map_or(0, |op| op.old_range().start);
    let old_end = ops.last().map_or(0, |op| op.old_range().end);
    let new_begin = ops.first().map_or(0, |op| op.new_range().start);
    let new_end = ops.last().map_or(0, |op| op.new_range().end);

    let old_len = old_end - old_begin;
    let new_len = new_end - new_begin;

    Hunk {
        header: hunk_header(old_begin, old_len, new_begin, new_len),
        lines,
        old_start: header_start(old_begin, old_len),
        old_lines: old_len as u32,
        new_start: header_start(new_begin, new_len),
        new_lines: new_len as u32,
    }
}

fn push_removed(lines: &mut Vec<DiffLine>, old: &[&str], at: usize, len: usize, new_index: usize) {
    for (i, text) in old[at..at + len].iter().enumerate() {
        lines.push(DiffLine {
            kind: LineKind::Removed,
            old_index: at + i,
            new_index,
            content: text.to_string(),
        });
    }
}

fn push_added(lines: &mut Vec<DiffLine>, new: &[&str], old_index: usize, at: usize, len: usize) {
    for (i, text) in new[at..at + len].iter().enumerate() {
        lines.push(DiffLine {
            kind: LineKind::Added,
            old_index,
            new_index: at + i,
            content: text.to_string(),
        });
    }
}

/// One-based start as written in a hunk header. An empty range names the
/// line before it, so it keeps the zero-based index.
fn header_start(begin: usize, len: usize) -> u32 {
    if len == 0 { begin as u32 } else { begin as u32 + 1 }
}

/// Format a hunk header like git does: a range of exactly one line omits
/// its count.
pub fn hunk_header(old_begin: usize, old_len: usize, new_begin: usize, new_len: usize) -> String {
    format!(
        "@@ {} {} @@",
        format_range('-', old_begin, old_len),
        format_range('+', new_begin, new_len)
    )
}

fn format_range(symbol: char, begin: usize, len: usize) -> String {
    match len {
        0 => format!("{symbol}{begin},0"),
        1 => format!("{symbol}{}", begin + 1),
        _ => format!("{symbol}{},{len}", begin + 1),
    }
}

/// Lay a hunk out side by side.
///
/// Context lines sit on both sides. Inside a change block removed and added
/// lines are paired in order; the shorter side is padded with `None`.
pub fn side_by_side(hunk: &Hunk) -> SplitHunk {
    let mut rows = Vec::new();
    let mut removed: Vec<&DiffLine> = Vec::new();
    let mut added: Vec<&DiffLine> = Vec::new();

    for line in &hunk.lines {
        match line.kind {
            LineKind::Context => {
                flush_block(&mut rows, &mut removed, &mut added);
                rows.push((Some(line.clone()), Some(line.clone())));
            }
            LineKind::Removed => removed.push(line),
            LineKind::Added => added.push(line),
        }
    }
    flush_block(&mut rows, &mut removed, &mut added);

    SplitHunk {
        hunk: hunk.clone(),
        rows,
    }
}

fn flush_block(
    rows: &mut Vec<SplitRow>,
    removed: &mut Vec<&DiffLine>,
    added: &mut Vec<&DiffLine>,
) {
    let height = removed.len().max(added.len());
    for i in 0..height {
        rows.push((
            removed.get(i).map(|l| (*l).clone()),
            added.get(i).map(|l| (*l).clone()),
        ));
    }
    removed.clear();
    added.clear();
}
