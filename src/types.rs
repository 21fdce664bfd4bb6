use git2::Oid;
use std::path::PathBuf;

/// The type of a diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    /// Returns the single-character prefix used in unified diff format.
    pub fn prefix(self) -> &'static str {
        match self {
            LineKind::Context => " ",
            LineKind::Added => "+",
            LineKind::Removed => "-",
        }
    }

    pub fn is_change(self) -> bool {
        !matches!(self, LineKind::Context)
    }
}

/// A single line within a diff hunk.
///
/// `old_index` and `new_index` are zero-based cursor positions on each side.
/// For an added line `old_index` is the old-side position reached when the
/// line was emitted; for a removed line `new_index` is the new-side position.
/// `content` keeps the line's own terminator (`\n`, `\r\n`, or nothing for a
/// final line without one).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffLine {
    pub kind: LineKind,
    pub old_index: usize,
    pub new_index: usize,
    pub content: String,
}

impl DiffLine {
    /// One-based line number on `side` for display, if the line exists there.
    pub fn lineno(&self, side: DiffSide) -> Option<usize> {
        match (side, self.kind) {
            (DiffSide::Old, LineKind::Added) | (DiffSide::New, LineKind::Removed) => None,
            (DiffSide::Old, _) => Some(self.old_index + 1),
            (DiffSide::New, _) => Some(self.new_index + 1),
        }
    }

    /// The text without its line terminator.
    pub fn text(&self) -> &str {
        self.content.trim_end_matches('\n').trim_end_matches('\r')
    }

    pub fn has_terminator(&self) -> bool {
        self.content.ends_with('\n')
    }
}

/// A single diff hunk: one contiguous change region plus surrounding context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// The @@ header line, e.g. "@@ -10,5 +10,7 @@"
    pub header: String,
    pub lines: Vec<DiffLine>,
    /// Old file start line (from the @@ header)
    pub old_start: u32,
    /// Old file line count
    pub old_lines: u32,
    /// New file start line
    pub new_start: u32,
    /// New file line count
    pub new_lines: u32,
}

impl Hunk {
    /// Lines that are additions or removals, in hunk order.
    pub fn changes(&self) -> impl Iterator<Item = &DiffLine> {
        self.lines.iter().filter(|l| l.kind.is_change())
    }

    pub fn added_count(&self) -> usize {
        self.lines.iter().filter(|l| l.kind == LineKind::Added).count()
    }

    pub fn removed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Removed)
            .count()
    }
}

impl std::fmt::Display for Hunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.header)
    }
}

/// One row of a side-by-side hunk: `(old, new)`. A `None` cell is padding
/// where one side has fewer lines than the other.
pub type SplitRow = (Option<DiffLine>, Option<DiffLine>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitHunk {
    pub hunk: Hunk,
    pub rows: Vec<SplitRow>,
}

/// Which version of a path a line or hunk refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSide {
    Old,
    New,
}

/// Which pair of versions a diff compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffTarget {
    /// Index (old) against the working tree (new).
    Unstaged,
    /// HEAD (old) against the index (new).
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Unified,
    Split,
}

/// Maps to git2 Delta variants we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
    Rename,
    Copy,
}

/// One changed file. `old_mode`/`new_mode` are raw git modes, `0` when the
/// path does not exist on that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub change_type: ChangeType,
    pub old_mode: u32,
    pub new_mode: u32,
}

impl PathChange {
    /// The path used to address the index entry.
    pub fn path(&self) -> &PathBuf {
        match self.change_type {
            ChangeType::Delete => &self.old_path,
            _ => &self.new_path,
        }
    }
}

/// Result of [`crate::session::RepositorySession::compute_diff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffResult {
    Text { change: PathChange, hunks: Vec<Hunk> },
    Split { change: PathChange, hunks: Vec<SplitHunk> },
    Binary { change: PathChange },
}

impl DiffResult {
    pub fn change(&self) -> &PathChange {
        match self {
            DiffResult::Text { change, .. }
            | DiffResult::Split { change, .. }
            | DiffResult::Binary { change } => change,
        }
    }
}

/// One entry of the staging index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingIndexEntry {
    pub path: String,
    pub object_id: Oid,
    pub mode: u32,
    pub size: u32,
    pub mtime: i32,
    /// Conflict stage (0 for normal entries).
    pub stage: u8,
}

/// Signal broadcast to observers after a mutating operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshType {
    None,
    AllData,
    OnlyLog,
    UncommittedChanges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationState {
    pub busy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(kind: LineKind, old_index: usize, new_index: usize) -> DiffLine {
        DiffLine {
            kind,
            old_index,
            new_index,
            content: "x\n".to_string(),
        }
    }

    #[test]
    fn test_lineno_per_side() {
        let context = line(LineKind::Context, 4, 6);
        assert_eq!(context.lineno(DiffSide::Old), Some(5));
        assert_eq!(context.lineno(DiffSide::New), Some(7));

        let added = line(LineKind::Added, 4, 6);
        assert_eq!(added.lineno(DiffSide::Old), None);
        assert_eq!(added.lineno(DiffSide::New), Some(7));

        let removed = line(LineKind::Removed, 4, 6);
        assert_eq!(removed.lineno(DiffSide::Old), Some(5));
        assert_eq!(removed.lineno(DiffSide::New), None);
    }

    #[test]
    fn test_deleted_path_uses_old_path() {
        let change = PathChange {
            old_path: "a.txt".into(),
            new_path: "b.txt".into(),
            change_type: ChangeType::Delete,
            old_mode: 0o100644,
            new_mode: 0,
        };
        assert_eq!(change.path(), &PathBuf::from("a.txt"));
    }
}
