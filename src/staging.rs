use git2::IndexAddOption;

use crate::config::Config;
use crate::diff::{self, LineDiff, decode_text, split_lines};
use crate::error::{Result, StageError};
use crate::git::{self, FileVersion, GitRepo, MODE_GITLINK, path_str};
use crate::index::{IndexEditor, regular_mode};
use crate::object::{ObjectWriter, hash_blob};
use crate::patch::{self, Direction};
use crate::types::{
    DiffLine, DiffResult, DiffTarget, Hunk, PathChange, RefreshType, StagingIndexEntry, ViewMode,
};

/// Which changes of a hunk an operation carries.
#[derive(Clone, Copy)]
enum Selection<'a> {
    Hunk,
    Lines(&'a [DiffLine]),
}

/// Carries out staging operations against one repository.
///
/// Every method is blocking and opens its own repository handle; the
/// scheduler runs them one at a time on the blocking pool. Hunks and lines
/// passed in must come from [`StagingCoordinator::compute_diff`]: unstaged
/// hunks for staging and resetting, staged hunks for unstaging.
pub struct StagingCoordinator {
    repo: GitRepo,
    config: Config,
}

impl StagingCoordinator {
    pub fn new(repo: GitRepo, config: Config) -> Self {
        Self { repo, config }
    }

    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn editor(&self) -> IndexEditor {
        self.repo.index_editor()
    }

    pub fn unstaged_changes(&self) -> Result<Vec<PathChange>> {
        self.repo.unstaged_changes()
    }

    pub fn staged_changes(&self) -> Result<Vec<PathChange>> {
        self.repo.staged_changes()
    }

    pub fn read_entries(&self) -> Result<Vec<StagingIndexEntry>> {
        self.repo.read_entries()
    }

    /// Diff one changed path.
    ///
    /// `Unstaged` compares the index with the work tree, `Staged` compares
    /// HEAD with the index. A side that does not exist diffs as empty.
    pub fn compute_diff(
        &self,
        change: &PathChange,
        target: DiffTarget,
        view: ViewMode,
    ) -> Result<DiffResult> {
        let repo = self.repo.repository()?;
        let snapshot = self.editor().snapshot()?;
        let path = path_str(change.path())?;

        let (old, new) = match target {
            DiffTarget::Unstaged => (
                git::index_file(&repo, &snapshot, path)?,
                self.repo.workdir_file(path)?,
            ),
            DiffTarget::Staged => (
                git::head_file(&repo, path_str(&change.old_path)?)?,
                git::index_file(&repo, &snapshot, path)?,
            ),
        };

        let old = old.map(|v| v.content).unwrap_or_default();
        let new = new.map(|v| v.content).unwrap_or_default();

        let hunks = match diff::diff_contents(
            &old,
            &new,
            self.config.context_lines,
            self.config.binary_probe_bytes,
        ) {
            LineDiff::Binary => {
                return Ok(DiffResult::Binary {
                    change: change.clone(),
                });
            }
            LineDiff::Hunks(hunks) => hunks,
        };

        Ok(match view {
            ViewMode::Unified => DiffResult::Text {
                change: change.clone(),
                hunks,
            },
            ViewMode::Split => DiffResult::Split {
                change: change.clone(),
                hunks: hunks.iter().map(diff::side_by_side).collect(),
            },
        })
    }

    /// Stage every change of an unstaged hunk.
    pub fn stage_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        self.rewrite_index(change, hunk, Selection::Hunk, Direction::Stage)
    }

    /// Remove every change of a staged hunk from the index.
    pub fn unstage_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        self.rewrite_index(change, hunk, Selection::Hunk, Direction::Unstage)
    }

    /// Stage the selected added and removed lines of an unstaged hunk.
    pub fn stage_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        patch::selection_mask(hunk, lines)?;
        self.rewrite_index(change, hunk, Selection::Lines(lines), Direction::Stage)
    }

    /// Remove the selected lines of a staged hunk from the index.
    pub fn unstage_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        patch::selection_mask(hunk, lines)?;
        self.rewrite_index(change, hunk, Selection::Lines(lines), Direction::Unstage)
    }

    /// Discard an unstaged hunk from the work tree. The index is untouched.
    pub fn reset_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        self.rewrite_workdir(change, hunk, Selection::Hunk)
    }

    /// Discard the selected lines of an unstaged hunk from the work tree.
    pub fn reset_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        patch::selection_mask(hunk, lines)?;
        self.rewrite_workdir(change, hunk, Selection::Lines(lines))
    }

    /// Stage the whole work tree version of one path, or its deletion.
    pub fn stage_file(&self, change: &PathChange) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let path = path_str(change.path())?;
        let editor = self.editor();
        let seen = editor.fingerprint()?;
        let mut lock = editor.lock(seen.as_ref())?;

        match self.repo.workdir_file(path)? {
            Some(file) => {
                if lock.is_current(path, hash_blob(&file.content)?) {
                    tracing::debug!("{} already staged", path);
                    return Ok(RefreshType::UncommittedChanges);
                }
                let oid = ObjectWriter::new(&repo).insert_blob(&file.content)?;
                lock.replace_entry(path, oid, file.mode, file.content.len())?;
            }
            None => {
                lock.remove_entry(path)?;
            }
        }

        lock.commit()?;
        tracing::info!("staged {}", path);
        Ok(RefreshType::UncommittedChanges)
    }

    /// Restore the HEAD version of one path in the index.
    pub fn unstage_file(&self, change: &PathChange) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let path = path_str(change.path())?;
        let editor = self.editor();
        let seen = editor.fingerprint()?;
        let mut lock = editor.lock(seen.as_ref())?;

        match git::head_file(&repo, path_str(&change.old_path)?)? {
            Some(file) => {
                if change.old_path != change.new_path {
                    lock.remove_entry(path)?;
                }
                let old_path = path_str(&change.old_path)?;
                let oid = ObjectWriter::new(&repo).insert_blob(&file.content)?;
                lock.replace_entry(old_path, oid, file.mode, file.content.len())?;
            }
            None => {
                lock.remove_entry(path)?;
            }
        }

        lock.commit()?;
        tracing::info!("unstaged {}", path);
        Ok(RefreshType::UncommittedChanges)
    }

    /// Stage every change in the work tree, like `git add -A`.
    pub fn stage_all(&self) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let editor = self.editor();
        let seen = editor.fingerprint()?;
        let mut lock = editor.lock(seen.as_ref())?;

        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;

        lock.replace_all(&index)?;
        lock.commit()?;
        tracing::info!("staged all changes");
        Ok(RefreshType::UncommittedChanges)
    }

    /// Reset the index to HEAD, leaving the work tree alone.
    pub fn unstage_all(&self) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let editor = self.editor();
        let seen = editor.fingerprint()?;
        let mut lock = editor.lock(seen.as_ref())?;

        let mut index = repo.index()?;
        match git::head_tree(&repo)? {
            Some(tree) => index.read_tree(&tree)?,
            None => index.clear()?,
        }

        lock.replace_all(&index)?;
        lock.commit()?;
        tracing::info!("unstaged all changes");
        Ok(RefreshType::UncommittedChanges)
    }

    /// Patch the index version of the hunk's path and store the result.
    ///
    /// Staging moves the index towards the work tree, unstaging towards
    /// HEAD. An empty result for a path missing on that side removes the
    /// entry instead of storing an empty blob.
    fn rewrite_index(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        selection: Selection<'_>,
        direction: Direction,
    ) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let path = path_str(change.path())?;
        let editor = self.editor();
        let snapshot = editor.snapshot()?;

        let current = git::index_file(&repo, &snapshot, path)?;
        let content = self.patch_version(path, current.as_ref(), hunk, selection, direction)?;

        let target = match direction {
            Direction::Stage => self.repo.workdir_file(path)?,
            Direction::Unstage => git::head_file(&repo, path_str(&change.old_path)?)?,
        };

        let mut lock = editor.lock(snapshot.fingerprint.as_ref())?;

        if content.is_empty() && target.is_none() {
            if lock.remove_entry(path)? {
                lock.commit()?;
                tracing::info!("{} removed from the index", path);
            }
            return Ok(RefreshType::UncommittedChanges);
        }

        if lock.is_current(path, hash_blob(&content)?) {
            tracing::debug!("index entry for {} unchanged", path);
            return Ok(RefreshType::UncommittedChanges);
        }
        let oid = ObjectWriter::new(&repo).insert_blob(&content)?;

        let mode = current
            .as_ref()
            .or(target.as_ref())
            .map_or(0, |v| regular_mode(v.mode));
        lock.replace_entry(path, oid, mode, content.len())?;
        lock.commit()?;

        tracing::info!(
            "{} {} in {}",
            match direction {
                Direction::Stage => "staged",
                Direction::Unstage => "unstaged",
            },
            describe(hunk, selection),
            path
        );
        Ok(RefreshType::UncommittedChanges)
    }

    /// Patch the work tree version of the hunk's path back towards the index.
    fn rewrite_workdir(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        selection: Selection<'_>,
    ) -> Result<RefreshType> {
        let repo = self.repo.repository()?;
        let path = path_str(change.path())?;
        let snapshot = self.editor().snapshot()?;

        let current = self.repo.workdir_file(path)?;
        let content =
            self.patch_version(path, current.as_ref(), hunk, selection, Direction::Unstage)?;

        if content.is_empty() && git::index_file(&repo, &snapshot, path)?.is_none() {
            self.repo.remove_workdir_file(path)?;
            tracing::info!("removed {} from the work tree", path);
        } else {
            self.repo.write_workdir_file(path, &content)?;
            tracing::info!("discarded {} in {}", describe(hunk, selection), path);
        }

        Ok(RefreshType::UncommittedChanges)
    }

    fn patch_version(
        &self,
        path: &str,
        version: Option<&FileVersion>,
        hunk: &Hunk,
        selection: Selection<'_>,
        direction: Direction,
    ) -> Result<Vec<u8>> {
        if version.is_some_and(|v| v.mode == MODE_GITLINK) {
            return Err(StageError::ContentDecode(path.to_string()));
        }
        let bytes = version.map_or(&[][..], |v| v.content.as_slice());
        let text = decode_text(bytes, self.config.binary_probe_bytes)
            .ok_or_else(|| StageError::ContentDecode(path.to_string()))?;
        let base = split_lines(text);

        match selection {
            Selection::Hunk => patch::apply_hunk(&base, hunk, direction),
            Selection::Lines(lines) => patch::apply_selection(&base, hunk, lines, direction),
        }
    }
}

fn describe(hunk: &Hunk, selection: Selection<'_>) -> String {
    match selection {
        Selection::Hunk => format!("hunk {}", hunk.header),
        Selection::Lines(lines) => format!("{} line(s) of hunk {}", lines.len(), hunk.header),
    }
}
