use git2::{Delta, DiffDelta, DiffOptions, ErrorCode, Oid, Repository, Tree};
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, StageError};
use crate::index::{IndexEditor, IndexSnapshot};
use crate::types::{ChangeType, PathChange, StagingIndexEntry};

const MODE_SYMLINK: u32 = 0o120000;
pub const MODE_GITLINK: u32 = 0o160000;

/// Content of one version of a path, with its git mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub content: Vec<u8>,
    pub mode: u32,
}

/// Locations of an opened, non-bare repository.
///
/// Each operation opens its own [`Repository`] from here; nothing holds a
/// handle across operations.
#[derive(Debug, Clone)]
pub struct GitRepo {
    workdir: PathBuf,
    git_dir: PathBuf,
}

impl GitRepo {
    /// Discover the repository containing `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let repo = Repository::discover(path.as_ref())?;
        let workdir = repo.workdir().ok_or(StageError::BareRepository)?;
        Ok(Self {
            workdir: workdir.to_path_buf(),
            git_dir: repo.path().to_path_buf(),
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn repository(&self) -> Result<Repository> {
        Ok(Repository::open(&self.workdir)?)
    }

    pub fn index_editor(&self) -> IndexEditor {
        IndexEditor::new(&self.git_dir)
    }

    pub fn unstaged_changes(&self) -> Result<Vec<PathChange>> {
        unstaged_changes(&self.repository()?)
    }

    pub fn staged_changes(&self) -> Result<Vec<PathChange>> {
        staged_changes(&self.repository()?)
    }

    pub fn read_entries(&self) -> Result<Vec<StagingIndexEntry>> {
        self.index_editor().read_entries()
    }

    /// The work tree version of `path`, or `None` if it does not exist.
    pub fn workdir_file(&self, path: &str) -> Result<Option<FileVersion>> {
        let full_path = self.workdir.join(path);
        let metadata = match fs::symlink_metadata(&full_path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            return Ok(None);
        }
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&full_path)?;
            return Ok(Some(FileVersion {
                content: target.to_string_lossy().into_owned().into_bytes(),
                mode: MODE_SYMLINK,
            }));
        }

        let mode = if metadata.permissions().mode() & 0o111 != 0 {
            0o100755
        } else {
            0o100644
        };
        Ok(Some(FileVersion {
            content: fs::read(&full_path)?,
            mode,
        }))
    }

    /// Replace the work tree file at `path` with `content` via a rename,
    /// keeping its permissions.
    pub fn write_workdir_file(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.workdir.join(path);
        let parent = full_path.parent().unwrap_or(&self.workdir);
        let mut file = tempfile::NamedTempFile::new_in(parent)?;
        file.write_all(content)?;
        if let Ok(metadata) = fs::metadata(&full_path) {
            file.as_file().set_permissions(metadata.permissions())?;
        }
        file.persist(&full_path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn remove_workdir_file(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.workdir.join(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Convert a repository-relative path to the form the index stores.
pub fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| StageError::InvalidPath(path.to_path_buf()))
}

/// The HEAD tree, or `None` on an unborn branch.
pub fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_tree()?)),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// The HEAD version of `path`, or `None` if HEAD does not have it.
pub fn head_file(repo: &Repository, path: &str) -> Result<Option<FileVersion>> {
    let Some(tree) = head_tree(repo)? else {
        return Ok(None);
    };
    let entry = match tree.get_path(Path::new(path)) {
        Ok(entry) => entry,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mode = entry.filemode() as u32;
    if mode == MODE_GITLINK {
        return Ok(Some(gitlink_version(entry.id())));
    }
    let object = entry.to_object(repo)?;
    let Some(blob) = object.as_blob() else {
        return Ok(None);
    };
    Ok(Some(FileVersion {
        content: blob.content().to_vec(),
        mode,
    }))
}

/// The staged version of `path`, or `None` if the index has no entry.
pub fn index_file(
    repo: &Repository,
    snapshot: &IndexSnapshot,
    path: &str,
) -> Result<Option<FileVersion>> {
    let Some(entry) = snapshot.entry(path) else {
        return Ok(None);
    };
    if entry.mode == MODE_GITLINK {
        return Ok(Some(gitlink_version(entry.id)));
    }
    let blob = repo.find_blob(entry.id)?;
    Ok(Some(FileVersion {
        content: blob.content().to_vec(),
        mode: entry.mode,
    }))
}

/// Submodules are shown the way `git diff` shows them.
fn gitlink_version(oid: Oid) -> FileVersion {
    FileVersion {
        content: format!("Subproject commit {oid}\n").into_bytes(),
        mode: MODE_GITLINK,
    }
}

/// Paths whose work tree version differs from the index, untracked files
/// included.
pub fn unstaged_changes(repo: &Repository) -> Result<Vec<PathChange>> {
    let mut opts = DiffOptions::new();
    opts.include_untracked(true);
    opts.recurse_untracked_dirs(true);

    let diff = repo.diff_index_to_workdir(None, Some(&mut opts))?;
    Ok(diff.deltas().filter_map(|d| to_path_change(&d)).collect())
}

/// Paths whose index version differs from HEAD.
pub fn staged_changes(repo: &Repository) -> Result<Vec<PathChange>> {
    let tree = head_tree(repo)?;
    let diff = repo.diff_tree_to_index(tree.as_ref(), None, None)?;
    Ok(diff.deltas().filter_map(|d| to_path_change(&d)).collect())
}

fn to_path_change(delta: &DiffDelta<'_>) -> Option<PathChange> {
    let change_type = match delta.status() {
        Delta::Added | Delta::Untracked => ChangeType::Add,
        Delta::Deleted => ChangeType::Delete,
        Delta::Modified | Delta::Typechange | Delta::Conflicted => ChangeType::Modify,
        Delta::Renamed => ChangeType::Rename,
        Delta::Copied => ChangeType::Copy,
        Delta::Unmodified | Delta::Ignored | Delta::Unreadable => return None,
    };

    let old_path = delta.old_file().path().map(Path::to_path_buf);
    let new_path = delta.new_file().path().map(Path::to_path_buf);
    let (old_path, new_path) = match (old_path, new_path) {
        (Some(o), Some(n)) => (o, n),
        (Some(p), None) | (None, Some(p)) => (p.clone(), p),
        (None, None) => return None,
    };

    Some(PathChange {
        old_path,
        new_path,
        change_type,
        old_mode: u32::from(delta.old_file().mode()),
        new_mode: u32::from(delta.new_file().mode()),
    })
}
