#![allow(dead_code)]

use git2::{Repository, Signature};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use linestage::config::Config;
use linestage::git::GitRepo;
use linestage::staging::StagingCoordinator;
use linestage::types::{DiffResult, DiffTarget, Hunk, PathChange, StagingIndexEntry, ViewMode};

const GIT_IDXENTRY_INTENT_TO_ADD: u16 = 1 << 13;

/// Create a temporary git repository with an initial commit.
pub fn create_temp_repo() -> (TempDir, Repository) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let repo = Repository::init(dir.path()).expect("Failed to init repo");

    // Create initial commit so HEAD exists
    {
        let mut index = repo.index().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = Signature::now("Test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .unwrap();
    }

    (dir, repo)
}

/// A coordinator over the repository in `dir`.
pub fn coordinator(dir: &TempDir) -> StagingCoordinator {
    StagingCoordinator::new(
        GitRepo::open(dir.path()).expect("Failed to open repo"),
        Config::default(),
    )
}

/// Add and commit a file to the repository.
pub fn commit_file(repo: &Repository, path: &str, content: &str) {
    write_file(repo, path, content.as_bytes());

    let mut index = repo.index().unwrap();
    // The index may have been replaced on disk since this handle read it.
    index.read(true).unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();

    let tree_oid = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_oid).unwrap();
    let sig = Signature::now("Test", "test@test.com").unwrap();

    let head = repo.head().unwrap();
    let parent_commit = head.peel_to_commit().unwrap();

    repo.commit(
        Some("HEAD"),
        &sig,
        &sig,
        &format!("Add {}", path),
        &tree,
        &[&parent_commit],
    )
    .unwrap();
}

/// Stage a file's work tree content with plain git2 (`git add`).
pub fn git_add(repo: &Repository, path: &str) {
    let mut index = repo.index().unwrap();
    index.read(true).unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();
}

/// Stage arbitrary content for `path` without touching the work tree.
pub fn stage_content(repo: &Repository, path: &str, content: &str) {
    let mut index = repo.index().unwrap();
    index.read(true).unwrap();
    let oid = repo.blob(content.as_bytes()).unwrap();
    let mut entry = index.get_path(Path::new(path), 0).unwrap();
    entry.id = oid;
    entry.file_size = content.len() as u32;
    index.add(&entry).unwrap();
    index.write().unwrap();
}

/// Add `path` with intent-to-add (`git add -N`).
pub fn intent_to_add(repo: &Repository, path: &str) {
    let mut index = repo.index().unwrap();
    index.read(true).unwrap();
    let empty_oid = repo.blob(&[]).unwrap();
    let entry = git2::IndexEntry {
        ctime: git2::IndexTime::new(0, 0),
        mtime: git2::IndexTime::new(0, 0),
        dev: 0,
        ino: 0,
        mode: 0o100644,
        uid: 0,
        gid: 0,
        file_size: 0,
        id: empty_oid,
        flags: 0,
        flags_extended: GIT_IDXENTRY_INTENT_TO_ADD,
        path: path.as_bytes().to_vec(),
    };
    index.add(&entry).unwrap();
    index.write().unwrap();
}

/// Modify a file in the working directory (without staging).
pub fn modify_file(repo: &Repository, path: &str, content: &str) {
    write_file(repo, path, content.as_bytes());
}

/// Create a new untracked file in the working directory.
pub fn create_untracked_file(repo: &Repository, path: &str, content: &str) {
    write_file(repo, path, content.as_bytes());
}

/// Delete a tracked file from the working directory.
pub fn delete_file(repo: &Repository, path: &str) {
    let workdir = repo.workdir().expect("Not a bare repo");
    fs::remove_file(workdir.join(path)).unwrap();
}

/// Create a binary file in the working directory.
pub fn create_binary_file(repo: &Repository, path: &str) {
    // Actual binary content (includes NUL and non-UTF8 bytes)
    let binary_content: Vec<u8> = (0..256).map(|i| i as u8).collect();
    write_file(repo, path, &binary_content);
}

pub fn read_workdir(repo: &Repository, path: &str) -> String {
    let workdir = repo.workdir().expect("Not a bare repo");
    fs::read_to_string(workdir.join(path)).unwrap()
}

fn write_file(repo: &Repository, path: &str, content: &[u8]) {
    let workdir = repo.workdir().expect("Not a bare repo");
    let full_path = workdir.join(path);

    // Create parent directories if needed
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent).unwrap();
    }

    fs::write(&full_path, content).unwrap();
}

/// Staged content of `path`, read fresh from disk.
pub fn index_content(repo: &Repository, path: &str) -> Option<String> {
    let index = git2::Index::open(&repo.path().join("index")).unwrap();
    let entry = index.get_path(Path::new(path), 0)?;
    let blob = repo.find_blob(entry.id).unwrap();
    Some(String::from_utf8(blob.content().to_vec()).unwrap())
}

/// Raw index entry for `path`, read fresh from disk.
pub fn index_entry(repo: &Repository, path: &str) -> Option<git2::IndexEntry> {
    let index = git2::Index::open(&repo.path().join("index")).unwrap();
    index.get_path(Path::new(path), 0)
}

pub fn has_intent_to_add(entry: &git2::IndexEntry) -> bool {
    entry.flags_extended & GIT_IDXENTRY_INTENT_TO_ADD != 0
}

/// Every index entry except `path`, for isolation checks.
pub fn entries_except(entries: &[StagingIndexEntry], path: &str) -> Vec<StagingIndexEntry> {
    entries.iter().filter(|e| e.path != path).cloned().collect()
}

fn find_change(changes: Vec<PathChange>, path: &str) -> PathChange {
    changes
        .into_iter()
        .find(|c| c.path() == Path::new(path))
        .unwrap_or_else(|| panic!("no change for {path}"))
}

fn hunks_of(coordinator: &StagingCoordinator, change: &PathChange, target: DiffTarget) -> Vec<Hunk> {
    match coordinator
        .compute_diff(change, target, ViewMode::Unified)
        .unwrap()
    {
        DiffResult::Text { hunks, .. } => hunks,
        other => panic!("expected a text diff, got {other:?}"),
    }
}

/// The unstaged change of `path` and its hunks.
pub fn unstaged(coordinator: &StagingCoordinator, path: &str) -> (PathChange, Vec<Hunk>) {
    let change = find_change(coordinator.unstaged_changes().unwrap(), path);
    let hunks = hunks_of(coordinator, &change, DiffTarget::Unstaged);
    (change, hunks)
}

/// The staged change of `path` and its hunks.
pub fn staged(coordinator: &StagingCoordinator, path: &str) -> (PathChange, Vec<Hunk>) {
    let change = find_change(coordinator.staged_changes().unwrap(), path);
    let hunks = hunks_of(coordinator, &change, DiffTarget::Staged);
    (change, hunks)
}

/// Numbered lines `line1\n` .. `line{n}\n`.
pub fn numbered_lines(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("line{}\n", i)).collect()
}
