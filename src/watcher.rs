use git2::Repository;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;
use crate::git::GitRepo;
use crate::types::RefreshType;

/// Files in the git directory that change while composing a commit and
/// never affect status.
const GIT_DIR_MESSAGE_FILES: [&str; 3] = ["COMMIT_EDITMSG", "MERGE_MSG", "SQUASH_MSG"];

/// Receives the refresh a batch of file-system changes calls for.
pub type RefreshSink = Box<dyn Fn(RefreshType) + Send + Sync + 'static>;

/// Decides whether a changed path matters and which refresh it needs.
pub struct WatchFilter {
    workdir: PathBuf,
    git_dir: PathBuf,
    patterns: Vec<glob::Pattern>,
}

impl WatchFilter {
    pub fn new(repo: &GitRepo, config: &Config) -> Self {
        Self {
            workdir: repo.workdir().to_path_buf(),
            git_dir: repo.git_dir().to_path_buf(),
            patterns: config.compiled_ignore_patterns(),
        }
    }

    /// `None` for paths that are ignored. A change inside the git directory
    /// needs a full refresh, any other one only the uncommitted changes.
    pub fn classify(&self, repo: &Repository, path: &Path) -> Option<RefreshType> {
        if let Ok(rel) = path.strip_prefix(&self.git_dir) {
            return self.classify_git_dir(rel);
        }

        let rel = path.strip_prefix(&self.workdir).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        if self.patterns.iter().any(|p| p.matches_path(rel)) {
            return None;
        }
        if repo.is_path_ignored(rel).unwrap_or(false) {
            return None;
        }
        Some(RefreshType::UncommittedChanges)
    }

    fn classify_git_dir(&self, rel: &Path) -> Option<RefreshType> {
        if rel.starts_with("objects") {
            return None;
        }
        if GIT_DIR_MESSAGE_FILES.iter().any(|f| rel == Path::new(f)) {
            return None;
        }
        let name = rel.file_name()?.to_string_lossy();
        if name.ends_with(".lock") || name.starts_with("index.linestage") {
            return None;
        }
        Some(RefreshType::AllData)
    }
}

/// Watches the work tree and git directory of a repository.
///
/// Changes are debounced; while an operation is running the refresh waits
/// until the session is idle again.
pub struct FileChangesWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl FileChangesWatcher {
    /// Start watching. Must be called from within a tokio runtime.
    pub fn start(
        repo: &GitRepo,
        config: &Config,
        busy: watch::Receiver<bool>,
        sink: RefreshSink,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let filter = WatchFilter::new(repo, config);
        let repository = repo.repository()?;

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("watch error: {}", e);
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let refresh = event
                .paths
                .iter()
                .filter_map(|p| filter.classify(&repository, p))
                .reduce(merge);
            if let Some(refresh) = refresh
                && tx.send(refresh).is_err()
            {
                tracing::trace!("closed");
            }
        })
        .map_err(watch_error)?;

        watcher
            .watch(repo.workdir(), RecursiveMode::Recursive)
            .map_err(watch_error)?;
        if !repo.git_dir().starts_with(repo.workdir()) {
            watcher
                .watch(repo.git_dir(), RecursiveMode::Recursive)
                .map_err(watch_error)?;
        }
        tracing::info!("watching {}", repo.workdir().display());

        let task = tokio::spawn(debounce_changes(rx, config.watch_debounce, busy, sink));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

fn watch_error(err: notify::Error) -> std::io::Error {
    std::io::Error::other(format!("failed to watch repository: {err}"))
}

fn merge(a: RefreshType, b: RefreshType) -> RefreshType {
    if a == RefreshType::AllData || b == RefreshType::AllData {
        RefreshType::AllData
    } else {
        b
    }
}

async fn debounce_changes(
    mut changes: mpsc::UnboundedReceiver<RefreshType>,
    quiet: Duration,
    mut busy: watch::Receiver<bool>,
    sink: RefreshSink,
) {
    while let Some(first) = changes.recv().await {
        let mut pending = first;
        let mut closed = false;

        loop {
            match tokio::time::timeout(quiet, changes.recv()).await {
                Ok(Some(next)) => pending = merge(pending, next),
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        if *busy.borrow() {
            tracing::debug!("operation running, deferring {:?}", pending);
        }
        if busy.wait_for(|b| !*b).await.is_err() {
            break;
        }
        sink(pending);

        if closed {
            break;
        }
    }
}
