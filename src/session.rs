use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::Result;
use crate::git::GitRepo;
use crate::scheduler::{OperationFailure, OperationScheduler};
use crate::staging::StagingCoordinator;
use crate::types::{
    DiffLine, DiffResult, DiffTarget, Hunk, OperationState, PathChange, RefreshType,
    StagingIndexEntry, ViewMode,
};
use crate::watcher::FileChangesWatcher;

/// One open repository: the staging operations, the queue that serializes
/// them, and the channels observers subscribe to.
///
/// Mutating calls go through the scheduler and resolve once the change is
/// on disk and its refresh has been broadcast. Queries run on the blocking
/// pool directly and see either the state before or after a concurrent
/// mutation.
pub struct RepositorySession {
    coordinator: Arc<StagingCoordinator>,
    scheduler: Arc<OperationScheduler>,
    watcher: Mutex<Option<FileChangesWatcher>>,
}

impl RepositorySession {
    /// Open the repository containing `path`. Must be called from within a
    /// tokio runtime.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let repo = GitRepo::open(path)?;
        tracing::info!("opened repository at {}", repo.workdir().display());
        Ok(Self {
            coordinator: Arc::new(StagingCoordinator::new(repo, config)),
            scheduler: Arc::new(OperationScheduler::new()),
            watcher: Mutex::new(None),
        })
    }

    pub fn repo(&self) -> &GitRepo {
        self.coordinator.repo()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshType> {
        self.scheduler.subscribe()
    }

    pub fn failures(&self) -> broadcast::Receiver<OperationFailure> {
        self.scheduler.subscribe_failures()
    }

    pub fn state(&self) -> OperationState {
        self.scheduler.state()
    }

    pub fn scheduler(&self) -> &OperationScheduler {
        &self.scheduler
    }

    /// Start reporting external changes on the refresh channel.
    pub fn watch_changes(&self) -> Result<()> {
        let mut slot = self.watcher.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let scheduler = Arc::clone(&self.scheduler);
        let watcher = FileChangesWatcher::start(
            self.coordinator.repo(),
            self.coordinator.config(),
            self.scheduler.busy(),
            Box::new(move |refresh| scheduler.notify(refresh)),
        )?;
        *slot = Some(watcher);
        Ok(())
    }

    /// Stop the watcher, finish queued operations and refuse new ones.
    pub async fn close(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.stop();
        }
        self.scheduler.close().await;
        tracing::info!("closed repository at {}", self.repo().workdir().display());
    }

    async fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StagingCoordinator) -> Result<T> + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        tokio::task::spawn_blocking(move || f(&coordinator)).await?
    }

    async fn mutate<F>(&self, label: String, f: F) -> Result<RefreshType>
    where
        F: FnOnce(&StagingCoordinator) -> Result<RefreshType> + Send + 'static,
    {
        let coordinator = Arc::clone(&self.coordinator);
        self.scheduler.run(label, move || f(&coordinator)).await
    }

    pub async fn unstaged_changes(&self) -> Result<Vec<PathChange>> {
        self.query(|c| c.unstaged_changes()).await
    }

    pub async fn staged_changes(&self) -> Result<Vec<PathChange>> {
        self.query(|c| c.staged_changes()).await
    }

    pub async fn read_entries(&self) -> Result<Vec<StagingIndexEntry>> {
        self.query(|c| c.read_entries()).await
    }

    pub async fn compute_diff(
        &self,
        change: &PathChange,
        target: DiffTarget,
        view: ViewMode,
    ) -> Result<DiffResult> {
        let change = change.clone();
        self.query(move |c| c.compute_diff(&change, target, view))
            .await
    }

    pub async fn stage_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        let (change, hunk) = (change.clone(), hunk.clone());
        let label = format!("stage hunk {} of {}", hunk.header, change.path().display());
        self.mutate(label, move |c| c.stage_hunk(&change, &hunk))
            .await
    }

    pub async fn unstage_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        let (change, hunk) = (change.clone(), hunk.clone());
        let label = format!("unstage hunk {} of {}", hunk.header, change.path().display());
        self.mutate(label, move |c| c.unstage_hunk(&change, &hunk))
            .await
    }

    pub async fn stage_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        let (change, hunk, lines) = (change.clone(), hunk.clone(), lines.to_vec());
        let label = format!("stage lines of {}", change.path().display());
        self.mutate(label, move |c| c.stage_lines(&change, &hunk, &lines))
            .await
    }

    pub async fn unstage_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        let (change, hunk, lines) = (change.clone(), hunk.clone(), lines.to_vec());
        let label = format!("unstage lines of {}", change.path().display());
        self.mutate(label, move |c| c.unstage_lines(&change, &hunk, &lines))
            .await
    }

    /// Stage a single line; see [`RepositorySession::stage_lines`].
    pub async fn stage_line(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        line: &DiffLine,
    ) -> Result<RefreshType> {
        self.stage_lines(change, hunk, std::slice::from_ref(line))
            .await
    }

    pub async fn unstage_line(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        line: &DiffLine,
    ) -> Result<RefreshType> {
        self.unstage_lines(change, hunk, std::slice::from_ref(line))
            .await
    }

    pub async fn reset_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<RefreshType> {
        let (change, hunk) = (change.clone(), hunk.clone());
        let label = format!("reset hunk {} of {}", hunk.header, change.path().display());
        self.mutate(label, move |c| c.reset_hunk(&change, &hunk))
            .await
    }

    pub async fn reset_lines(
        &self,
        change: &PathChange,
        hunk: &Hunk,
        lines: &[DiffLine],
    ) -> Result<RefreshType> {
        let (change, hunk, lines) = (change.clone(), hunk.clone(), lines.to_vec());
        let label = format!("reset lines of {}", change.path().display());
        self.mutate(label, move |c| c.reset_lines(&change, &hunk, &lines))
            .await
    }

    pub async fn stage_file(&self, change: &PathChange) -> Result<RefreshType> {
        let change = change.clone();
        let label = format!("stage {}", change.path().display());
        self.mutate(label, move |c| c.stage_file(&change)).await
    }

    pub async fn unstage_file(&self, change: &PathChange) -> Result<RefreshType> {
        let change = change.clone();
        let label = format!("unstage {}", change.path().display());
        self.mutate(label, move |c| c.unstage_file(&change)).await
    }

    pub async fn stage_all(&self) -> Result<RefreshType> {
        self.mutate("stage all".to_string(), |c| c.stage_all())
            .await
    }

    pub async fn unstage_all(&self) -> Result<RefreshType> {
        self.mutate("unstage all".to_string(), |c| c.unstage_all())
            .await
    }

    /// Queue a hunk stage without waiting; a failure shows up on
    /// [`RepositorySession::failures`].
    pub fn submit_stage_hunk(&self, change: &PathChange, hunk: &Hunk) -> Result<()> {
        let coordinator = Arc::clone(&self.coordinator);
        let (change, hunk) = (change.clone(), hunk.clone());
        let label = format!("stage hunk {} of {}", hunk.header, change.path().display());
        self.scheduler
            .submit(label, move || coordinator.stage_hunk(&change, &hunk))
    }
}
