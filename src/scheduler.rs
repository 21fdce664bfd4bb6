use std::sync::{Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, StageError};
use crate::types::{OperationState, RefreshType};

const SIGNAL_CAPACITY: usize = 64;

/// A blocking repository operation. It runs on the blocking pool and
/// reports which refresh its success calls for.
pub type Job = Box<dyn FnOnce() -> Result<RefreshType> + Send + 'static>;

/// Published when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    pub message: String,
    pub contract_violation: bool,
}

impl From<&StageError> for OperationFailure {
    fn from(err: &StageError) -> Self {
        Self {
            message: err.user_message(),
            contract_violation: err.is_contract_violation(),
        }
    }
}

struct Request {
    label: String,
    job: Job,
    reply: Option<oneshot::Sender<Result<RefreshType>>>,
}

/// Runs the mutating operations of one repository one at a time, in
/// submission order.
///
/// The busy flag is raised while an operation runs. After a successful
/// operation its [`RefreshType`] is broadcast to subscribers; a failed one
/// broadcasts nothing on the refresh channel and an [`OperationFailure`] on
/// the failure channel instead.
pub struct OperationScheduler {
    queue: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    refresh: broadcast::Sender<RefreshType>,
    failures: broadcast::Sender<OperationFailure>,
    busy: watch::Receiver<bool>,
}

impl OperationScheduler {
    /// Start the worker. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (refresh, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (failures, _) = broadcast::channel(SIGNAL_CAPACITY);
        let (busy_tx, busy) = watch::channel(false);

        let worker = tokio::spawn(run_worker(
            queue_rx,
            busy_tx,
            refresh.clone(),
            failures.clone(),
        ));

        Self {
            queue: Mutex::new(Some(queue_tx)),
            worker: Mutex::new(Some(worker)),
            refresh,
            failures,
            busy,
        }
    }

    /// Queue `job` and wait for its result.
    pub async fn run<F>(&self, label: impl Into<String>, job: F) -> Result<RefreshType>
    where
        F: FnOnce() -> Result<RefreshType> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Request {
            label: label.into(),
            job: Box::new(job),
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| StageError::SessionClosed)?
    }

    /// Queue `job` without waiting. Failures are only reported on
    /// [`OperationScheduler::subscribe_failures`].
    pub fn submit<F>(&self, label: impl Into<String>, job: F) -> Result<()>
    where
        F: FnOnce() -> Result<RefreshType> + Send + 'static,
    {
        self.enqueue(Request {
            label: label.into(),
            job: Box::new(job),
            reply: None,
        })
    }

    fn enqueue(&self, request: Request) -> Result<()> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = queue.as_ref().ok_or(StageError::SessionClosed)?;
        sender
            .send(request)
            .map_err(|_| StageError::SessionClosed)
    }

    /// Broadcast a refresh that did not come from a queued operation.
    pub fn notify(&self, refresh: RefreshType) {
        if refresh != RefreshType::None {
            let _ = self.refresh.send(refresh);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshType> {
        self.refresh.subscribe()
    }

    pub fn subscribe_failures(&self) -> broadcast::Receiver<OperationFailure> {
        self.failures.subscribe()
    }

    pub fn state(&self) -> OperationState {
        OperationState {
            busy: *self.busy.borrow(),
        }
    }

    /// A receiver that observes every busy transition.
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.busy.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Stop accepting operations and wait for the queued ones to finish.
    pub async fn close(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            tracing::warn!("operation worker ended abnormally: {}", e);
        }
    }
}

impl Default for OperationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OperationScheduler {
    fn drop(&mut self) {
        // The worker drains what is queued and exits once the sender is gone.
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn run_worker(
    mut queue: mpsc::UnboundedReceiver<Request>,
    busy: watch::Sender<bool>,
    refresh: broadcast::Sender<RefreshType>,
    failures: broadcast::Sender<OperationFailure>,
) {
    while let Some(request) = queue.recv().await {
        busy.send_replace(true);
        tracing::debug!("running {}", request.label);

        let result = match tokio::task::spawn_blocking(request.job).await {
            Ok(result) => result,
            Err(e) => Err(StageError::from(e)),
        };

        busy.send_replace(false);

        match &result {
            Ok(kind) => {
                tracing::debug!("{} finished, refresh {:?}", request.label, kind);
                if *kind != RefreshType::None {
                    let _ = refresh.send(*kind);
                }
            }
            Err(err) => {
                if err.is_contract_violation() {
                    tracing::error!("{} called incorrectly: {}", request.label, err);
                } else {
                    tracing::warn!("{} failed: {}", request.label, err);
                }
                let _ = failures.send(OperationFailure::from(err));
            }
        }

        if let Some(reply) = request.reply {
            let _ = reply.send(result);
        }
    }
    tracing::debug!("operation queue closed");
}
