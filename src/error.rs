//! Error types for staging operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while diffing, patching or editing the index.
#[derive(Debug, Error)]
pub enum StageError {
    /// Content could not be interpreted as text.
    #[error("{0} is not a text file")]
    ContentDecode(String),

    /// The index lock is held by another process or operation.
    #[error("Index is locked by another process ({})", .0.display())]
    LockUnavailable(PathBuf),

    /// The object store rejected a write.
    #[error("Failed to write object: {0}")]
    ObjectWrite(#[source] git2::Error),

    /// The caller selected a context line or a line outside the hunk.
    #[error("Invalid line selection: {0}")]
    InvalidSelection(String),

    /// The index or the file changed between reading and locking.
    #[error("Repository changed externally: {0}")]
    ConcurrentModification(String),

    #[error("Bare repositories are not supported")]
    BareRepository,

    #[error("Repository session is closed")]
    SessionClosed,

    #[error("Path is not valid UTF-8: {0:?}")]
    InvalidPath(PathBuf),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T, E = StageError> = std::result::Result<T, E>;

impl StageError {
    /// Text shown to the user in a dismissible error.
    pub fn user_message(&self) -> String {
        match self {
            StageError::LockUnavailable(_) => {
                "Another git process is using this repository. Try again once it finishes."
                    .to_string()
            }
            StageError::ConcurrentModification(_) => {
                "The repository changed externally, please retry.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// A caller bug rather than a runtime condition.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, StageError::InvalidSelection(_))
    }
}
