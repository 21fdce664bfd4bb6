pub mod config;
pub mod diff;
pub mod error;
pub mod git;
pub mod index;
pub mod object;
pub mod patch;
pub mod scheduler;
pub mod session;
pub mod staging;
pub mod types;
pub mod watcher;

pub use error::{Result, StageError};
pub use session::RepositorySession;
