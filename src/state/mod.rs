//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `UrlState`: lifecycle of a URL row (free, waiting, progress, complete)
//! - `TaskState`: lifecycle of a task (free, progress, complete, aborted)
//! - `ProgressState`: the versioned checkpoint blob a worker resumes from
//! - Result-code sentinels recorded when no HTTP status is available

mod progress;
mod task_state;
mod url_state;

pub use progress::{ModuleStates, ProgressError, ProgressState, PROGRESS_VERSION};
pub use task_state::TaskState;
pub use url_state::UrlState;

use thiserror::Error;

/// Navigation or browser-level failure (timeout, crash, DNS failure)
pub const RESULT_BROWSER_ERROR: i32 = -1;

/// A post-navigation module hook failed
pub const RESULT_PIPELINE_ERROR: i32 = -2;

/// A pre-navigation hook failed and the task was aborted
pub const RESULT_WORKER_ERROR: i32 = -3;

/// Raised when a stored state string is not a known state
#[derive(Debug, Error)]
#[error("Unknown state: {0}")]
pub struct UnknownState(pub String);
