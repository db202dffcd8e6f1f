//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types. Any backend providing atomic claim-and-transition,
//! atomic multi-row insert and atomic checkpoint updates can stand in for
//! the SQLite implementation.

use crate::config::FrontierPolicy;
use crate::state::{TaskState, UrlState};
use crate::storage::{NewUrl, SiteRecord, TaskRecord, UrlRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Site not found: {0}")]
    SiteNotFound(i64),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("URL not found: {0}")]
    UrlNotFound(i64),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every method that changes more than one row runs inside a single
/// transaction; no partial write is ever visible to another connection.
pub trait Storage {
    // ===== Site Management =====

    /// Returns the id of the site for `domain`, creating it on first reference
    fn get_or_create_site(&mut self, domain: &str) -> StorageResult<i64>;

    /// Gets a site by ID
    fn get_site(&self, site_id: i64) -> StorageResult<SiteRecord>;

    /// Sets optional popularity rank and category of a site
    fn update_site_metadata(
        &mut self,
        site_id: i64,
        rank: Option<i64>,
        category: Option<&str>,
    ) -> StorageResult<()>;

    // ===== Task Management =====

    /// Returns the task for (job, site), creating it in state `free` if missing
    ///
    /// The boolean is true when the task was created by this call.
    fn get_or_create_task(&mut self, job: &str, site_id: i64) -> StorageResult<(i64, bool)>;

    /// Gets a task by ID
    fn get_task(&self, task_id: i64) -> StorageResult<TaskRecord>;

    /// Atomically assigns a task to `crawler_id`
    ///
    /// A task this crawler already owns in state `progress` (left behind by a
    /// crash) wins over an unowned `free` task. Returns `None` when the job has
    /// nothing left for this crawler.
    fn claim_task(&mut self, job: &str, crawler_id: u32) -> StorageResult<Option<TaskRecord>>;

    /// Moves tasks this crawler aborted back to `progress` so they are resumed
    fn reopen_aborted_tasks(&mut self, job: &str, crawler_id: u32) -> StorageResult<usize>;

    /// Records the seed URL row of a task
    fn set_landing_url(&mut self, task_id: i64, url_id: i64) -> StorageResult<()>;

    /// Stamps the task's last result code and error text
    fn update_task_result(
        &mut self,
        task_id: i64,
        code: i32,
        error: Option<&str>,
    ) -> StorageResult<()>;

    /// Overwrites the task's progress blob
    fn save_progress(&mut self, task_id: i64, blob: &str) -> StorageResult<()>;

    /// Moves a task to a terminal state, replacing its progress blob
    fn finish_task(
        &mut self,
        task_id: i64,
        state: TaskState,
        progress: Option<&str>,
    ) -> StorageResult<()>;

    /// Counts tasks in a state, optionally restricted to one job
    fn count_tasks_by_state(&self, job: Option<&str>, state: TaskState) -> StorageResult<u64>;

    // ===== URL Management =====

    /// Inserts repetition 1 as `free` and repetitions 2..=N as `waiting`
    ///
    /// All rows are written in one transaction. Returns the id of the
    /// repetition-1 row.
    fn insert_url(&mut self, url: &NewUrl, repetitions: u32) -> StorageResult<i64>;

    /// Gets a URL row by ID
    fn get_url(&self, url_id: i64) -> StorageResult<UrlRecord>;

    /// Atomically claims the next `free` repetition-1 row of a task
    fn claim_free_url(
        &mut self,
        task_id: i64,
        policy: FrontierPolicy,
        current_depth: u32,
    ) -> StorageResult<Option<UrlRecord>>;

    /// Atomically claims the `waiting` row for an exact (url, depth, repetition)
    fn claim_waiting_url(
        &mut self,
        task_id: i64,
        url: &str,
        depth: u32,
        repetition: u32,
    ) -> StorageResult<Option<UrlRecord>>;

    /// Records the result of a URL row and moves it to `complete`
    ///
    /// Returns false if the row was already complete; completed rows are
    /// never rewritten.
    fn complete_url(
        &mut self,
        url_id: i64,
        code: i32,
        final_url: Option<&str>,
    ) -> StorageResult<bool>;

    /// Forces unconfirmed URLs of a task to `complete` with `code`
    ///
    /// Covers every row in `progress`, plus `current_url_id` and its still
    /// `waiting` repetition siblings. Returns the number of rows changed.
    fn fail_interrupted_urls(
        &mut self,
        task_id: i64,
        current_url_id: Option<i64>,
        code: i32,
    ) -> StorageResult<usize>;

    /// Hands claimed but never-navigated rows back to the frontier
    ///
    /// Repetition-1 rows return to `free`, later repetitions to `waiting`.
    fn release_claimed_urls(&mut self, task_id: i64) -> StorageResult<usize>;

    /// Counts URL rows of a task in a state
    fn count_urls_by_state(&self, task_id: i64, state: UrlState) -> StorageResult<u64>;

    /// Counts repetition-1 rows of a task that were discovered from another URL
    fn count_discovered_urls(&self, task_id: i64) -> StorageResult<u64>;

    /// Returns all repetition-1 URL strings of a task
    fn seen_urls(&self, task_id: i64) -> StorageResult<Vec<String>>;

    // ===== Statistics =====

    /// Counts URL rows in a state across tasks, optionally for one job
    fn count_all_urls_by_state(&self, job: Option<&str>, state: UrlState) -> StorageResult<u64>;

    /// Gets the total number of sites
    fn count_sites(&self) -> StorageResult<u64>;

    /// Gets (result code, count) pairs of completed URL rows, ordered by code
    fn result_code_histogram(&self, job: Option<&str>) -> StorageResult<Vec<(i32, u64)>>;
}
