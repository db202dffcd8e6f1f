//! Storage module for the shared crawl store
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Site, task and URL record persistence
//! - Atomic task and URL claims shared by concurrent workers
//! - Progress-blob checkpoints used for crash recovery

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::state::{TaskState, UrlState};
use std::sync::{Arc, Mutex};

/// Represents a site (one registrable domain)
#[derive(Debug, Clone)]
pub struct SiteRecord {
    pub id: i64,
    pub domain: String,
    pub rank: Option<i64>,
    pub category: Option<String>,
    pub created_at: String,
}

/// Represents one crawl job instance against one site
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: i64,
    pub job: String,
    pub crawler_id: Option<u32>,
    pub site_id: i64,
    pub landing_url_id: Option<i64>,
    pub state: TaskState,
    pub code: Option<i32>,
    pub error: Option<String>,
    pub progress: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

/// Represents one URL row (one repetition of one crawl target)
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub id: i64,
    pub task_id: i64,
    pub site_id: i64,
    pub url: String,
    pub final_url: Option<String>,
    pub scheme: String,
    pub from_url_id: Option<i64>,
    pub depth: u32,
    pub repetition: u32,
    pub code: Option<i32>,
    pub state: UrlState,
    pub created_at: String,
    pub visited_at: Option<String>,
}

/// A URL about to be inserted into the frontier
#[derive(Debug, Clone)]
pub struct NewUrl {
    pub task_id: i64,
    pub site_id: i64,
    pub url: String,
    pub scheme: String,
    pub from_url_id: Option<i64>,
    pub depth: u32,
}

/// Storage handle shared by the frontier, the state machine and modules of one worker
///
/// Each worker opens its own connection; the mutex only serializes access
/// from within that worker and is never held across an await point.
#[derive(Clone)]
pub struct SharedStorage {
    inner: Arc<Mutex<Box<dyn Storage + Send>>>,
}

impl SharedStorage {
    pub fn new<S: Storage + Send + 'static>(storage: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(storage))),
        }
    }

    /// Runs `f` with exclusive access to the underlying store
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut dyn Storage) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut guard = self.inner.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&mut **guard)
    }
}

impl std::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorage").finish_non_exhaustive()
    }
}
