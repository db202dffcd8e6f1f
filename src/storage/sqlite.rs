//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.
//! Every worker opens its own connection to the same database file; claims
//! are serialized by `BEGIN IMMEDIATE` transactions, which take the database
//! write lock before the candidate row is read.

use crate::config::FrontierPolicy;
use crate::state::{TaskState, UnknownState, UrlState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{NewUrl, SiteRecord, TaskRecord, UrlRecord};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const TASK_COLUMNS: &str = "id, job, crawler_id, site_id, landing_url_id, state, code, error, \
                            progress, created_at, started_at, finished_at";

const URL_COLUMNS: &str = "id, task_id, site_id, url, final_url, scheme, from_url_id, depth, \
                           repetition, code, state, created_at, visited_at";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens (or creates) the shared database file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `busy_timeout` - How long to wait on a lock held by another worker
    pub fn open(path: &Path, busy_timeout: Duration) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing and dry runs)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    fn mark_url_progress(
        conn: &Connection,
        url_id: i64,
        from: UrlState,
    ) -> StorageResult<Option<UrlRecord>> {
        let changed = conn.execute(
            "UPDATE urls SET state = ?1 WHERE id = ?2 AND state = ?3",
            params![
                UrlState::Progress.to_db_string(),
                url_id,
                from.to_db_string()
            ],
        )?;
        if changed != 1 {
            return Ok(None);
        }

        let record = conn.query_row(
            &format!("SELECT {} FROM urls WHERE id = ?1", URL_COLUMNS),
            params![url_id],
            url_from_row,
        )?;
        Ok(Some(record))
    }
}

fn parse_state<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = UnknownState>,
{
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        job: row.get(1)?,
        crawler_id: row.get(2)?,
        site_id: row.get(3)?,
        landing_url_id: row.get(4)?,
        state: parse_state(5, row.get(5)?)?,
        code: row.get(6)?,
        error: row.get(7)?,
        progress: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        finished_at: row.get(11)?,
    })
}

fn url_from_row(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        site_id: row.get(2)?,
        url: row.get(3)?,
        final_url: row.get(4)?,
        scheme: row.get(5)?,
        from_url_id: row.get(6)?,
        depth: row.get(7)?,
        repetition: row.get(8)?,
        code: row.get(9)?,
        state: parse_state(10, row.get(10)?)?,
        created_at: row.get(11)?,
        visited_at: row.get(12)?,
    })
}

impl Storage for SqliteStorage {
    // ===== Site Management =====

    fn get_or_create_site(&mut self, domain: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR IGNORE INTO sites (domain, created_at) VALUES (?1, ?2)",
            params![domain, now],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM sites WHERE domain = ?1",
            params![domain],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_site(&self, site_id: i64) -> StorageResult<SiteRecord> {
        self.conn
            .query_row(
                "SELECT id, domain, rank, category, created_at FROM sites WHERE id = ?1",
                params![site_id],
                |row| {
                    Ok(SiteRecord {
                        id: row.get(0)?,
                        domain: row.get(1)?,
                        rank: row.get(2)?,
                        category: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(StorageError::SiteNotFound(site_id))
    }

    fn update_site_metadata(
        &mut self,
        site_id: i64,
        rank: Option<i64>,
        category: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE sites SET rank = COALESCE(?1, rank), category = COALESCE(?2, category)
             WHERE id = ?3",
            params![rank, category, site_id],
        )?;
        Ok(())
    }

    // ===== Task Management =====

    fn get_or_create_task(&mut self, job: &str, site_id: i64) -> StorageResult<(i64, bool)> {
        let now = Utc::now().to_rfc3339();
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO tasks (job, site_id, state, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![job, site_id, TaskState::Free.to_db_string(), now],
        )? == 1;
        let id = self.conn.query_row(
            "SELECT id FROM tasks WHERE job = ?1 AND site_id = ?2",
            params![job, site_id],
            |row| row.get(0),
        )?;
        Ok((id, created))
    }

    fn get_task(&self, task_id: i64) -> StorageResult<TaskRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
                params![task_id],
                task_from_row,
            )
            .optional()?
            .ok_or(StorageError::TaskNotFound(task_id))
    }

    fn claim_task(&mut self, job: &str, crawler_id: u32) -> StorageResult<Option<TaskRecord>> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owned: Option<i64> = tx
            .query_row(
                "SELECT id FROM tasks WHERE job = ?1 AND crawler_id = ?2 AND state = ?3
                 ORDER BY id LIMIT 1",
                params![job, crawler_id, TaskState::Progress.to_db_string()],
                |row| row.get(0),
            )
            .optional()?;

        let task_id = match owned {
            Some(id) => id,
            None => {
                let free: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM tasks WHERE job = ?1 AND crawler_id IS NULL AND state = ?2
                         ORDER BY id LIMIT 1",
                        params![job, TaskState::Free.to_db_string()],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(id) = free else {
                    tx.commit()?;
                    return Ok(None);
                };

                let changed = tx.execute(
                    "UPDATE tasks SET crawler_id = ?1, state = ?2, started_at = ?3
                     WHERE id = ?4 AND crawler_id IS NULL AND state = ?5",
                    params![
                        crawler_id,
                        TaskState::Progress.to_db_string(),
                        now,
                        id,
                        TaskState::Free.to_db_string()
                    ],
                )?;
                if changed != 1 {
                    tx.commit()?;
                    return Ok(None);
                }
                id
            }
        };

        let task = tx.query_row(
            &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
            params![task_id],
            task_from_row,
        )?;
        tx.commit()?;
        Ok(Some(task))
    }

    fn reopen_aborted_tasks(&mut self, job: &str, crawler_id: u32) -> StorageResult<usize> {
        let changed = self.conn.execute(
            "UPDATE tasks SET state = ?1, finished_at = NULL
             WHERE job = ?2 AND crawler_id = ?3 AND state = ?4",
            params![
                TaskState::Progress.to_db_string(),
                job,
                crawler_id,
                TaskState::Aborted.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    fn set_landing_url(&mut self, task_id: i64, url_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE tasks SET landing_url_id = ?1 WHERE id = ?2",
            params![url_id, task_id],
        )?;
        Ok(())
    }

    fn update_task_result(
        &mut self,
        task_id: i64,
        code: i32,
        error: Option<&str>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE tasks SET code = ?1, error = ?2 WHERE id = ?3",
            params![code, error, task_id],
        )?;
        Ok(())
    }

    fn save_progress(&mut self, task_id: i64, blob: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks SET progress = ?1 WHERE id = ?2",
            params![blob, task_id],
        )?;
        if changed == 0 {
            return Err(StorageError::TaskNotFound(task_id));
        }
        Ok(())
    }

    fn finish_task(
        &mut self,
        task_id: i64,
        state: TaskState,
        progress: Option<&str>,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE tasks SET state = ?1, progress = ?2, finished_at = ?3 WHERE id = ?4",
            params![state.to_db_string(), progress, now, task_id],
        )?;
        Ok(())
    }

    fn count_tasks_by_state(&self, job: Option<&str>, state: TaskState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM tasks WHERE state = ?1 AND (?2 IS NULL OR job = ?2)",
            params![state.to_db_string(), job],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ===== URL Management =====

    fn insert_url(&mut self, url: &NewUrl, repetitions: u32) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let first_id = {
            let mut stmt = tx.prepare(
                "INSERT INTO urls (task_id, site_id, url, scheme, from_url_id, depth, repetition,
                 state, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;

            let first_id = stmt.insert(params![
                url.task_id,
                url.site_id,
                url.url,
                url.scheme,
                url.from_url_id,
                url.depth,
                1u32,
                UrlState::Free.to_db_string(),
                now
            ])?;

            for repetition in 2..=repetitions {
                stmt.execute(params![
                    url.task_id,
                    url.site_id,
                    url.url,
                    url.scheme,
                    url.from_url_id,
                    url.depth,
                    repetition,
                    UrlState::Waiting.to_db_string(),
                    now
                ])?;
            }
            first_id
        };

        tx.commit()?;
        Ok(first_id)
    }

    fn get_url(&self, url_id: i64) -> StorageResult<UrlRecord> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM urls WHERE id = ?1", URL_COLUMNS),
                params![url_id],
                url_from_row,
            )
            .optional()?
            .ok_or(StorageError::UrlNotFound(url_id))
    }

    fn claim_free_url(
        &mut self,
        task_id: i64,
        policy: FrontierPolicy,
        current_depth: u32,
    ) -> StorageResult<Option<UrlRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let free = UrlState::Free.to_db_string();

        let candidate: Option<i64> = match policy {
            FrontierPolicy::BreadthFirst => tx
                .query_row(
                    "SELECT id FROM urls WHERE task_id = ?1 AND state = ?2 AND repetition = 1
                     ORDER BY CASE WHEN depth = ?3 THEN 0 ELSE 1 END, depth, id LIMIT 1",
                    params![task_id, free, current_depth],
                    |row| row.get(0),
                )
                .optional()?,
            FrontierPolicy::InsertionOrder => tx
                .query_row(
                    "SELECT id FROM urls WHERE task_id = ?1 AND state = ?2 AND repetition = 1
                     ORDER BY id LIMIT 1",
                    params![task_id, free],
                    |row| row.get(0),
                )
                .optional()?,
        };

        let claimed = match candidate {
            Some(id) => Self::mark_url_progress(&tx, id, UrlState::Free)?,
            None => None,
        };
        tx.commit()?;
        Ok(claimed)
    }

    fn claim_waiting_url(
        &mut self,
        task_id: i64,
        url: &str,
        depth: u32,
        repetition: u32,
    ) -> StorageResult<Option<UrlRecord>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<i64> = tx
            .query_row(
                "SELECT id FROM urls WHERE task_id = ?1 AND url = ?2 AND depth = ?3
                 AND repetition = ?4 AND state = ?5 ORDER BY id LIMIT 1",
                params![
                    task_id,
                    url,
                    depth,
                    repetition,
                    UrlState::Waiting.to_db_string()
                ],
                |row| row.get(0),
            )
            .optional()?;

        let claimed = match candidate {
            Some(id) => Self::mark_url_progress(&tx, id, UrlState::Waiting)?,
            None => None,
        };
        tx.commit()?;
        Ok(claimed)
    }

    fn complete_url(
        &mut self,
        url_id: i64,
        code: i32,
        final_url: Option<&str>,
    ) -> StorageResult<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE urls SET state = ?1, code = ?2, final_url = ?3, visited_at = ?4
             WHERE id = ?5 AND state != ?1",
            params![
                UrlState::Complete.to_db_string(),
                code,
                final_url,
                now,
                url_id
            ],
        )?;
        Ok(changed == 1)
    }

    fn fail_interrupted_urls(
        &mut self,
        task_id: i64,
        current_url_id: Option<i64>,
        code: i32,
    ) -> StorageResult<usize> {
        let now = Utc::now().to_rfc3339();
        let complete = UrlState::Complete.to_db_string();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut changed = 0;

        if let Some(current_id) = current_url_id {
            let current: Option<(String, u32)> = tx
                .query_row(
                    "SELECT url, depth FROM urls WHERE id = ?1 AND task_id = ?2",
                    params![current_id, task_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((url, depth)) = current {
                changed += tx.execute(
                    "UPDATE urls SET state = ?1, code = ?2, visited_at = ?3
                     WHERE id = ?4 AND state != ?1",
                    params![complete, code, now, current_id],
                )?;
                changed += tx.execute(
                    "UPDATE urls SET state = ?1, code = ?2, visited_at = ?3
                     WHERE task_id = ?4 AND url = ?5 AND depth = ?6 AND state = ?7",
                    params![
                        complete,
                        code,
                        now,
                        task_id,
                        url,
                        depth,
                        UrlState::Waiting.to_db_string()
                    ],
                )?;
            }
        }

        changed += tx.execute(
            "UPDATE urls SET state = ?1, code = ?2, visited_at = ?3
             WHERE task_id = ?4 AND state = ?5",
            params![
                complete,
                code,
                now,
                task_id,
                UrlState::Progress.to_db_string()
            ],
        )?;

        tx.commit()?;
        Ok(changed)
    }

    fn release_claimed_urls(&mut self, task_id: i64) -> StorageResult<usize> {
        let changed = self.conn.execute(
            "UPDATE urls SET state = CASE WHEN repetition = 1 THEN ?1 ELSE ?2 END
             WHERE task_id = ?3 AND state = ?4",
            params![
                UrlState::Free.to_db_string(),
                UrlState::Waiting.to_db_string(),
                task_id,
                UrlState::Progress.to_db_string()
            ],
        )?;
        Ok(changed)
    }

    fn count_urls_by_state(&self, task_id: i64, state: UrlState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM urls WHERE task_id = ?1 AND state = ?2",
            params![task_id, state.to_db_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_discovered_urls(&self, task_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM urls
             WHERE task_id = ?1 AND repetition = 1 AND from_url_id IS NOT NULL",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn seen_urls(&self, task_id: i64) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM urls WHERE task_id = ?1 AND repetition = 1")?;
        let urls = stmt
            .query_map(params![task_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    // ===== Statistics =====

    fn count_all_urls_by_state(&self, job: Option<&str>, state: UrlState) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM urls u JOIN tasks t ON u.task_id = t.id
             WHERE u.state = ?1 AND (?2 IS NULL OR t.job = ?2)",
            params![state.to_db_string(), job],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn count_sites(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sites", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn result_code_histogram(&self, job: Option<&str>) -> StorageResult<Vec<(i32, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.code, COUNT(*) FROM urls u JOIN tasks t ON u.task_id = t.id
             WHERE u.code IS NOT NULL AND (?1 IS NULL OR t.job = ?1)
             GROUP BY u.code ORDER BY u.code",
        )?;
        let rows = stmt
            .query_map(params![job], |row| {
                Ok((row.get(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
