//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the shared Meander store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per registrable domain, shared by every task and URL on it
CREATE TABLE IF NOT EXISTS sites (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL UNIQUE,
    rank INTEGER,
    category TEXT,
    created_at TEXT NOT NULL
);

-- One crawl job instance against one site
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job TEXT NOT NULL,
    crawler_id INTEGER,
    site_id INTEGER NOT NULL REFERENCES sites(id),
    landing_url_id INTEGER REFERENCES urls(id),
    state TEXT NOT NULL,
    code INTEGER,
    error TEXT,
    progress TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    UNIQUE(job, site_id)
);

CREATE INDEX IF NOT EXISTS idx_tasks_claim ON tasks(job, state, crawler_id);

-- One crawl target occurrence (one repetition of one URL)
CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    site_id INTEGER NOT NULL REFERENCES sites(id),
    url TEXT NOT NULL,
    final_url TEXT,
    scheme TEXT NOT NULL,
    from_url_id INTEGER REFERENCES urls(id),
    depth INTEGER NOT NULL,
    repetition INTEGER NOT NULL,
    code INTEGER,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    visited_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_urls_claim ON urls(task_id, state, depth);
CREATE INDEX IF NOT EXISTS idx_urls_repetition ON urls(task_id, url, depth, repetition);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
