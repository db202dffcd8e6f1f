//! Meander: a distributed crawl orchestration engine
//!
//! Many independent workers claim crawl targets from a shared SQLite frontier,
//! drive a browser collaborator to render each page, run an ordered module
//! pipeline over the responses, and checkpoint their progress into the task
//! row so a crashed worker resumes where it stopped.

pub mod browser;
pub mod config;
pub mod crawler;
pub mod modules;
pub mod output;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Meander operations
#[derive(Debug, Error)]
pub enum MeanderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Progress state error: {0}")]
    Progress(#[from] state::ProgressError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Seed error: {0}")]
    Seed(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Missing host in URL")]
    MissingHost,

    #[error("No registrable domain for host: {0}")]
    NoRegistrableDomain(String),
}

/// Result type alias for Meander operations
pub type Result<T> = std::result::Result<T, MeanderError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlMachine, Frontier, TaskOutcome, Worker};
pub use modules::{Module, Pipeline};
pub use state::{ProgressState, TaskState, UrlState};
pub use storage::{SharedStorage, SqliteStorage, Storage};
