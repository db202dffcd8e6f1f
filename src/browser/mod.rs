//! Browser collaborator interface
//!
//! The crawl state machine never opens pages itself. It drives an
//! implementation of [`Browser`] and treats every failure it raises as a
//! coded result rather than a crash.
//!
//! # Components
//!
//! - `Browser`: context lifecycle, navigation and page accessors
//! - `PageResponse`: what one navigation produced
//! - `StorageState`: cookies carried from one context into the next
//! - `HttpBrowser`: the bundled implementation built on `reqwest`

mod http;

pub use http::HttpBrowser;

use crate::config::WaitUntil;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a browser collaborator
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Navigation to {url} timed out")]
    Timeout { url: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("No browser context is open")]
    NotOpen,

    #[error("Failed to start browser context: {0}")]
    Launch(String),

    #[error("Browser operation failed: {0}")]
    Other(String),
}

/// One response observed for a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResponse {
    /// URL that was requested
    pub url: String,

    /// URL after redirects
    pub final_url: String,

    pub status: u16,

    pub content_type: Option<String>,
}

impl PageResponse {
    /// Status codes below 400 count as a successful navigation
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// A cookie captured from a context, with the URL that set it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub url: String,

    /// Full `Set-Cookie` value, attributes included
    pub cookie: String,
}

/// Opaque cookie/storage snapshot of a browser context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageState {
    pub cookies: Vec<StoredCookie>,
}

impl StorageState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// A browser engine driven by the crawl state machine
#[async_trait]
pub trait Browser: Send {
    /// Opens a fresh context, replacing any open one, optionally seeded with storage state
    async fn new_context(&mut self, state: Option<StorageState>) -> Result<(), BrowserError>;

    /// Navigates the current page and waits for the given load event
    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        wait_until: WaitUntil,
    ) -> Result<PageResponse, BrowserError>;

    /// Explicit post-load wait
    async fn wait(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// HTML of the current page, if it has any
    fn content(&self) -> Option<&str>;

    /// URL of the current page
    fn current_url(&self) -> Option<&str>;

    /// Captures the cookies of the current context
    async fn storage_state(&mut self) -> Result<StorageState, BrowserError>;

    /// PNG screenshot of the current page; `None` when unsupported
    async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, BrowserError> {
        Ok(None)
    }

    /// Closes the current context
    async fn close(&mut self) -> Result<(), BrowserError>;

    fn is_open(&self) -> bool;
}
