//! Module hook pipeline
//!
//! Modules observe and influence the crawl without the state machine knowing
//! what they do. A module may implement any of three hooks:
//!
//! - `before_navigate`: runs before a URL is opened
//! - `after_response`: runs after each successful navigation, with the
//!   cumulative response list for that URL
//! - `link_filter`: contributes a predicate every discovered link must pass
//!
//! Hooks return [`HookError`] instead of unwinding; the state machine decides
//! whether a failure is recorded and skipped or aborts the task.

mod links;
mod pipeline;
mod recorder;

pub use links::{extract_links, CollectorState, LinkCollector};
pub use pipeline::{HookFailure, Pipeline, PipelineBuilder};
pub use recorder::ResultRecorder;

pub use crate::state::ModuleStates;

use crate::browser::{Browser, BrowserError, PageResponse};
use crate::config::Config;
use crate::crawler::Frontier;
use crate::state::ProgressError;
use crate::storage::{SiteRecord, StorageError, TaskRecord, UrlRecord};
use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Errors a hook can return
#[derive(Debug, Error)]
pub enum HookError {
    /// The URL is marked with the pipeline-failure code and the crawl moves on
    #[error("{0}")]
    Recoverable(String),

    /// The URL is marked with the worker-failure code and the task is aborted
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// Propagated out of the worker; the store can no longer be trusted
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Handle passed to every hook invocation
///
/// Gives a module the task and URL being processed, the task's frontier, the
/// browser, and the module checkpoint map that is persisted with the task's
/// progress blob.
pub struct CrawlContext<'a> {
    pub task: &'a TaskRecord,
    pub site: &'a SiteRecord,
    pub url: &'a UrlRecord,
    pub frontier: &'a mut Frontier,
    pub browser: &'a mut dyn Browser,
    pub states: &'a mut ModuleStates,
    pub filters: &'a LinkFilters,
    pub config: &'a Config,
}

/// A link found on a page, before it is admitted to the frontier
#[derive(Debug, Clone)]
pub struct DiscoveredLink {
    pub url: Url,
    /// The page the link was found on
    pub source: Url,
    pub depth: u32,
}

/// Link admission predicate contributed by a module
pub type LinkFilter = Box<dyn Fn(&DiscoveredLink) -> bool + Send + Sync>;

/// All admission predicates of a pipeline, collected once per task
#[derive(Default)]
pub struct LinkFilters {
    filters: Vec<LinkFilter>,
}

impl LinkFilters {
    pub fn new(filters: Vec<LinkFilter>) -> Self {
        Self { filters }
    }

    /// A link is admitted only if no predicate rejects it
    pub fn admits(&self, link: &DiscoveredLink) -> bool {
        self.filters.iter().all(|filter| filter(link))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// A pluggable crawl extension
///
/// Every hook has a no-op default, so a module implements only what it needs.
#[async_trait]
pub trait Module: Send {
    /// Unique name; also the module's key in the checkpoint map
    fn name(&self) -> &str;

    async fn before_navigate(&mut self, _ctx: &mut CrawlContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after a navigation that returned a status below 400
    ///
    /// `responses` holds every response observed for this URL so far; a
    /// module that navigates again appends its own response for the modules
    /// after it.
    async fn after_response(
        &mut self,
        _ctx: &mut CrawlContext<'_>,
        _responses: &mut Vec<PageResponse>,
        _final_url: &str,
        _repetition: u32,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Admission predicate for links discovered during this task
    fn link_filter(&self, _site: &SiteRecord, _config: &Config) -> Option<LinkFilter> {
        None
    }
}
