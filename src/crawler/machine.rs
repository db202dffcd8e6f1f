//! Per-task crawl state machine
//!
//! A `CrawlMachine` owns one task for the duration of one run. It restores or
//! creates the task's progress state, then repeatedly claims a URL,
//! checkpoints, runs the module pipeline around each navigation and records
//! the result, until the frontier is exhausted or the task has to be aborted.
//!
//! # Checkpoint protocol
//!
//! The progress blob is written with `initial = false` right after a URL is
//! claimed and before the browser touches it. A blob found with
//! `initial = false` therefore means the previous run died with that URL's
//! result unconfirmed; the URL (and its remaining repetitions) is forced to
//! `complete` with the browser-error code before anything else is claimed, so
//! a page that reliably kills the browser cannot loop forever.

use crate::browser::{Browser, BrowserError, PageResponse};
use crate::config::Config;
use crate::crawler::Frontier;
use crate::modules::{CrawlContext, HookError, LinkFilters, Pipeline};
use crate::state::{
    ProgressState, TaskState, RESULT_BROWSER_ERROR, RESULT_PIPELINE_ERROR, RESULT_WORKER_ERROR,
};
use crate::storage::{SharedStorage, SiteRecord, TaskRecord, UrlRecord};
use crate::Result;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Lifecycle of a crawl machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Uninitialized,
    /// No usable progress blob; starting the task from its stored rows
    Starting,
    /// Restoring from a progress blob
    Resuming,
    Running,
    Checkpointing,
    Closing,
    Finished,
    Aborted,
}

/// Why a task was aborted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// The browser context could not be (re)started
    Browser(String),
    /// A module failed before navigation or returned a fatal error
    Module(String),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Browser(msg) => write!(f, "browser failure: {}", msg),
            Self::Module(msg) => write!(f, "module failure: {}", msg),
        }
    }
}

/// How a task run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The frontier is exhausted; `processed` counts URLs handled in this run
    Finished { processed: u64 },
    /// The task stopped early; its progress blob is kept for a later resume
    Aborted { reason: AbortReason },
}

enum Step {
    Continue,
    Abort(AbortReason),
}

/// Drives one task through claim, navigate, dispatch and checkpoint
pub struct CrawlMachine<'w> {
    config: &'w Config,
    config_hash: Option<String>,
    storage: SharedStorage,
    browser: &'w mut dyn Browser,
    pipeline: &'w mut Pipeline,
    task: TaskRecord,
    site: SiteRecord,
    frontier: Frontier,
    filters: LinkFilters,
    progress: ProgressState,
    state: MachineState,
    /// URL ids crawled in the currently open browser context
    lineage: HashSet<i64>,
    since_restart: u32,
    processed: u64,
}

impl<'w> CrawlMachine<'w> {
    /// Prepares a machine for a claimed task
    ///
    /// Link admission filters are collected from the pipeline here, once per task.
    pub fn new(
        config: &'w Config,
        config_hash: Option<String>,
        storage: SharedStorage,
        browser: &'w mut dyn Browser,
        pipeline: &'w mut Pipeline,
        task: TaskRecord,
    ) -> Result<Self> {
        let site = storage.with(|s| s.get_site(task.site_id))?;
        let frontier = Frontier::new(storage.clone(), task.id, &config.crawler);
        let filters = pipeline.link_filters(&site, config);
        let progress = ProgressState::fresh(config_hash.clone());

        Ok(Self {
            config,
            config_hash,
            storage,
            browser,
            pipeline,
            task,
            site,
            frontier,
            filters,
            progress,
            state: MachineState::Uninitialized,
            lineage: HashSet::new(),
            since_restart: 0,
            processed: 0,
        })
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn task(&self) -> &TaskRecord {
        &self.task
    }

    /// Runs the task until the frontier is exhausted or the task aborts
    ///
    /// Navigation and module failures are recorded on the URL rows and never
    /// surface here. Store failures are returned as errors.
    pub async fn run(mut self) -> Result<TaskOutcome> {
        self.initialize()?;
        self.transition(MachineState::Running);

        loop {
            let Some(url) = self.next_url()? else {
                break;
            };

            let opened = if self.restart_due() {
                self.restart_browser().await
            } else {
                Ok(())
            };
            let opened = match opened {
                Ok(()) => self.prepare_context(&url).await,
                Err(e) => Err(e),
            };

            if let Err(e) = opened {
                self.frontier.complete(url.id, RESULT_BROWSER_ERROR, None)?;
                self.stamp_task(RESULT_BROWSER_ERROR, Some(&e.to_string()))?;
                return self.abort(AbortReason::Browser(e.to_string())).await;
            }

            match self.process_url(&url).await? {
                Step::Continue => {}
                Step::Abort(reason) => return self.abort(reason).await,
            }
        }

        self.finish().await
    }

    fn transition(&mut self, next: MachineState) {
        tracing::trace!(task_id = self.task.id, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    /// Restores the progress blob, or starts fresh, and heals unconfirmed URLs
    fn initialize(&mut self) -> Result<()> {
        let task_id = self.task.id;

        match self.task.progress.clone() {
            None => {
                self.transition(MachineState::Starting);
                let released = self.storage.with(|s| s.release_claimed_urls(task_id))?;
                if released > 0 {
                    tracing::info!(task_id, released, "Released URLs claimed before the first checkpoint");
                }
            }
            Some(blob) => {
                self.transition(MachineState::Resuming);
                match ProgressState::decode(&blob) {
                    Ok(saved) => {
                        if saved.config_hash.is_some() && saved.config_hash != self.config_hash {
                            tracing::warn!(
                                task_id,
                                "Resuming a task started with a different configuration"
                            );
                        }

                        if saved.initial {
                            self.storage.with(|s| s.release_claimed_urls(task_id))?;
                        } else {
                            let failed = self.storage.with(|s| {
                                s.fail_interrupted_urls(
                                    task_id,
                                    saved.current_url_id,
                                    RESULT_BROWSER_ERROR,
                                )
                            })?;
                            tracing::warn!(
                                task_id,
                                url_id = ?saved.current_url_id,
                                failed,
                                "Previous run stopped mid-URL; marked unconfirmed URLs as browser errors"
                            );
                        }

                        self.frontier.restore(saved.seen_set.iter().cloned());
                        self.progress = saved;
                        self.progress.initial = true;
                        self.progress.config_hash = self.config_hash.clone();
                    }
                    Err(e) => {
                        tracing::warn!(task_id, "Discarding unreadable progress blob: {}", e);
                        self.storage.with(|s| {
                            s.fail_interrupted_urls(task_id, None, RESULT_BROWSER_ERROR)
                        })?;
                    }
                }
            }
        }

        // Rows inserted after the last checkpoint are not in the snapshot
        self.frontier.sync_from_store()?;
        self.checkpoint()?;

        tracing::info!(
            task_id,
            site = %self.site.domain,
            resumed = self.task.progress.is_some(),
            seen = self.frontier.len(),
            "Task started"
        );
        Ok(())
    }

    /// Persists the in-memory crawl state into the task row
    fn checkpoint(&mut self) -> Result<()> {
        let previous = self.state;
        self.transition(MachineState::Checkpointing);

        self.progress.seen_set = self.frontier.seen_snapshot();
        let blob = self.progress.encode()?;
        let task_id = self.task.id;
        self.storage.with(|s| s.save_progress(task_id, &blob))?;

        self.transition(previous);
        Ok(())
    }

    /// Claims the next URL and checkpoints the claim before it is visited
    fn next_url(&mut self) -> Result<Option<UrlRecord>> {
        let Some(url) = self.frontier.claim_next(self.progress.current_depth)? else {
            return Ok(None);
        };

        self.progress.initial = false;
        self.progress.current_url_id = Some(url.id);
        self.progress.current_depth = url.depth;
        self.checkpoint()?;

        Ok(Some(url))
    }

    /// Reuses the open context for a link discovered in it, otherwise opens a fresh one
    async fn prepare_context(&mut self, url: &UrlRecord) -> std::result::Result<(), BrowserError> {
        let reuse = self.config.crawler.same_context
            && self.browser.is_open()
            && url
                .from_url_id
                .map_or(false, |from| self.lineage.contains(&from));

        if !reuse {
            self.lineage.clear();
            self.browser.new_context(None).await?;
            self.since_restart = 0;
        }

        self.lineage.insert(url.id);
        Ok(())
    }

    fn restart_due(&self) -> bool {
        let interval = self.config.crawler.restart_interval;
        interval > 0 && self.since_restart >= interval && self.browser.is_open()
    }

    /// Closes and reopens the browser, carrying cookies over in same-context mode
    async fn restart_browser(&mut self) -> std::result::Result<(), BrowserError> {
        let carried = if self.config.crawler.same_context {
            match self.browser.storage_state().await {
                Ok(state) => Some(state),
                Err(e) => {
                    tracing::warn!(task_id = self.task.id, "Could not capture storage state: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = self.browser.close().await {
            tracing::warn!(task_id = self.task.id, "Error closing browser context: {}", e);
        }
        self.browser.new_context(carried).await?;
        self.since_restart = 0;

        tracing::debug!(task_id = self.task.id, "Browser context restarted");
        Ok(())
    }

    /// Runs pre-navigation hooks, then every configured repetition of the URL
    async fn process_url(&mut self, url: &UrlRecord) -> Result<Step> {
        let before = {
            let mut ctx = CrawlContext {
                task: &self.task,
                site: &self.site,
                url,
                frontier: &mut self.frontier,
                browser: &mut *self.browser,
                states: &mut self.progress.modules,
                filters: &self.filters,
                config: self.config,
            };
            self.pipeline.before_navigate(&mut ctx).await
        };

        if let Err(failure) = before {
            let message = failure.to_string();
            tracing::warn!(task_id = self.task.id, url_id = url.id, "Pre-navigation hook failed: {}", message);
            if let HookError::Storage(e) = failure.error {
                return Err(e.into());
            }
            self.frontier.complete(url.id, RESULT_WORKER_ERROR, None)?;
            self.stamp_task(RESULT_WORKER_ERROR, Some(&message))?;
            return Ok(Step::Abort(AbortReason::Module(message)));
        }

        for repetition in 1..=self.config.crawler.repetitions {
            let row = if repetition == 1 {
                url.clone()
            } else {
                match self
                    .frontier
                    .claim_repetition(&url.url, url.depth, repetition)?
                {
                    Some(row) => row,
                    None => {
                        tracing::debug!(
                            task_id = self.task.id,
                            url_id = url.id,
                            repetition,
                            "Repetition not available, skipping"
                        );
                        continue;
                    }
                }
            };

            if let Step::Abort(reason) = self.visit(&row, repetition).await? {
                return Ok(Step::Abort(reason));
            }
        }

        self.since_restart += 1;
        self.processed += 1;
        Ok(Step::Continue)
    }

    /// Navigates one repetition and dispatches the response to the pipeline
    async fn visit(&mut self, row: &UrlRecord, repetition: u32) -> Result<Step> {
        let timeout = Duration::from_millis(self.config.browser.navigation_timeout_ms);
        let wait_until = self.config.browser.wait_until;

        let navigation =
            tokio::time::timeout(timeout, self.browser.navigate(&row.url, timeout, wait_until))
                .await
                .unwrap_or_else(|_| {
                    Err(BrowserError::Timeout {
                        url: row.url.clone(),
                    })
                });

        let response = match navigation {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    task_id = self.task.id,
                    url_id = row.id,
                    repetition,
                    code = RESULT_BROWSER_ERROR,
                    "Navigation failed: {}",
                    e
                );
                self.frontier.complete(row.id, RESULT_BROWSER_ERROR, None)?;
                if repetition == 1 {
                    self.stamp_task(RESULT_BROWSER_ERROR, Some(&e.to_string()))?;
                }
                return Ok(Step::Continue);
            }
        };

        if self.config.browser.wait_after_load_ms > 0 {
            self.browser
                .wait(Duration::from_millis(self.config.browser.wait_after_load_ms))
                .await;
        }

        let code = i32::from(response.status);
        if repetition == 1 {
            self.stamp_task(code, None)?;
            self.save_screenshot(row).await;
        }

        if !response.is_success() {
            tracing::debug!(task_id = self.task.id, url_id = row.id, code, "HTTP error status recorded");
            self.frontier
                .complete(row.id, code, Some(&response.final_url))?;
            return Ok(Step::Continue);
        }

        let final_url = response.final_url.clone();
        let mut responses: Vec<PageResponse> = vec![response];

        let dispatched = {
            let mut ctx = CrawlContext {
                task: &self.task,
                site: &self.site,
                url: row,
                frontier: &mut self.frontier,
                browser: &mut *self.browser,
                states: &mut self.progress.modules,
                filters: &self.filters,
                config: self.config,
            };
            self.pipeline
                .after_response(&mut ctx, &mut responses, &final_url, repetition)
                .await
        };

        let Err(failure) = dispatched else {
            return Ok(Step::Continue);
        };

        let message = failure.to_string();
        tracing::warn!(
            task_id = self.task.id,
            url_id = row.id,
            repetition,
            code = RESULT_PIPELINE_ERROR,
            "Post-navigation hook failed: {}",
            message
        );

        match failure.error {
            HookError::Storage(e) => Err(e.into()),
            HookError::Fatal(_) => {
                self.frontier
                    .complete(row.id, RESULT_WORKER_ERROR, Some(&final_url))?;
                self.stamp_task(RESULT_WORKER_ERROR, Some(&message))?;
                Ok(Step::Abort(AbortReason::Module(message)))
            }
            _ => {
                self.frontier
                    .complete(row.id, RESULT_PIPELINE_ERROR, Some(&final_url))?;
                Ok(Step::Continue)
            }
        }
    }

    fn stamp_task(&mut self, code: i32, error: Option<&str>) -> Result<()> {
        let task_id = self.task.id;
        self.storage
            .with(|s| s.update_task_result(task_id, code, error))?;
        self.task.code = Some(code);
        self.task.error = error.map(str::to_string);
        Ok(())
    }

    /// Writes `<task>-<url>.png` into the screenshot directory; never fatal
    async fn save_screenshot(&mut self, row: &UrlRecord) {
        let Some(dir) = self.config.output.screenshot_dir.as_deref() else {
            return;
        };

        let bytes = match self.browser.screenshot().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(url_id = row.id, "Screenshot failed: {}", e);
                return;
            }
        };

        let path = Path::new(dir).join(format!("{}-{}.png", self.task.id, row.id));
        let written = match tokio::fs::create_dir_all(dir).await {
            Ok(()) => tokio::fs::write(&path, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(path = %path.display(), "Could not write screenshot: {}", e);
        }
    }

    async fn close_browser(&mut self) {
        self.transition(MachineState::Closing);
        if let Err(e) = self.browser.close().await {
            tracing::warn!(task_id = self.task.id, "Error closing browser context: {}", e);
        }
        self.lineage.clear();
    }

    /// Frontier exhausted: clear the progress blob and complete the task
    async fn finish(mut self) -> Result<TaskOutcome> {
        self.close_browser().await;

        let task_id = self.task.id;
        self.storage
            .with(|s| s.finish_task(task_id, TaskState::Complete, None))?;
        self.transition(MachineState::Finished);

        tracing::info!(task_id, processed = self.processed, code = ?self.task.code, "Task finished");
        Ok(TaskOutcome::Finished {
            processed: self.processed,
        })
    }

    /// Stops the task, keeping the progress blob for a later resume
    async fn abort(mut self, reason: AbortReason) -> Result<TaskOutcome> {
        self.close_browser().await;

        self.progress.seen_set = self.frontier.seen_snapshot();
        let blob = self.progress.encode()?;
        let task_id = self.task.id;
        self.storage
            .with(|s| s.finish_task(task_id, TaskState::Aborted, Some(&blob)))?;
        self.transition(MachineState::Aborted);

        tracing::warn!(task_id, %reason, "Task aborted");
        Ok(TaskOutcome::Aborted { reason })
    }
}
