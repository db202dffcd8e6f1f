//! Worker process loop for one (job, crawler-id) pair

use crate::browser::Browser;
use crate::config::Config;
use crate::crawler::{AbortReason, CrawlMachine, TaskOutcome};
use crate::modules::Pipeline;
use crate::storage::SharedStorage;
use crate::Result;
use std::sync::Arc;

/// Totals for one worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Tasks that ran to exhaustion
    pub finished: u64,
    /// Tasks that stopped early with their progress blob kept
    pub aborted: u64,
    /// Aborted tasks moved back to `progress` at startup
    pub reopened: usize,
    /// URLs processed across all tasks
    pub processed: u64,
}

/// Claims tasks of one job and crawls them one after another
///
/// A worker owns one browser and one store connection. Tasks are processed
/// serially; parallelism comes from running several workers.
pub struct Worker {
    job: String,
    crawler_id: u32,
    config: Arc<Config>,
    config_hash: Option<String>,
    storage: SharedStorage,
    browser: Box<dyn Browser>,
    pipeline: Pipeline,
}

impl Worker {
    pub fn new(
        job: impl Into<String>,
        crawler_id: u32,
        config: Arc<Config>,
        storage: SharedStorage,
        browser: Box<dyn Browser>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            job: job.into(),
            crawler_id,
            config,
            config_hash: None,
            storage,
            browser,
            pipeline,
        }
    }

    /// Stamps progress blobs with this hash so config drift shows on resume
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn crawler_id(&self) -> u32 {
        self.crawler_id
    }

    /// Runs until the job has nothing left for this crawler
    ///
    /// A browser abort stops the worker, since the next task would hit the
    /// same broken browser. A module abort only stops the affected task.
    /// Store errors are returned immediately.
    pub async fn run(&mut self) -> Result<WorkerSummary> {
        let job = self.job.clone();
        let crawler_id = self.crawler_id;
        let mut summary = WorkerSummary::default();

        summary.reopened = self
            .storage
            .with(|s| s.reopen_aborted_tasks(&job, crawler_id))?;
        if summary.reopened > 0 {
            tracing::info!(job = %job, crawler_id, reopened = summary.reopened, "Reopened aborted tasks");
        }

        tracing::info!(
            job = %job,
            crawler_id,
            modules = ?self.pipeline.names(),
            "Worker started"
        );

        loop {
            let claimed = match self.storage.with(|s| s.claim_task(&job, crawler_id)) {
                Ok(claimed) => claimed,
                Err(e) => {
                    tracing::error!(job = %job, crawler_id, "Task claim failed: {}", e);
                    return Err(e.into());
                }
            };
            let Some(task) = claimed else {
                break;
            };
            let task_id = task.id;

            let machine = CrawlMachine::new(
                &self.config,
                self.config_hash.clone(),
                self.storage.clone(),
                self.browser.as_mut(),
                &mut self.pipeline,
                task,
            )?;

            let outcome = match machine.run().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(job = %job, crawler_id, task_id, "Worker stopped: {}", e);
                    return Err(e);
                }
            };

            match outcome {
                TaskOutcome::Finished { processed } => {
                    summary.finished += 1;
                    summary.processed += processed;
                }
                TaskOutcome::Aborted { reason } => {
                    summary.aborted += 1;
                    if let AbortReason::Browser(_) = reason {
                        tracing::warn!(job = %job, crawler_id, task_id, "Browser unusable, stopping worker");
                        break;
                    }
                }
            }
        }

        tracing::info!(
            job = %job,
            crawler_id,
            finished = summary.finished,
            aborted = summary.aborted,
            processed = summary.processed,
            "Worker finished"
        );
        Ok(summary)
    }
}
