//! Statistics generation from the crawl store
//!
//! This module provides functionality for extracting and displaying
//! crawl statistics from the storage layer.

use crate::state::{
    TaskState, UrlState, RESULT_BROWSER_ERROR, RESULT_PIPELINE_ERROR, RESULT_WORKER_ERROR,
};
use crate::storage::{Storage, StorageResult};
use std::collections::HashMap;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    /// Job the statistics are restricted to; `None` covers every job
    pub job: Option<String>,

    /// Count of tasks by state
    pub tasks_by_state: HashMap<TaskState, u64>,

    /// Count of URL rows by state
    pub urls_by_state: HashMap<UrlState, u64>,

    /// Number of sites in the store (not restricted by job)
    pub sites: u64,

    /// Completed URL rows per result code, ordered by code
    pub result_codes: Vec<(i32, u64)>,
}

impl CrawlStatistics {
    pub fn total_tasks(&self) -> u64 {
        self.tasks_by_state.values().sum()
    }

    pub fn total_urls(&self) -> u64 {
        self.urls_by_state.values().sum()
    }

    /// Completed URLs whose result is an HTTP status below 400
    pub fn successful_urls(&self) -> u64 {
        self.result_codes
            .iter()
            .filter(|(code, _)| (0..400).contains(code))
            .map(|(_, count)| count)
            .sum()
    }
}

/// Loads statistics from storage, optionally for one job
pub fn load_statistics(storage: &dyn Storage, job: Option<&str>) -> StorageResult<CrawlStatistics> {
    let mut tasks_by_state = HashMap::new();
    for state in TaskState::all_states() {
        let count = storage.count_tasks_by_state(job, state)?;
        if count > 0 {
            tasks_by_state.insert(state, count);
        }
    }

    let mut urls_by_state = HashMap::new();
    for state in UrlState::all_states() {
        let count = storage.count_all_urls_by_state(job, state)?;
        if count > 0 {
            urls_by_state.insert(state, count);
        }
    }

    Ok(CrawlStatistics {
        job: job.map(str::to_string),
        tasks_by_state,
        urls_by_state,
        sites: storage.count_sites()?,
        result_codes: storage.result_code_histogram(job)?,
    })
}

fn describe_code(code: i32) -> String {
    match code {
        RESULT_BROWSER_ERROR => "browser error".to_string(),
        RESULT_PIPELINE_ERROR => "pipeline error".to_string(),
        RESULT_WORKER_ERROR => "worker error".to_string(),
        _ => format!("HTTP {}", code),
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    if let Some(job) = &stats.job {
        println!("  Job: {}", job);
    }
    println!("  Sites: {}", stats.sites);
    println!("  Tasks: {}", stats.total_tasks());
    println!("  URL rows: {}", stats.total_urls());
    println!();

    println!("Tasks by State:");
    for state in TaskState::all_states() {
        if let Some(count) = stats.tasks_by_state.get(&state) {
            println!("  {}: {}", state, count);
        }
    }
    println!();

    println!("URLs by State:");
    let total = stats.total_urls();
    for state in UrlState::all_states() {
        if let Some(count) = stats.urls_by_state.get(&state) {
            let percentage = if total > 0 {
                (*count as f64 / total as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", state, count, percentage);
        }
    }
    println!();

    if !stats.result_codes.is_empty() {
        println!("Result Codes:");
        for (code, count) in &stats.result_codes {
            println!("  {:>4} {:<15} {}", code, describe_code(*code), count);
        }
        println!();
    }

    let complete = stats
        .urls_by_state
        .get(&UrlState::Complete)
        .copied()
        .unwrap_or(0);
    let success_rate = if complete > 0 {
        (stats.successful_urls() as f64 / complete as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} completed URLs)",
        success_rate,
        stats.successful_urls(),
        complete
    );
}
