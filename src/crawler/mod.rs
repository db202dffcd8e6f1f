//! Crawl orchestration
//!
//! This module contains the core crawling logic:
//! - `Frontier`: URL selection, deduplication and insertion for one task
//! - `CrawlMachine`: the per-task state machine with checkpoint and resume
//! - `Worker`: the task-claiming loop of one (job, crawler-id) pair
//! - Seeding of jobs from a seed list

mod frontier;
mod machine;
mod seed;
mod worker;

pub use frontier::Frontier;
pub use machine::{AbortReason, CrawlMachine, MachineState, TaskOutcome};
pub use seed::{load_seed_file, seed_job, SeedEntry, SeedSummary};
pub use worker::{Worker, WorkerSummary};
