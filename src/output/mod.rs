//! Output module for crawl reporting
//!
//! Summarises the shared store for the `--stats` mode of the binary.

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics};
