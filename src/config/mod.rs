//! Configuration module for Meander
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use meander::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("meander.toml")).unwrap();
//! println!("Repetitions per URL: {}", config.crawler.repetitions);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, CrawlerConfig, FilterConfig, FrontierPolicy, LinkScope, ModulesConfig,
    OutputConfig, StoreConfig, WaitUntil,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{validate, validate_domain_pattern};
