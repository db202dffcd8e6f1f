//! Job seeding
//!
//! Turns a seed list into sites, one task per (job, site) and a depth-0
//! landing URL per task. Seeding is idempotent: running it twice for the same
//! job creates nothing new.

use crate::config::CrawlerConfig;
use crate::crawler::Frontier;
use crate::storage::SharedStorage;
use crate::url::{normalize_url, registrable_domain};
use crate::{MeanderError, Result};
use std::path::Path;

/// One line of a seed list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedEntry {
    pub url: String,
    pub rank: Option<i64>,
    pub category: Option<String>,
}

impl SeedEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            rank: None,
            category: None,
        }
    }
}

/// What a seeding pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub tasks_created: usize,
    /// Seeds whose (job, site) task already existed
    pub tasks_existing: usize,
    /// Seeds that did not parse or have no registrable domain
    pub skipped: usize,
}

/// Reads a seed list: one `url[,rank[,category]]` per line
///
/// Blank lines and lines starting with `#` are ignored.
pub fn load_seed_file(path: &Path) -> Result<Vec<SeedEntry>> {
    let content = std::fs::read_to_string(path)?;
    parse_seed_list(&content)
}

fn parse_seed_list(content: &str) -> Result<Vec<SeedEntry>> {
    let mut entries = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.splitn(3, ',').map(str::trim);
        let url = fields.next().unwrap_or_default().to_string();
        let rank = match fields.next().filter(|f| !f.is_empty()) {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                MeanderError::Seed(format!("line {}: invalid rank '{}'", index + 1, raw))
            })?),
            None => None,
        };
        let category = fields
            .next()
            .filter(|f| !f.is_empty())
            .map(str::to_string);

        entries.push(SeedEntry {
            url,
            rank,
            category,
        });
    }

    Ok(entries)
}

/// Creates the tasks of `job` for a seed list
pub fn seed_job(
    storage: &SharedStorage,
    job: &str,
    entries: &[SeedEntry],
    config: &CrawlerConfig,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for entry in entries {
        let normalized = match normalize_url(&entry.url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(url = %entry.url, "Skipping seed: {}", e);
                summary.skipped += 1;
                continue;
            }
        };
        let domain = match registrable_domain(&normalized) {
            Ok(domain) => domain,
            Err(e) => {
                tracing::warn!(url = %entry.url, "Skipping seed: {}", e);
                summary.skipped += 1;
                continue;
            }
        };

        let (task_id, created, landing) = storage.with(|s| {
            let site_id = s.get_or_create_site(&domain)?;
            s.update_site_metadata(site_id, entry.rank, entry.category.as_deref())?;
            let (task_id, created) = s.get_or_create_task(job, site_id)?;
            let landing = s.get_task(task_id)?.landing_url_id;
            Ok((task_id, created, landing))
        })?;

        let mut frontier = Frontier::new(storage.clone(), task_id, config);

        if landing.is_none() {
            if let Some(url_id) = frontier.insert(normalized.as_str(), 0, None, true)? {
                storage.with(|s| s.set_landing_url(task_id, url_id))?;
            }
        } else {
            // Another seed of the same site joins the existing task at depth 0
            frontier.sync_from_store()?;
            frontier.insert(normalized.as_str(), 0, None, false)?;
        }

        if created {
            summary.tasks_created += 1;
            tracing::debug!(job, task_id, site = %domain, "Task created");
        } else {
            summary.tasks_existing += 1;
        }
    }

    tracing::info!(
        job,
        created = summary.tasks_created,
        existing = summary.tasks_existing,
        skipped = summary.skipped,
        "Job seeded"
    );
    Ok(summary)
}
