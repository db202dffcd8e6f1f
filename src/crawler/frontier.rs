//! Store-backed frontier for one task
//!
//! The frontier decides which URL of a task is crawled next and whether a
//! discovered URL is new. Claims go straight to the shared store so two
//! workers can never hold the same row; deduplication uses an in-memory
//! seen-set that is checkpointed with the task's progress blob.

use crate::config::{CrawlerConfig, FrontierPolicy};
use crate::state::UrlState;
use crate::storage::{NewUrl, SharedStorage, StorageResult, UrlRecord};
use crate::url::{normalize_url, registrable_domain, slash_variants};
use std::collections::{BTreeSet, HashSet};

/// Claim, dedup and insert operations over the URL rows of one task
#[derive(Debug)]
pub struct Frontier {
    storage: SharedStorage,
    task_id: i64,
    policy: FrontierPolicy,
    repetitions: u32,
    seen: HashSet<String>,
}

impl Frontier {
    /// Creates a frontier with an empty seen-set
    pub fn new(storage: SharedStorage, task_id: i64, config: &CrawlerConfig) -> Self {
        Self {
            storage,
            task_id,
            policy: config.frontier_policy,
            repetitions: config.repetitions.max(1),
            seen: HashSet::new(),
        }
    }

    pub fn task_id(&self) -> i64 {
        self.task_id
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Restores a seen-set snapshot taken from a progress blob
    pub fn restore<I>(&mut self, snapshot: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.seen.extend(snapshot);
    }

    /// Adds every repetition-1 URL already stored for the task to the seen-set
    pub fn sync_from_store(&mut self) -> StorageResult<usize> {
        let urls = self.storage.with(|s| s.seen_urls(self.task_id))?;
        let count = urls.len();
        for url in urls {
            self.mark_seen(&url);
        }
        Ok(count)
    }

    /// Claims the next `free` repetition-1 URL, or `None` when the task is exhausted
    pub fn claim_next(&mut self, current_depth: u32) -> StorageResult<Option<UrlRecord>> {
        let claimed = self
            .storage
            .with(|s| s.claim_free_url(self.task_id, self.policy, current_depth))?;
        if let Some(url) = &claimed {
            tracing::debug!(
                task_id = self.task_id,
                url_id = url.id,
                depth = url.depth,
                url = %url.url,
                "Claimed URL"
            );
        }
        Ok(claimed)
    }

    /// Claims repetition `repetition` (> 1) of an exact URL string and depth
    pub fn claim_repetition(
        &mut self,
        url: &str,
        depth: u32,
        repetition: u32,
    ) -> StorageResult<Option<UrlRecord>> {
        self.storage
            .with(|s| s.claim_waiting_url(self.task_id, url, depth, repetition))
    }

    /// True if the URL, or its trailing-slash variant, has been seen
    pub fn seen(&self, url: &str) -> bool {
        let (bare, _) = slash_variants(url);
        if self.seen.contains(&bare) {
            return true;
        }
        match normalize_url(url) {
            Ok(normalized) => self.seen.contains(&slash_variants(normalized.as_str()).0),
            Err(_) => false,
        }
    }

    /// Adds both trailing-slash variants of `url` to the seen-set
    pub fn mark_seen(&mut self, url: &str) {
        let (bare, slashed) = slash_variants(url);
        self.seen.insert(bare);
        self.seen.insert(slashed);
    }

    /// Inserts a URL into the task
    ///
    /// Unless `force` is set, a URL already seen is dropped. URLs that do not
    /// normalize or have no registrable domain are dropped silently. Returns
    /// the id of the new repetition-1 row.
    pub fn insert(
        &mut self,
        url: &str,
        depth: u32,
        from_url_id: Option<i64>,
        force: bool,
    ) -> StorageResult<Option<i64>> {
        if !force && self.seen(url) {
            return Ok(None);
        }
        self.mark_seen(url);

        let normalized = match normalize_url(url) {
            Ok(normalized) => normalized,
            Err(e) => {
                tracing::debug!(url, "Dropping URL: {}", e);
                return Ok(None);
            }
        };
        self.mark_seen(normalized.as_str());

        let domain = match registrable_domain(&normalized) {
            Ok(domain) => domain,
            Err(e) => {
                tracing::debug!(url, "Dropping URL: {}", e);
                return Ok(None);
            }
        };

        let repetitions = self.repetitions;
        let task_id = self.task_id;
        let id = self.storage.with(|s| {
            let site_id = s.get_or_create_site(&domain)?;
            s.insert_url(
                &NewUrl {
                    task_id,
                    site_id,
                    url: normalized.to_string(),
                    scheme: normalized.scheme().to_string(),
                    from_url_id,
                    depth,
                },
                repetitions,
            )
        })?;

        tracing::trace!(task_id, url_id = id, depth, url = %normalized, "Inserted URL");
        Ok(Some(id))
    }

    /// Records a URL row's result; false if it was already complete
    pub fn complete(
        &mut self,
        url_id: i64,
        code: i32,
        final_url: Option<&str>,
    ) -> StorageResult<bool> {
        self.storage
            .with(|s| s.complete_url(url_id, code, final_url))
    }

    pub fn count_by_state(&self, state: UrlState) -> StorageResult<u64> {
        self.storage
            .with(|s| s.count_urls_by_state(self.task_id, state))
    }

    /// Copy of the seen-set for checkpointing
    pub fn seen_snapshot(&self) -> BTreeSet<String> {
        self.seen.iter().cloned().collect()
    }

    /// Number of entries in the seen-set
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
