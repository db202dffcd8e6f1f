//! Link discovery module
//!
//! Extracts links from the rendered page and feeds the admitted ones to the
//! task's frontier one level deeper than the page they were found on.

use crate::browser::PageResponse;
use crate::config::{Config, LinkScope};
use crate::modules::{CrawlContext, DiscoveredLink, HookError, LinkFilter, Module};
use crate::storage::SiteRecord;
use crate::url::{extract_domain, matches_domain_pattern, registrable_domain, same_origin};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

const NAME: &str = "link-collector";

/// Checkpointed progress of the link collector within one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorState {
    /// URLs this module has inserted into the task's frontier
    pub inserted: u32,
}

/// Built-in module that discovers links on repetition 1 of every page
///
/// Enforces `max-depth` and `max-urls`, and contributes the configured scope
/// and domain-exclusion filter.
#[derive(Debug, Default)]
pub struct LinkCollector;

impl LinkCollector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Module for LinkCollector {
    fn name(&self) -> &str {
        NAME
    }

    async fn after_response(
        &mut self,
        ctx: &mut CrawlContext<'_>,
        _responses: &mut Vec<PageResponse>,
        final_url: &str,
        repetition: u32,
    ) -> Result<(), HookError> {
        if repetition != 1 {
            return Ok(());
        }

        let crawler = &ctx.config.crawler;
        let depth = ctx.url.depth + 1;
        if depth > crawler.max_depth {
            return Ok(());
        }

        let page_url = ctx.browser.current_url().unwrap_or(final_url);
        let Ok(source) = Url::parse(page_url) else {
            return Ok(());
        };
        let Some(html) = ctx.browser.content() else {
            return Ok(());
        };
        let links = extract_links(html, &source);

        let mut state: CollectorState = ctx.states.get(NAME)?.unwrap_or_default();
        if crawler.max_urls > 0 {
            // Rows inserted after the last checkpoint are in the store but not in the blob
            let task_id = ctx.task.id;
            let stored = ctx
                .frontier
                .storage()
                .with(|s| s.count_discovered_urls(task_id))?;
            state.inserted = state.inserted.max(u32::try_from(stored).unwrap_or(u32::MAX));
        }
        let mut admitted = 0usize;

        for url in links {
            if crawler.max_urls > 0 && state.inserted >= crawler.max_urls {
                tracing::debug!(
                    task_id = ctx.task.id,
                    max_urls = crawler.max_urls,
                    "URL limit reached, discovery stopped"
                );
                break;
            }

            let link = DiscoveredLink {
                url,
                source: source.clone(),
                depth,
            };
            if !ctx.filters.admits(&link) {
                continue;
            }
            admitted += 1;

            if ctx
                .frontier
                .insert(link.url.as_str(), depth, Some(ctx.url.id), false)?
                .is_some()
            {
                state.inserted += 1;
            }
        }

        tracing::debug!(
            task_id = ctx.task.id,
            url_id = ctx.url.id,
            admitted,
            total_inserted = state.inserted,
            "Links collected"
        );

        ctx.states.set(NAME, &state)?;
        Ok(())
    }

    fn link_filter(&self, site: &SiteRecord, config: &Config) -> Option<LinkFilter> {
        let scope = config.filters.scope;
        let site_domain = site.domain.clone();
        let excluded = config.filters.exclude_domains.clone();

        Some(Box::new(move |link: &DiscoveredLink| {
            let host = extract_domain(&link.url).unwrap_or_default();
            if excluded
                .iter()
                .any(|pattern| matches_domain_pattern(pattern, &host))
            {
                return false;
            }

            match scope {
                LinkScope::SameSite => registrable_domain(&link.url)
                    .map(|domain| domain == site_domain)
                    .unwrap_or(false),
                LinkScope::SameOrigin => same_origin(&link.url, &link.source),
                LinkScope::Any => true,
            }
        }))
    }
}

/// Extracts followable links from an HTML document
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` and `<area href="...">`
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
/// - Anything that does not resolve to `http` or `https`
///
/// Relative links resolve against `<base href>` when the document has one,
/// otherwise against `page_url`.
///
/// # Example
///
/// ```
/// use meander::modules::extract_links;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/dir/page").unwrap();
/// let links = extract_links(r#"<a href="other">x</a>"#, &base);
/// assert_eq!(links[0].as_str(), "https://example.com/dir/other");
/// ```
pub fn extract_links(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);

    let base = Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone());

    let mut links = Vec::new();

    if let Ok(selector) = Selector::parse("a[href], area[href]") {
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(url);
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(url);
            }
        }
    }

    links
}

fn resolve_link(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    base.join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}
