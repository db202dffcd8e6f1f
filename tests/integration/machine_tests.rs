//! State machine behaviour with a scripted browser

use crate::support::{
    claim, memory_store, run_task, seed, task, test_config, url_row, urls, Page, ScriptedBrowser,
};
use async_trait::async_trait;
use meander::browser::{Browser, BrowserError, PageResponse, StorageState};
use meander::config::WaitUntil;
use meander::crawler::{AbortReason, CrawlMachine, TaskOutcome};
use meander::modules::{CrawlContext, DiscoveredLink, HookError, LinkFilter, Module};
use meander::state::{
    TaskState, UrlState, RESULT_BROWSER_ERROR, RESULT_PIPELINE_ERROR, RESULT_WORKER_ERROR,
};
use meander::storage::SiteRecord;
use meander::{Config, Pipeline};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const ROOT: &str = "http://example.com/";

fn linking_site() -> ScriptedBrowser {
    ScriptedBrowser::new()
        .html(
            ROOT,
            r#"<a href="/a">A</a> <a href="/b">B</a> <a href="/private">P</a>"#,
        )
        .html("http://example.com/a", "<p>a</p>")
        .html("http://example.com/b", "<p>b</p>")
        .html("http://example.com/private", "<p>private</p>")
}

/// Appends a second response, as a module that reloads the page would
struct Reloader;

#[async_trait]
impl Module for Reloader {
    fn name(&self) -> &str {
        "reloader"
    }

    async fn after_response(
        &mut self,
        _ctx: &mut CrawlContext<'_>,
        responses: &mut Vec<PageResponse>,
        final_url: &str,
        _repetition: u32,
    ) -> Result<(), HookError> {
        let mut again = responses[0].clone();
        again.status = 203;
        again.final_url = format!("{}?reloaded", final_url);
        responses.push(again);
        Ok(())
    }
}

/// Records how many responses it was handed
struct Observer(Arc<Mutex<Vec<usize>>>);

#[async_trait]
impl Module for Observer {
    fn name(&self) -> &str {
        "observer"
    }

    async fn after_response(
        &mut self,
        _ctx: &mut CrawlContext<'_>,
        responses: &mut Vec<PageResponse>,
        _final_url: &str,
        _repetition: u32,
    ) -> Result<(), HookError> {
        self.0.lock().unwrap().push(responses.len());
        Ok(())
    }
}

/// Fails hooks for URLs containing a marker
struct Failing {
    marker: &'static str,
    before: bool,
    fatal: bool,
}

#[async_trait]
impl Module for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn before_navigate(&mut self, ctx: &mut CrawlContext<'_>) -> Result<(), HookError> {
        if self.before && ctx.url.url.contains(self.marker) {
            return Err(HookError::Recoverable("refused".to_string()));
        }
        Ok(())
    }

    async fn after_response(
        &mut self,
        ctx: &mut CrawlContext<'_>,
        _responses: &mut Vec<PageResponse>,
        _final_url: &str,
        _repetition: u32,
    ) -> Result<(), HookError> {
        if !self.before && ctx.url.url.contains(self.marker) {
            if self.fatal {
                return Err(HookError::Fatal("page broke the module".to_string()));
            }
            return Err(HookError::Recoverable("could not parse page".to_string()));
        }
        Ok(())
    }
}

/// Rejects links whose path starts with `/private`
struct NoPrivate;

impl Module for NoPrivate {
    fn name(&self) -> &str {
        "no-private"
    }

    fn link_filter(&self, _site: &SiteRecord, _config: &Config) -> Option<LinkFilter> {
        Some(Box::new(|link: &DiscoveredLink| {
            !link.url.path().starts_with("/private")
        }))
    }
}

#[tokio::test]
async fn test_seed_claim_record_exhaust() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &["http://example.com"]);

    let mut browser = ScriptedBrowser::new().html(ROOT, "<p>home</p>");
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 1 });
    let task = task(&storage, 1);
    assert_eq!(task.code, Some(200));
    assert_eq!(task.state, TaskState::Complete);
    assert!(task.progress.is_none());
    assert!(storage.with(|s| s.claim_task(crate::support::JOB, 1)).unwrap().is_none());
}

#[tokio::test]
async fn test_later_modules_see_appended_responses() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut browser = ScriptedBrowser::new().html(ROOT, "<p>home</p>");
    let mut pipeline = Pipeline::builder()
        .cookie_acceptance(Reloader)
        .module(Observer(Arc::clone(&seen)))
        .build();
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(*seen.lock().unwrap(), vec![2]);

    // The recorder stores the last response of the list
    let row = url_row(&storage, 1, ROOT);
    assert_eq!(row.code, Some(203));
    assert_eq!(row.final_url.as_deref(), Some("http://example.com/?reloaded"));
}

#[tokio::test]
async fn test_module_link_filters_are_combined() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(&config, vec![Box::new(NoPrivate)]);
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let crawled: Vec<String> = urls(&storage, 1).into_iter().map(|row| row.url).collect();
    assert_eq!(
        crawled,
        vec![ROOT, "http://example.com/a", "http://example.com/b"]
    );
    assert_eq!(browser.navigations().len(), 3);
}

#[tokio::test]
async fn test_http_error_skips_discovery() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = ScriptedBrowser::new().page(
        ROOT,
        Page::Html(500, r#"<a href="/a">A</a>"#.to_string()),
    );
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let rows = urls(&storage, 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].code, Some(500));
    assert_eq!(task(&storage, 1).code, Some(500));
}

#[tokio::test]
async fn test_navigation_failure_is_recorded_and_crawl_continues() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site().page("http://example.com/a", Page::Fail);
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 4 });
    assert_eq!(
        url_row(&storage, 1, "http://example.com/a").code,
        Some(RESULT_BROWSER_ERROR)
    );
    assert_eq!(url_row(&storage, 1, "http://example.com/b").code, Some(200));
}

#[tokio::test]
async fn test_hung_navigation_times_out() {
    let storage = memory_store();
    let mut config = test_config();
    config.browser.navigation_timeout_ms = 50;
    seed(&storage, &config, &[ROOT]);

    let mut browser = ScriptedBrowser::new().page(ROOT, Page::Hang);
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 1 });
    let task = task(&storage, 1);
    assert_eq!(task.code, Some(RESULT_BROWSER_ERROR));
    assert!(task.error.is_some());
}

#[tokio::test]
async fn test_recoverable_hook_failure_marks_url() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(
        &config,
        vec![Box::new(Failing {
            marker: "/b",
            before: false,
            fatal: false,
        })],
    );
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert!(matches!(outcome, TaskOutcome::Finished { .. }));
    assert_eq!(
        url_row(&storage, 1, "http://example.com/b").code,
        Some(RESULT_PIPELINE_ERROR)
    );
    assert_eq!(url_row(&storage, 1, "http://example.com/a").code, Some(200));
}

#[tokio::test]
async fn test_fatal_hook_failure_aborts_task() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(
        &config,
        vec![Box::new(Failing {
            marker: "/a",
            before: false,
            fatal: true,
        })],
    );
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert!(matches!(
        outcome,
        TaskOutcome::Aborted {
            reason: AbortReason::Module(_)
        }
    ));
    assert_eq!(
        url_row(&storage, 1, "http://example.com/a").code,
        Some(RESULT_WORKER_ERROR)
    );
    // Not yet crawled; left for a resumed run
    assert_eq!(
        url_row(&storage, 1, "http://example.com/b").state,
        UrlState::Free
    );
    let task = task(&storage, 1);
    assert_eq!(task.state, TaskState::Aborted);
    assert!(task.progress.is_some());
}

#[tokio::test]
async fn test_pre_navigation_failure_aborts_without_navigating() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let mut pipeline = Pipeline::from_config(
        &config,
        vec![Box::new(Failing {
            marker: "example.com",
            before: true,
            fatal: false,
        })],
    );
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert!(matches!(outcome, TaskOutcome::Aborted { .. }));
    assert!(browser.navigations().is_empty());

    let row = url_row(&storage, 1, ROOT);
    assert_eq!(row.state, UrlState::Complete);
    assert_eq!(row.code, Some(RESULT_WORKER_ERROR));

    let task = task(&storage, 1);
    assert_eq!(task.state, TaskState::Aborted);
    assert_eq!(task.code, Some(RESULT_WORKER_ERROR));
}

#[tokio::test]
async fn test_repetitions_run_discovery_once() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.repetitions = 2;
    seed(&storage, &config, &[ROOT]);

    let mut browser = ScriptedBrowser::new()
        .html(ROOT, r#"<a href="/a">A</a>"#)
        .html("http://example.com/a", "<p>a</p>");
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(outcome, TaskOutcome::Finished { processed: 2 });
    assert_eq!(
        browser.navigations(),
        vec![ROOT, ROOT, "http://example.com/a", "http://example.com/a"]
    );

    let rows = urls(&storage, 1);
    assert_eq!(rows.len(), 4);
    assert!(rows
        .iter()
        .all(|row| row.state == UrlState::Complete && row.code == Some(200)));
}

#[tokio::test]
async fn test_breadth_first_claims_shallow_urls_first() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.max_depth = 2;
    seed(&storage, &config, &[ROOT]);

    let mut browser = ScriptedBrowser::new()
        .html(ROOT, r#"<a href="/a">A</a> <a href="/b">B</a>"#)
        .html("http://example.com/a", r#"<a href="/a/deep">deep</a>"#)
        .html("http://example.com/b", "<p>b</p>")
        .html("http://example.com/a/deep", "<p>deep</p>");
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(
        browser.navigations(),
        vec![
            ROOT,
            "http://example.com/a",
            "http://example.com/b",
            "http://example.com/a/deep"
        ]
    );
}

#[tokio::test]
async fn test_same_context_reuses_browser_context() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.same_context = true;
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let log = browser.log();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert_eq!(log.lock().unwrap().contexts.len(), 1);
}

#[tokio::test]
async fn test_fresh_context_per_url_by_default() {
    let storage = memory_store();
    let config = test_config();
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let log = browser.log();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    run_task(&storage, &config, &mut browser, &mut pipeline).await;

    let log = log.lock().unwrap();
    assert_eq!(log.contexts.len(), 4);
    assert!(log.contexts.iter().all(Option::is_none));
    assert_eq!(log.closes, 1);
}

#[tokio::test]
async fn test_restart_carries_storage_state_in_same_context_mode() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.same_context = true;
    config.crawler.restart_interval = 2;
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site();
    let log = browser.log();
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;
    assert_eq!(outcome, TaskOutcome::Finished { processed: 4 });

    let log = log.lock().unwrap();
    assert_eq!(log.contexts.len(), 2);
    assert!(log.contexts[0].is_none());
    let carried = log.contexts[1].as_ref().unwrap();
    assert_eq!(carried.cookies[0].cookie, "context=1");
}

#[tokio::test]
async fn test_restart_failure_aborts_task() {
    let storage = memory_store();
    let mut config = test_config();
    config.crawler.restart_interval = 1;
    seed(&storage, &config, &[ROOT]);

    let mut browser = linking_site().context_limit(1);
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let outcome = run_task(&storage, &config, &mut browser, &mut pipeline).await;

    assert!(matches!(
        outcome,
        TaskOutcome::Aborted {
            reason: AbortReason::Browser(_)
        }
    ));
    assert_eq!(
        url_row(&storage, 1, "http://example.com/a").code,
        Some(RESULT_BROWSER_ERROR)
    );
    let task = task(&storage, 1);
    assert_eq!(task.state, TaskState::Aborted);
    assert!(task.progress.is_some());
}

#[tokio::test]
async fn test_screenshots_are_written_when_configured() {
    struct Camera(ScriptedBrowser);

    #[async_trait]
    impl Browser for Camera {
        async fn new_context(
            &mut self,
            state: Option<StorageState>,
        ) -> Result<(), BrowserError> {
            self.0.new_context(state).await
        }

        async fn navigate(
            &mut self,
            url: &str,
            timeout: Duration,
            wait_until: WaitUntil,
        ) -> Result<PageResponse, BrowserError> {
            self.0.navigate(url, timeout, wait_until).await
        }

        fn content(&self) -> Option<&str> {
            self.0.content()
        }

        fn current_url(&self) -> Option<&str> {
            self.0.current_url()
        }

        async fn storage_state(
            &mut self,
        ) -> Result<StorageState, BrowserError> {
            self.0.storage_state().await
        }

        async fn screenshot(&mut self) -> Result<Option<Vec<u8>>, BrowserError> {
            Ok(Some(b"\x89PNG".to_vec()))
        }

        async fn close(&mut self) -> Result<(), BrowserError> {
            self.0.close().await
        }

        fn is_open(&self) -> bool {
            self.0.is_open()
        }
    }

    let dir = TempDir::new().unwrap();
    let storage = memory_store();
    let mut config = test_config();
    config.output.screenshot_dir = Some(dir.path().join("shots").display().to_string());
    seed(&storage, &config, &[ROOT]);

    let mut browser = Camera(ScriptedBrowser::new().html(ROOT, "<p>home</p>"));
    let mut pipeline = Pipeline::from_config(&config, Vec::new());
    let task = claim(&storage);
    CrawlMachine::new(&config, None, storage.clone(), &mut browser, &mut pipeline, task)
        .unwrap()
        .run()
        .await
        .unwrap();

    let shot = dir.path().join("shots").join("1-1.png");
    assert_eq!(std::fs::read(shot).unwrap(), b"\x89PNG");
}
