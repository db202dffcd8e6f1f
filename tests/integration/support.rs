//! Shared fixtures: a scripted browser, store setup and task runners

use async_trait::async_trait;
use meander::browser::{Browser, BrowserError, PageResponse, StorageState, StoredCookie};
use meander::config::{Config, WaitUntil};
use meander::crawler::{seed_job, CrawlMachine, SeedEntry, TaskOutcome};
use meander::storage::{SharedStorage, SqliteStorage, TaskRecord, UrlRecord};
use meander::Pipeline;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const JOB: &str = "test-job";

/// What the scripted browser returns for a URL
#[derive(Debug, Clone)]
pub enum Page {
    Html(u16, String),
    /// Navigation raises an error
    Fail,
    /// Navigation never completes
    Hang,
}

/// Everything the scripted browser was asked to do
#[derive(Debug, Default)]
pub struct BrowserLog {
    pub navigations: Vec<String>,
    /// Storage state handed to each `new_context` call
    pub contexts: Vec<Option<StorageState>>,
    pub closes: usize,
}

/// In-process browser that serves canned pages
pub struct ScriptedBrowser {
    pages: HashMap<String, Page>,
    log: Arc<Mutex<BrowserLog>>,
    /// `new_context` calls beyond this count fail
    context_limit: Option<usize>,
    open: bool,
    current: Option<(String, String)>,
}

impl ScriptedBrowser {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            log: Arc::new(Mutex::new(BrowserLog::default())),
            context_limit: None,
            open: false,
            current: None,
        }
    }

    pub fn page(mut self, url: &str, page: Page) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    pub fn html(self, url: &str, body: &str) -> Self {
        self.page(url, Page::Html(200, body.to_string()))
    }

    pub fn context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub fn log(&self) -> Arc<Mutex<BrowserLog>> {
        Arc::clone(&self.log)
    }

    pub fn navigations(&self) -> Vec<String> {
        self.log.lock().unwrap().navigations.clone()
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn new_context(&mut self, state: Option<StorageState>) -> Result<(), BrowserError> {
        let mut log = self.log.lock().unwrap();
        log.contexts.push(state);
        if let Some(limit) = self.context_limit {
            if log.contexts.len() > limit {
                self.open = false;
                return Err(BrowserError::Launch("browser crashed".to_string()));
            }
        }
        self.open = true;
        self.current = None;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        _timeout: Duration,
        _wait_until: WaitUntil,
    ) -> Result<PageResponse, BrowserError> {
        if !self.open {
            return Err(BrowserError::NotOpen);
        }
        self.log.lock().unwrap().navigations.push(url.to_string());

        let page = self
            .pages
            .get(url)
            .cloned()
            .unwrap_or_else(|| Page::Html(404, String::new()));

        match page {
            Page::Html(status, body) => {
                self.current = Some((url.to_string(), body));
                Ok(PageResponse {
                    url: url.to_string(),
                    final_url: url.to_string(),
                    status,
                    content_type: Some("text/html".to_string()),
                })
            }
            Page::Fail => Err(BrowserError::Navigation {
                url: url.to_string(),
                message: "net::ERR_CONNECTION_RESET".to_string(),
            }),
            Page::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(BrowserError::Timeout {
                    url: url.to_string(),
                })
            }
        }
    }

    async fn wait(&mut self, _duration: Duration) {}

    fn content(&self) -> Option<&str> {
        self.current.as_ref().map(|(_, body)| body.as_str())
    }

    fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|(url, _)| url.as_str())
    }

    async fn storage_state(&mut self) -> Result<StorageState, BrowserError> {
        let contexts = self.log.lock().unwrap().contexts.len();
        Ok(StorageState {
            cookies: vec![StoredCookie {
                url: "http://example.com/".to_string(),
                cookie: format!("context={}", contexts),
            }],
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.log.lock().unwrap().closes += 1;
        self.open = false;
        self.current = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Defaults tuned for fast tests: no restarts, no discovery cap
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.crawler.max_depth = 1;
    config.crawler.restart_interval = 0;
    config.browser.navigation_timeout_ms = 2_000;
    config
}

pub fn memory_store() -> SharedStorage {
    SharedStorage::new(SqliteStorage::new_in_memory().unwrap())
}

pub fn seed(storage: &SharedStorage, config: &Config, urls: &[&str]) {
    let entries: Vec<SeedEntry> = urls.iter().map(|url| SeedEntry::new(*url)).collect();
    seed_job(storage, JOB, &entries, &config.crawler).unwrap();
}

/// Claims the next task for crawler 1
pub fn claim(storage: &SharedStorage) -> TaskRecord {
    storage.with(|s| s.claim_task(JOB, 1)).unwrap().unwrap()
}

/// Claims and runs one task to completion or abort
pub async fn run_task(
    storage: &SharedStorage,
    config: &Config,
    browser: &mut ScriptedBrowser,
    pipeline: &mut Pipeline,
) -> TaskOutcome {
    let task = claim(storage);
    CrawlMachine::new(config, None, storage.clone(), browser, pipeline, task)
        .unwrap()
        .run()
        .await
        .unwrap()
}

pub fn task(storage: &SharedStorage, task_id: i64) -> TaskRecord {
    storage.with(|s| s.get_task(task_id)).unwrap()
}

/// Every URL row of a task, in id order
pub fn urls(storage: &SharedStorage, task_id: i64) -> Vec<UrlRecord> {
    storage
        .with(|s| {
            let mut rows = Vec::new();
            let mut id = 1;
            while let Ok(row) = s.get_url(id) {
                if row.task_id == task_id {
                    rows.push(row);
                }
                id += 1;
            }
            Ok(rows)
        })
        .unwrap()
}

/// The repetition-1 row for a URL string
pub fn url_row(storage: &SharedStorage, task_id: i64, url: &str) -> UrlRecord {
    urls(storage, task_id)
        .into_iter()
        .find(|row| row.url == url && row.repetition == 1)
        .unwrap_or_else(|| panic!("no row for {}", url))
}
