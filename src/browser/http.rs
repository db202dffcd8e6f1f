//! HTTP-only browser implementation
//!
//! `HttpBrowser` fetches pages with `reqwest` and keeps cookies in a per-context
//! jar. It executes no script, so every `WaitUntil` event is reached as soon
//! as the body has been read.

use crate::browser::{Browser, BrowserError, PageResponse, StorageState, StoredCookie};
use crate::config::{BrowserConfig, WaitUntil};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use reqwest::redirect::Policy;
use reqwest::{header, Client, Url};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Maximum redirect hops followed per navigation
const MAX_REDIRECTS: usize = 10;

/// Cookie jar that also keeps every `Set-Cookie` header it accepted
///
/// The jar cannot enumerate its cookies with their attributes, so the raw
/// headers are what a later context replays. Replaying them in arrival order
/// reproduces overwrites and deletions too.
#[derive(Default)]
struct RecordingJar {
    jar: Jar,
    received: Mutex<Vec<StoredCookie>>,
}

impl RecordingJar {
    fn record(&self, cookie: &str, url: &Url) {
        let stored = StoredCookie {
            url: url.to_string(),
            cookie: cookie.to_string(),
        };
        let mut received = self.received.lock().unwrap_or_else(|e| e.into_inner());
        if received.last() != Some(&stored) {
            received.push(stored);
        }
    }

    /// Adds a full `Set-Cookie` value as if `url` had sent it
    fn replay(&self, cookie: &str, url: &Url) {
        self.jar.add_cookie_str(cookie, url);
        self.record(cookie, url);
    }

    fn snapshot(&self) -> Vec<StoredCookie> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl CookieStore for RecordingJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let headers: Vec<&HeaderValue> = cookie_headers.collect();
        for value in &headers {
            if let Ok(cookie) = value.to_str() {
                self.record(cookie, url);
            }
        }
        self.jar.set_cookies(&mut headers.into_iter(), url);
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        self.jar.cookies(url)
    }
}

struct Context {
    client: Client,
    jar: Arc<RecordingJar>,
}

struct Page {
    url: String,
    html: Option<String>,
}

/// Browser collaborator backed by a plain HTTP client
pub struct HttpBrowser {
    user_agent: String,
    context: Option<Context>,
    page: Option<Page>,
}

impl HttpBrowser {
    /// Creates a browser with no open context
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            context: None,
            page: None,
        }
    }

    fn build_client(&self, jar: Arc<RecordingJar>) -> Result<Client, reqwest::Error> {
        Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .cookie_provider(jar)
            .gzip(true)
            .brotli(true)
            .build()
    }
}

fn is_html(content_type: Option<&str>) -> bool {
    content_type.map_or(false, |ct| {
        ct.contains("text/html") || ct.contains("application/xhtml+xml")
    })
}

fn classify(url: &str, error: reqwest::Error) -> BrowserError {
    if error.is_timeout() {
        BrowserError::Timeout {
            url: url.to_string(),
        }
    } else {
        BrowserError::Navigation {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_context(&mut self, state: Option<StorageState>) -> Result<(), BrowserError> {
        let jar = Arc::new(RecordingJar::default());

        for stored in state.iter().flat_map(|s| s.cookies.iter()) {
            match Url::parse(&stored.url) {
                Ok(url) => jar.replay(&stored.cookie, &url),
                Err(e) => {
                    tracing::debug!(url = %stored.url, "Skipping cookie with bad URL: {}", e);
                }
            }
        }

        let client = self
            .build_client(jar.clone())
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        self.context = Some(Context { client, jar });
        self.page = None;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
        wait_until: WaitUntil,
    ) -> Result<PageResponse, BrowserError> {
        let context = self.context.as_ref().ok_or(BrowserError::NotOpen)?;
        tracing::trace!(url, ?wait_until, "Navigating");

        let response = context
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let html = if is_html(content_type.as_deref()) {
            Some(response.text().await.map_err(|e| classify(url, e))?)
        } else {
            None
        };

        self.page = Some(Page {
            url: final_url.to_string(),
            html,
        });

        Ok(PageResponse {
            url: url.to_string(),
            final_url: final_url.to_string(),
            status,
            content_type,
        })
    }

    fn content(&self) -> Option<&str> {
        self.page.as_ref().and_then(|p| p.html.as_deref())
    }

    fn current_url(&self) -> Option<&str> {
        self.page.as_ref().map(|p| p.url.as_str())
    }

    async fn storage_state(&mut self) -> Result<StorageState, BrowserError> {
        let context = self.context.as_ref().ok_or(BrowserError::NotOpen)?;
        Ok(StorageState {
            cookies: context.jar.snapshot(),
        })
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.context = None;
        self.page = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.context.is_some()
    }
}
