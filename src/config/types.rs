use serde::Deserialize;

/// Main configuration structure for a Meander worker
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Crawl loop behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Maximum discovery depth (seed URLs are depth 0)
    #[serde(rename = "max-depth", default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum number of URLs the link collector may insert per task (0 = unlimited)
    #[serde(rename = "max-urls", default)]
    pub max_urls: u32,

    /// Number of repetitions per URL
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,

    /// Tie-break policy used when claiming the next free URL
    #[serde(rename = "frontier-policy", default)]
    pub frontier_policy: FrontierPolicy,

    /// Crawl discovered links in the browser context of the page they were found on
    #[serde(rename = "same-context", default)]
    pub same_context: bool,

    /// Number of URLs between browser session restarts (0 = never restart)
    #[serde(rename = "restart-interval", default = "default_restart_interval")]
    pub restart_interval: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_urls: 0,
            repetitions: default_repetitions(),
            frontier_policy: FrontierPolicy::default(),
            same_context: false,
            restart_interval: default_restart_interval(),
        }
    }
}

/// Frontier selection policy for repetition-1 claims
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontierPolicy {
    /// Prefer URLs at the worker's current depth, then the shallowest free URL
    #[default]
    BreadthFirst,
    /// Oldest inserted free URL regardless of depth
    InsertionOrder,
}

/// Browser collaborator settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrowserConfig {
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Explicit wait after the page has loaded
    #[serde(default)]
    pub wait_after_load_ms: u64,

    #[serde(default)]
    pub wait_until: WaitUntil,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: default_navigation_timeout(),
            wait_after_load_ms: 0,
            wait_until: WaitUntil::default(),
            user_agent: default_user_agent(),
        }
    }
}

/// Load event a navigation waits for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitUntil {
    #[default]
    Load,
    DomContentLoaded,
    NetworkIdle,
}

/// Built-in module switches
#[derive(Debug, Clone, Deserialize)]
pub struct ModulesConfig {
    #[serde(rename = "collect-links", default = "default_true")]
    pub collect_links: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            collect_links: true,
        }
    }
}

/// Link admission settings used by the link collector
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub scope: LinkScope,

    /// Domain patterns (e.g. "ads.example.com" or "*.tracker.net") never admitted
    #[serde(rename = "exclude-domains", default)]
    pub exclude_domains: Vec<String>,
}

/// Which discovered links stay inside the task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkScope {
    /// Same registrable domain as the task's site
    #[default]
    SameSite,
    /// Same scheme, host and port as the page the link was found on
    SameOrigin,
    /// No scope restriction
    Any,
}

/// Shared store settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// Path to the SQLite database file shared by all workers
    pub database_path: String,

    /// How long a connection waits on a locked database before failing
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "./meander.db".to_string(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Diagnostic output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    /// Directory for per-URL screenshots; disabled when unset
    #[serde(rename = "screenshot-dir", default)]
    pub screenshot_dir: Option<String>,
}

fn default_max_depth() -> u32 {
    2
}

fn default_repetitions() -> u32 {
    1
}

fn default_restart_interval() -> u32 {
    25
}

fn default_navigation_timeout() -> u64 {
    30_000
}

fn default_user_agent() -> String {
    format!("meander/{}", env!("CARGO_PKG_VERSION"))
}

fn default_busy_timeout() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}
