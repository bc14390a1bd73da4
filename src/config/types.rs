use crate::source::NestedPath;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_PROXY_LIST_URL: &str = "https://free-proxy-list.net/";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:72.0) Gecko/20100101 Firefox/72.0";

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub requests: RequestConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Looks up a source by name
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }
}

/// Fetch layer behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
    /// Route requests through the rotating proxy pool
    #[serde(rename = "use-proxy", default)]
    pub use_proxy: bool,

    /// Proxied attempts per request before falling back to a direct request
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause after every direct request (milliseconds)
    #[serde(rename = "sleep-time-ms", default = "default_sleep_time_ms")]
    pub sleep_time_ms: u64,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    /// Page the proxy pool is refilled from
    #[serde(rename = "proxy-list-url", default = "default_proxy_list_url")]
    pub proxy_list_url: String,

    /// Fixed `host:port` proxies used instead of scraping `proxy-list-url`
    #[serde(default)]
    pub proxies: Vec<String>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            use_proxy: false,
            max_attempts: default_max_attempts(),
            sleep_time_ms: default_sleep_time_ms(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            proxy_list_url: default_proxy_list_url(),
            proxies: Vec::new(),
        }
    }
}

/// Output and checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Directory holding `ids/`, `temp/` and `results/`
    pub root: String,

    /// Collector iterations between temporary snapshots
    #[serde(rename = "snapshot-interval", default = "default_snapshot_interval")]
    pub snapshot_interval: usize,

    /// Maximum number of items attempted per partition in one run
    #[serde(rename = "batch-size", default)]
    pub batch_size: Option<usize>,
}

/// Which generic adapter a source uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTML listing pages and HTML detail pages
    Html,
    /// Identifiers embedded as JSON, JSON detail API
    Json,
}

/// HTTP method for detail requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailMethod {
    #[default]
    Get,
    Post,
}

/// One partition dimension, e.g. publisher type or province
#[derive(Debug, Clone, Deserialize)]
pub struct DimensionConfig {
    pub name: String,
    pub values: Vec<String>,
}

/// A named value pulled out of a JSON detail payload
#[derive(Debug, Clone, Deserialize)]
pub struct JsonFieldConfig {
    pub name: String,
    pub path: NestedPath,
}

/// A single listing source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,

    #[serde(rename = "from-page", default = "default_from_page")]
    pub from_page: u32,

    pub pages: u32,

    /// Items per listing page, used to render `{offset}`
    #[serde(rename = "page-size", default = "default_page_size")]
    pub page_size: u32,

    #[serde(rename = "ids-filename")]
    pub ids_filename: String,

    #[serde(rename = "result-filename")]
    pub result_filename: String,

    #[serde(rename = "dimension", default)]
    pub dimensions: Vec<DimensionConfig>,

    // ===== Listing =====
    #[serde(rename = "listing-url")]
    pub listing_url: String,

    /// Template used for page 1 instead of `listing-url`
    #[serde(rename = "first-page-url", default)]
    pub first_page_url: Option<String>,

    #[serde(rename = "item-selector", default)]
    pub item_selector: Option<String>,

    #[serde(rename = "key-attribute", default)]
    pub key_attribute: Option<String>,

    /// Resolve relative keys against the listing URL
    #[serde(rename = "resolve-links", default = "default_true")]
    pub resolve_links: bool,

    #[serde(rename = "listing-json-selector", default)]
    pub listing_json_selector: Option<String>,

    #[serde(rename = "listing-key-path", default)]
    pub listing_key_path: NestedPath,

    // ===== Detail =====
    #[serde(rename = "detail-url", default)]
    pub detail_url: Option<String>,

    #[serde(rename = "detail-method", default)]
    pub detail_method: DetailMethod,

    #[serde(rename = "detail-body", default)]
    pub detail_body: Option<String>,

    #[serde(rename = "detail-headers", default)]
    pub detail_headers: BTreeMap<String, String>,

    /// Route detail requests directly even when the proxy pool is enabled
    #[serde(rename = "skip-proxy", default)]
    pub skip_proxy: bool,

    /// Column name -> CSS selector (html sources)
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    #[serde(rename = "json-field", default)]
    pub json_fields: Vec<JsonFieldConfig>,

    #[serde(rename = "flatten-top-level", default)]
    pub flatten_top_level: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_sleep_time_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_proxy_list_url() -> String {
    DEFAULT_PROXY_LIST_URL.to_string()
}

fn default_snapshot_interval() -> usize {
    5
}

fn default_from_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    48
}

fn default_true() -> bool {
    true
}
