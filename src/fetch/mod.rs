//! Fetch layer
//!
//! All HTTP traffic of a run goes through [`Fetcher`], which handles:
//! - Direct requests followed by the configured politeness sleep
//! - A rotating proxy pool refilled from a [`ProxySource`]
//! - Bounded proxied retries with a final direct fallback
//! - Classification of transport errors
//!
//! Failures never escape as panics or run-level errors: a call always ends
//! with a response or a [`FetchFailure`].

mod fetcher;
mod proxy;
mod transport;

pub use fetcher::{FetchSettings, FetchStats, Fetcher};
pub use proxy::{
    parse_proxy_table, FreeProxyList, ProxyEndpoint, ProxyError, ProxyPool, ProxySource,
    StaticProxies,
};
pub use transport::{build_http_client, ReqwestTransport, Transport, TransportError};

use thiserror::Error;

/// HTTP method of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single logical request handed to the fetch layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Per-call override of the run-wide proxy flag; `Some(false)` forces direct
    pub use_proxy: Option<bool>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            body: None,
            headers: Vec::new(),
            use_proxy: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Post,
            body: Some(body.into()),
            headers: Vec::new(),
            use_proxy: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends this request directly even when the proxy pool is enabled
    pub fn without_proxy(mut self) -> Self {
        self.use_proxy = Some(false);
        self
    }
}

/// Response of a completed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure of one request attempt, or of the whole call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchFailure {
    /// Connection, timeout or proxy failure
    #[error("network error fetching {url}: {error}")]
    Network { url: String, error: String },

    /// Non-success status on a proxied POST
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
}
