//! Rotating proxy pool
//!
//! The pool holds a list of endpoints and at most one current proxy. A
//! failed attempt discards the current proxy; the next acquisition pops a
//! fresh one (last in, first out), refilling from the [`ProxySource`] when
//! the list runs dry.

use crate::fetch::build_http_client;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Rows of the proxy table considered on each refresh
const PROXY_TABLE_ROWS: usize = 10;

/// Zero-based index of the HTTPS column in the proxy table
const HTTPS_COLUMN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProxyError {
    /// The source returned no usable endpoint
    #[error("proxy pool exhausted")]
    Exhausted,

    #[error("proxy refresh failed: {0}")]
    Refresh(String),

    #[error("invalid proxy endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),
}

/// A `host:port` HTTP proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    /// Proxy URL as understood by the HTTP client
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProxyError::InvalidEndpoint(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Supplies endpoints whenever the pool is empty
#[async_trait]
pub trait ProxySource: Send + Sync {
    async fn fetch_proxies(&self) -> Result<Vec<ProxyEndpoint>, ProxyError>;
}

/// Scrapes a public proxy-list page
pub struct FreeProxyList {
    client: Client,
    url: String,
}

impl FreeProxyList {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(user_agent, timeout, None)?,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ProxySource for FreeProxyList {
    async fn fetch_proxies(&self) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProxyError::Refresh(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProxyError::Refresh(format!(
                "HTTP {} from {}",
                response.status().as_u16(),
                self.url
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::Refresh(e.to_string()))?;

        let proxies = parse_proxy_table(&body)?;
        tracing::info!("Fetched {} HTTPS proxies from {}", proxies.len(), self.url);
        Ok(proxies)
    }
}

/// Extracts HTTPS-capable endpoints from a proxy-list table
///
/// Only the first rows of the table body are read; a row qualifies when its
/// HTTPS cell says `yes`.
pub fn parse_proxy_table(html: &str) -> Result<Vec<ProxyEndpoint>, ProxyError> {
    let row_selector = Selector::parse("tbody tr")
        .map_err(|e| ProxyError::Refresh(format!("row selector: {:?}", e)))?;
    let cell_selector =
        Selector::parse("td").map_err(|e| ProxyError::Refresh(format!("cell selector: {:?}", e)))?;

    let document = Html::parse_document(html);
    let mut proxies = Vec::new();

    for row in document.select(&row_selector).take(PROXY_TABLE_ROWS) {
        let cells: Vec<String> = row
            .select(&cell_selector)
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .collect();

        let https = cells
            .get(HTTPS_COLUMN)
            .map(|c| c.contains("yes"))
            .unwrap_or(false);
        if !https {
            continue;
        }

        let (Some(host), Some(port)) = (cells.first(), cells.get(1)) else {
            continue;
        };
        match format!("{}:{}", host, port).parse() {
            Ok(endpoint) => proxies.push(endpoint),
            Err(e) => tracing::debug!("Skipping proxy row: {}", e),
        }
    }

    Ok(proxies)
}

/// A fixed list of endpoints, handed out again on every refresh
pub struct StaticProxies {
    endpoints: Vec<ProxyEndpoint>,
}

impl StaticProxies {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self { endpoints }
    }

    /// Parses `host:port` strings
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ProxyError> {
        let endpoints = entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(endpoints))
    }
}

#[async_trait]
impl ProxySource for StaticProxies {
    async fn fetch_proxies(&self) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        Ok(self.endpoints.clone())
    }
}

/// Endpoint list plus the proxy currently in use
pub struct ProxyPool {
    endpoints: Vec<ProxyEndpoint>,
    current: Option<ProxyEndpoint>,
    source: Box<dyn ProxySource>,
}

impl ProxyPool {
    pub fn new(source: Box<dyn ProxySource>) -> Self {
        Self {
            endpoints: Vec::new(),
            current: None,
            source,
        }
    }

    /// Returns the current proxy, selecting a new one if there is none
    ///
    /// # Returns
    ///
    /// * `Ok(ProxyEndpoint)` - The proxy to use for the next attempt
    /// * `Err(ProxyError)` - The refresh failed or produced nothing
    pub async fn acquire(&mut self) -> Result<ProxyEndpoint, ProxyError> {
        if let Some(current) = &self.current {
            return Ok(current.clone());
        }

        if self.endpoints.is_empty() {
            self.endpoints = self.source.fetch_proxies().await?;
            tracing::debug!("Proxy pool refreshed with {} endpoints", self.endpoints.len());
        }

        let next = self.endpoints.pop().ok_or(ProxyError::Exhausted)?;
        self.current = Some(next.clone());
        Ok(next)
    }

    /// Invalidates the current proxy after a failed attempt
    pub fn discard(&mut self) -> Option<ProxyEndpoint> {
        self.current.take()
    }

    pub fn current(&self) -> Option<&ProxyEndpoint> {
        self.current.as_ref()
    }

    /// Endpoints still waiting in the list
    pub fn remaining(&self) -> usize {
        self.endpoints.len()
    }
}
