//! HTTP transport
//!
//! [`Transport`] is the seam between the retry logic and the network. The
//! production implementation wraps `reqwest`; tests script their own.

use crate::fetch::{FetchRequest, FetchResponse, Method, ProxyEndpoint};
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Classified transport failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("proxy {proxy} unusable: {error}")]
    Proxy { proxy: String, error: String },

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Sends one request, optionally through a proxy
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<FetchResponse, TransportError>;
}

/// Builds an HTTP client with the run's user agent and timeout
///
/// # Arguments
///
/// * `user_agent` - User-Agent header sent with every request
/// * `timeout` - Whole-request timeout
/// * `proxy` - Route every request through this endpoint
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&ProxyEndpoint>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout)
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy.url())?);
    }

    builder.build()
}

/// `reqwest`-backed transport
///
/// Keeps one direct client and a client for the proxy currently in use;
/// switching proxies rebuilds the latter.
pub struct ReqwestTransport {
    direct: Client,
    proxied: Mutex<Option<(ProxyEndpoint, Client)>>,
    user_agent: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            direct: build_http_client(user_agent, timeout, None)?,
            proxied: Mutex::new(None),
            user_agent: user_agent.to_string(),
            timeout,
        })
    }

    fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cached = self
            .proxied
            .lock()
            .map_err(|_| TransportError::Other("proxy client cache poisoned".to_string()))?;
        if let Some((endpoint, client)) = cached.as_ref() {
            if endpoint == proxy {
                return Ok(client.clone());
            }
        }

        let client = build_http_client(&self.user_agent, self.timeout, Some(proxy)).map_err(
            |e| TransportError::Proxy {
                proxy: proxy.to_string(),
                error: e.to_string(),
            },
        )?;
        *cached = Some((proxy.clone(), client.clone()));
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &FetchRequest,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<FetchResponse, TransportError> {
        let client = self.client_for(proxy)?;

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.text().await?;

        Ok(FetchResponse { url, status, body })
    }
}
