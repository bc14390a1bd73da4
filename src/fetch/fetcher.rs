//! Retrying fetcher
//!
//! Each call runs a small state machine:
//!
//! | State | Action | Next |
//! |-------|--------|------|
//! | `Direct` | send without proxy, sleep | done |
//! | `ProxyAttempt(n)` | acquire proxy, send | done on success, `ProxyAttempt(n + 1)` on failure, `Fallback` after `max_attempts` or when the pool is exhausted |
//! | `Fallback` | send without proxy, sleep | done |
//!
//! A proxied POST answered with a non-success status counts as a failed
//! attempt. Direct requests return whatever status the server sent.

use crate::config::RequestConfig;
use crate::fetch::{
    FetchFailure, FetchRequest, FetchResponse, FreeProxyList, Method, ProxyEndpoint, ProxyPool,
    ProxySource, ReqwestTransport, StaticProxies, Transport,
};
use crate::HarvestError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, Span};

/// Retry and pacing parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub use_proxy: bool,
    /// Hard cap on proxied attempts per call
    pub max_attempts: u32,
    /// Pause after every direct request
    pub sleep: Duration,
}

impl From<&RequestConfig> for FetchSettings {
    fn from(config: &RequestConfig) -> Self {
        Self {
            use_proxy: config.use_proxy,
            max_attempts: config.max_attempts,
            sleep: Duration::from_millis(config.sleep_time_ms),
        }
    }
}

/// Request counters for the run report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub calls: u64,
    pub direct_requests: u64,
    pub proxied_attempts: u64,
    pub proxy_failures: u64,
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    direct_requests: AtomicU64,
    proxied_attempts: AtomicU64,
    proxy_failures: AtomicU64,
    fallbacks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Direct,
    ProxyAttempt(u32),
    Fallback,
}

/// The fetch layer shared by discovery and extraction
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    pool: Mutex<ProxyPool>,
    settings: FetchSettings,
    span: Span,
    counters: Counters,
}

impl Fetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        proxies: Box<dyn ProxySource>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            transport,
            pool: Mutex::new(ProxyPool::new(proxies)),
            settings,
            span: Span::none(),
            counters: Counters::default(),
        }
    }

    /// Builds the production fetcher: `reqwest` transport, and either the
    /// configured static proxies or the scraped proxy list
    pub fn from_config(config: &RequestConfig) -> Result<Self, HarvestError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let transport = ReqwestTransport::new(&config.user_agent, timeout)?;

        let proxies: Box<dyn ProxySource> = if config.proxies.is_empty() {
            Box::new(FreeProxyList::new(
                &config.proxy_list_url,
                &config.user_agent,
                timeout,
            )?)
        } else {
            let source = StaticProxies::parse(&config.proxies).map_err(|e| {
                HarvestError::Config(crate::ConfigError::Validation(e.to_string()))
            })?;
            Box::new(source)
        };

        Ok(Self::new(Arc::new(transport), proxies, config.into()))
    }

    /// Attaches the span every fetch is logged under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn stats(&self) -> FetchStats {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FetchStats {
            calls: read(&self.counters.calls),
            direct_requests: read(&self.counters.direct_requests),
            proxied_attempts: read(&self.counters.proxied_attempts),
            proxy_failures: read(&self.counters.proxy_failures),
            fallbacks: read(&self.counters.fallbacks),
        }
    }

    /// Performs one logical request
    ///
    /// # Returns
    ///
    /// * `Ok(FetchResponse)` - A response, whatever its status (except on the
    ///   proxied POST path, where only a success ends the retries)
    /// * `Err(FetchFailure)` - The final direct attempt failed
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchFailure> {
        self.run(request).instrument(self.span.clone()).await
    }

    async fn run(&self, request: FetchRequest) -> Result<FetchResponse, FetchFailure> {
        Counters::bump(&self.counters.calls);

        let proxied = self.settings.use_proxy && request.use_proxy != Some(false);
        let mut state = if proxied {
            FetchState::ProxyAttempt(1)
        } else {
            FetchState::Direct
        };

        loop {
            state = match state {
                FetchState::Direct => return self.send_direct(&request).await,
                FetchState::Fallback => {
                    Counters::bump(&self.counters.fallbacks);
                    tracing::info!("Falling back to direct request for {}", request.url);
                    return self.send_direct(&request).await;
                }
                FetchState::ProxyAttempt(attempt) => {
                    let acquired = self.pool.lock().await.acquire().await;
                    match acquired {
                        Err(e) => {
                            tracing::warn!("No proxy available ({}) for {}", e, request.url);
                            FetchState::Fallback
                        }
                        Ok(proxy) => match self.send_proxied(&request, &proxy, attempt).await {
                            Ok(response) => return Ok(response),
                            Err(_) => {
                                self.pool.lock().await.discard();
                                if attempt >= self.settings.max_attempts {
                                    FetchState::Fallback
                                } else {
                                    FetchState::ProxyAttempt(attempt + 1)
                                }
                            }
                        },
                    }
                }
            };
        }
    }

    async fn send_proxied(
        &self,
        request: &FetchRequest,
        proxy: &ProxyEndpoint,
        attempt: u32,
    ) -> Result<FetchResponse, FetchFailure> {
        Counters::bump(&self.counters.proxied_attempts);

        let outcome = match self.transport.send(request, Some(proxy)).await {
            Ok(response) if request.method == Method::Post && !response.is_success() => {
                Err(FetchFailure::Status {
                    url: request.url.clone(),
                    status: response.status,
                })
            }
            Ok(response) => Ok(response),
            Err(e) => Err(FetchFailure::Network {
                url: request.url.clone(),
                error: e.to_string(),
            }),
        };

        match &outcome {
            Ok(response) => tracing::info!(
                "[proxy {} attempt {}/{}] {} -> {}",
                proxy,
                attempt,
                self.settings.max_attempts,
                request.url,
                response.status
            ),
            Err(e) => {
                Counters::bump(&self.counters.proxy_failures);
                tracing::warn!(
                    "[proxy {} attempt {}/{}] {} failed: {}",
                    proxy,
                    attempt,
                    self.settings.max_attempts,
                    request.url,
                    e
                );
            }
        }

        outcome
    }

    async fn send_direct(&self, request: &FetchRequest) -> Result<FetchResponse, FetchFailure> {
        Counters::bump(&self.counters.direct_requests);

        let outcome = self
            .transport
            .send(request, None)
            .await
            .map_err(|e| FetchFailure::Network {
                url: request.url.clone(),
                error: e.to_string(),
            });

        match &outcome {
            Ok(response) => tracing::info!("[direct] {} -> {}", request.url, response.status),
            Err(e) => tracing::warn!("[direct] {} failed: {}", request.url, e),
        }

        if !self.settings.sleep.is_zero() {
            tokio::time::sleep(self.settings.sleep).await;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{ProxyError, TransportError};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Transport answering from a closure and recording which proxy each call used
    struct ScriptedTransport<F> {
        respond: F,
        calls: StdMutex<Vec<Option<String>>>,
    }

    impl<F> ScriptedTransport<F> {
        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn scripted<F>(respond: F) -> Arc<ScriptedTransport<F>>
    where
        F: Fn(&FetchRequest, Option<&ProxyEndpoint>) -> Result<FetchResponse, TransportError>
            + Send
            + Sync,
    {
        Arc::new(ScriptedTransport {
            respond,
            calls: StdMutex::new(Vec::new()),
        })
    }

    #[async_trait]
    impl<F> Transport for ScriptedTransport<F>
    where
        F: Fn(&FetchRequest, Option<&ProxyEndpoint>) -> Result<FetchResponse, TransportError>
            + Send
            + Sync,
    {
        async fn send(
            &self,
            request: &FetchRequest,
            proxy: Option<&ProxyEndpoint>,
        ) -> Result<FetchResponse, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push(proxy.map(|p| p.to_string()));
            (self.respond)(request, proxy)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ProxySource for FailingSource {
        async fn fetch_proxies(&self) -> Result<Vec<ProxyEndpoint>, ProxyError> {
            Err(ProxyError::Refresh("list unavailable".to_string()))
        }
    }

    fn ok(request: &FetchRequest, status: u16) -> Result<FetchResponse, TransportError> {
        Ok(FetchResponse {
            url: request.url.clone(),
            status,
            body: "body".to_string(),
        })
    }

    fn settings(use_proxy: bool) -> FetchSettings {
        FetchSettings {
            use_proxy,
            max_attempts: 3,
            sleep: Duration::ZERO,
        }
    }

    fn proxies(entries: &[&str]) -> Box<dyn ProxySource> {
        Box::new(StaticProxies::parse(entries).unwrap())
    }

    #[tokio::test]
    async fn test_retry_bound_then_direct_fallback() {
        let transport = scripted(|_, _| Err(TransportError::Timeout));
        let fetcher = Fetcher::new(
            transport.clone(),
            proxies(&["1.1.1.1:80", "2.2.2.2:80", "3.3.3.3:80", "4.4.4.4:80"]),
            settings(true),
        );

        let result = fetcher.fetch(FetchRequest::get("http://example.com/x")).await;

        assert!(matches!(result, Err(FetchFailure::Network { .. })));
        let calls = transport.calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[..3].iter().all(|c| c.is_some()));
        assert_eq!(calls[3], None);

        let stats = fetcher.stats();
        assert_eq!(stats.proxied_attempts, 3);
        assert_eq!(stats.fallbacks, 1);
    }

    #[tokio::test]
    async fn test_failed_proxy_is_rotated() {
        let transport = scripted(|request, proxy| match proxy {
            Some(p) if p.host == "2.2.2.2" => Err(TransportError::Connect("refused".to_string())),
            _ => ok(request, 200),
        });
        let fetcher = Fetcher::new(
            transport.clone(),
            proxies(&["1.1.1.1:80", "2.2.2.2:80"]),
            settings(true),
        );

        let response = fetcher
            .fetch(FetchRequest::get("http://example.com/x"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(
            transport.calls(),
            vec![Some("2.2.2.2:80".to_string()), Some("1.1.1.1:80".to_string())]
        );
    }

    #[tokio::test]
    async fn test_working_proxy_is_reused() {
        let transport = scripted(|request, _| ok(request, 200));
        let fetcher = Fetcher::new(
            transport.clone(),
            proxies(&["1.1.1.1:80", "2.2.2.2:80"]),
            settings(true),
        );

        fetcher.fetch(FetchRequest::get("http://example.com/a")).await.unwrap();
        fetcher.fetch(FetchRequest::get("http://example.com/b")).await.unwrap();

        assert_eq!(
            transport.calls(),
            vec![Some("2.2.2.2:80".to_string()), Some("2.2.2.2:80".to_string())]
        );
    }

    #[tokio::test]
    async fn test_proxied_post_error_status_is_retried() {
        let transport = scripted(|request, proxy| match proxy {
            Some(p) if p.host == "2.2.2.2" => ok(request, 500),
            _ => ok(request, 200),
        });
        let fetcher = Fetcher::new(
            transport.clone(),
            proxies(&["1.1.1.1:80", "2.2.2.2:80"]),
            settings(true),
        );

        let response = fetcher
            .fetch(FetchRequest::post("http://example.com/api", "id=1"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_proxied_get_error_status_is_returned() {
        let transport = scripted(|request, _| ok(request, 500));
        let fetcher = Fetcher::new(transport.clone(), proxies(&["1.1.1.1:80"]), settings(true));

        let response = fetcher
            .fetch(FetchRequest::get("http://example.com/x"))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_post_error_status_is_returned() {
        let transport = scripted(|request, _| ok(request, 503));
        let fetcher = Fetcher::new(transport.clone(), proxies(&[]), settings(false));

        let response = fetcher
            .fetch(FetchRequest::post("http://example.com/api", "id=1"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(transport.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_proxy_disabled_goes_direct() {
        let transport = scripted(|request, _| ok(request, 200));
        let fetcher = Fetcher::new(transport.clone(), proxies(&["1.1.1.1:80"]), settings(false));

        fetcher.fetch(FetchRequest::get("http://example.com/x")).await.unwrap();

        assert_eq!(transport.calls(), vec![None]);
        assert_eq!(fetcher.stats().direct_requests, 1);
    }

    #[tokio::test]
    async fn test_override_forces_direct() {
        let transport = scripted(|request, _| ok(request, 200));
        let fetcher = Fetcher::new(transport.clone(), proxies(&["1.1.1.1:80"]), settings(true));

        fetcher
            .fetch(FetchRequest::get("http://example.com/x").without_proxy())
            .await
            .unwrap();

        assert_eq!(transport.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_exhausted_pool_falls_back_immediately() {
        let transport = scripted(|request, _| ok(request, 200));
        let fetcher = Fetcher::new(transport.clone(), Box::new(FailingSource), settings(true));

        let response = fetcher
            .fetch(FetchRequest::get("http://example.com/x"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), vec![None]);
        assert_eq!(fetcher.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_direct_network_error_is_contained() {
        let transport =
            scripted(|_, _| Err(TransportError::Other("reset".to_string())));
        let fetcher = Fetcher::new(transport, proxies(&[]), settings(false));

        let result = fetcher.fetch(FetchRequest::get("http://example.com/x")).await;
        assert_eq!(
            result,
            Err(FetchFailure::Network {
                url: "http://example.com/x".to_string(),
                error: "reset".to_string(),
            })
        );
    }
}
