//! Listing sources
//!
//! A source is the plug-in half of the pipeline. It knows how to:
//! - Build the listing request for a page and partition ([`ListingSource`])
//! - Pull item keys out of a listing page
//! - Turn one item key into a result record ([`Extractor`])
//!
//! Two configuration-driven adapters are provided: [`HtmlSource`] and
//! [`JsonSource`].

mod html;
mod json;
mod path;
pub mod template;

pub use html::HtmlSource;
pub use json::JsonSource;
pub use path::{NestedPath, PathSegment};

use crate::config::{DetailMethod, DimensionConfig, SourceConfig, SourceKind};
use crate::fetch::{FetchFailure, FetchRequest, Fetcher};
use crate::store::{ItemKey, Record};
use crate::HarvestError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::form_urlencoded;

/// Why a listing page yielded no keys
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    /// The element or JSON path holding the keys is not on the page
    #[error("listing container not found")]
    MissingContainer,

    #[error("invalid listing payload: {0}")]
    InvalidPayload(String),
}

/// Why an item could not be extracted
///
/// The collector treats every variant like an empty extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchFailure),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("malformed detail page: {0}")]
    Malformed(String),
}

/// Discovery half of a source
pub trait ListingSource: Send + Sync {
    /// Request for one listing page of one partition
    fn listing_request(&self, page: u32, partition: &Partition) -> FetchRequest;

    /// Keys found on a listing page, in page order
    ///
    /// `page_url` is the final URL of the page and is used to resolve
    /// relative links.
    fn parse_listing(&self, page_url: &str, body: &str) -> Result<Vec<ItemKey>, ListingError>;
}

/// Detail half of a source
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Fetches and extracts one item
    ///
    /// `Ok(None)` means the item exists but produced nothing usable (for
    /// example a blocked or removed listing).
    async fn extract(&self, key: &ItemKey) -> Result<Option<Record>, ExtractError>;
}

/// A complete source: listing discovery plus detail extraction
pub trait Source: ListingSource + Extractor {}

impl<T: ListingSource + Extractor> Source for T {}

/// Builds the adapter selected by `config.kind`
pub fn build_source(
    config: &SourceConfig,
    fetcher: Arc<Fetcher>,
) -> Result<Box<dyn Source>, HarvestError> {
    match config.kind {
        SourceKind::Html => Ok(Box::new(HtmlSource::new(config, fetcher)?)),
        SourceKind::Json => Ok(Box::new(JsonSource::new(config, fetcher)?)),
    }
}

// ===== Partitions =====

/// One combination of dimension values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    values: Vec<(String, String)>,
}

impl Partition {
    /// The single partition of a source without dimensions
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(values: Vec<(String, String)>) -> Self {
        Self { values }
    }

    /// Values joined with `_`, or `all` when there are none
    pub fn label(&self) -> String {
        if self.values.is_empty() {
            return "all".to_string();
        }
        self.values
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(name, _)| name == dimension)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self) -> &[(String, String)] {
        &self.values
    }

    /// Cross product of all dimension values, first dimension varying slowest
    pub fn expand(dimensions: &[DimensionConfig]) -> Vec<Partition> {
        dimensions.iter().fold(vec![Partition::all()], |acc, dimension| {
            acc.iter()
                .flat_map(|partial| {
                    dimension.values.iter().map(move |value| {
                        let mut values = partial.values.clone();
                        values.push((dimension.name.clone(), value.clone()));
                        Partition { values }
                    })
                })
                .collect()
        })
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("all");
        }
        let pairs: Vec<String> = self
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        f.write_str(&pairs.join(", "))
    }
}

// ===== Request templates =====

/// Renders listing page URLs
#[derive(Debug, Clone)]
pub struct ListingTemplate {
    url: String,
    first_page_url: Option<String>,
    page_size: u32,
}

impl ListingTemplate {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            url: config.listing_url.clone(),
            first_page_url: config.first_page_url.clone(),
            page_size: config.page_size,
        }
    }

    /// URL of `page` for `partition`
    ///
    /// `{page}` is the 1-based page number and `{offset}` the 1-based index
    /// of the first item on the page. Page 1 uses `first-page-url` when set.
    /// Dimension values are percent-encoded.
    pub fn url(&self, page: u32, partition: &Partition) -> String {
        let pattern = match (&self.first_page_url, page) {
            (Some(first), 1) => first,
            _ => &self.url,
        };
        let offset = u64::from(self.page_size) * u64::from(page.saturating_sub(1)) + 1;

        template::render(pattern, |name| match name {
            "page" => Some(page.to_string()),
            "offset" => Some(offset.to_string()),
            other => partition
                .get(other)
                .map(|value| urlencoding::encode(value).into_owned()),
        })
    }
}

/// Renders detail requests for an item key
#[derive(Debug, Clone)]
pub struct DetailTemplate {
    url: Option<String>,
    method: DetailMethod,
    body: Option<String>,
    headers: Vec<(String, String)>,
    skip_proxy: bool,
}

impl DetailTemplate {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            url: config.detail_url.clone(),
            method: config.detail_method,
            body: config.detail_body.clone(),
            headers: config
                .detail_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            skip_proxy: config.skip_proxy,
        }
    }

    /// Request for one item; without `detail-url` the key itself is the URL
    ///
    /// `{key}` is percent-encoded in the URL and form-encoded in the body.
    /// A body sent with a custom `Content-Type` gets the key verbatim.
    pub fn request(&self, key: &ItemKey) -> FetchRequest {
        let url = match &self.url {
            Some(pattern) => template::render(pattern, |name| {
                (name == "key").then(|| urlencoding::encode(key.as_str()).into_owned())
            }),
            None => key.to_string(),
        };

        let mut request = match self.method {
            DetailMethod::Get => FetchRequest::get(url),
            DetailMethod::Post => {
                let has_content_type = self
                    .headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
                let body = self
                    .body
                    .as_deref()
                    .map(|pattern| {
                        template::render(pattern, |name| {
                            (name == "key").then(|| {
                                if has_content_type {
                                    key.to_string()
                                } else {
                                    form_urlencoded::byte_serialize(key.as_str().as_bytes())
                                        .collect()
                                }
                            })
                        })
                    })
                    .unwrap_or_default();

                let mut request = FetchRequest::post(url, body);
                if !has_content_type {
                    request = request
                        .with_header("Content-Type", "application/x-www-form-urlencoded");
                }
                request
            }
        };

        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if self.skip_proxy {
            request = request.without_proxy();
        }
        request
    }
}
