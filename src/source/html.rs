//! HTML listing pages and HTML detail pages
//!
//! Listing keys come from an attribute (default `href`) of every element
//! matching `item-selector`. A detail record is built from the page's
//! `<meta>` tags, the configured `[source.fields]` selectors, and a `link`
//! column holding the item key.

use crate::config::SourceConfig;
use crate::fetch::{FetchRequest, Fetcher};
use crate::source::{
    DetailTemplate, ExtractError, Extractor, ListingError, ListingSource, ListingTemplate,
    Partition,
};
use crate::store::{FieldValue, ItemKey, Record};
use crate::{ConfigError, HarvestError};
use async_trait::async_trait;
use indexmap::IndexSet;
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

/// Prefixes dropped from `<meta>` names before they become columns
const META_PREFIXES: [&str; 2] = ["og:", "cXenseParse:"];

/// Configuration-driven HTML source
pub struct HtmlSource {
    listing: ListingTemplate,
    detail: DetailTemplate,
    item_selector: Selector,
    key_attribute: String,
    resolve_links: bool,
    fields: Vec<(String, Selector)>,
    fetcher: Arc<Fetcher>,
}

impl HtmlSource {
    pub fn new(config: &SourceConfig, fetcher: Arc<Fetcher>) -> Result<Self, HarvestError> {
        let item_css = config.item_selector.as_deref().ok_or_else(|| {
            ConfigError::Validation(format!("[{}] html sources require item-selector", config.name))
        })?;

        let fields = config
            .fields
            .iter()
            .map(|(name, css)| parse_selector(&config.name, css).map(|s| (name.clone(), s)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            listing: ListingTemplate::from_config(config),
            detail: DetailTemplate::from_config(config),
            item_selector: parse_selector(&config.name, item_css)?,
            key_attribute: config
                .key_attribute
                .clone()
                .unwrap_or_else(|| "href".to_string()),
            resolve_links: config.resolve_links,
            fields,
            fetcher,
        })
    }

    /// Builds a record from a detail page
    ///
    /// Returns `None` when the page carries neither meta tags nor any of the
    /// configured fields.
    fn parse_detail(&self, key: &ItemKey, body: &str) -> Option<Record> {
        let document = Html::parse_document(body);
        let mut record = Record::new();

        if let Ok(meta) = Selector::parse("meta[content]") {
            for element in document.select(&meta) {
                let attrs = element.value();
                let Some(content) = attrs.attr("content") else {
                    continue;
                };
                for name in [attrs.attr("name"), attrs.attr("property")].into_iter().flatten() {
                    record.insert(strip_meta_prefix(name), FieldValue::from(content));
                }
            }
        }

        for (name, selector) in &self.fields {
            let text = document
                .select(selector)
                .next()
                .map(|element| element.text().collect::<String>().trim().to_string())
                .unwrap_or_default();
            if !text.is_empty() {
                record.insert(name.clone(), FieldValue::Text(text));
            }
        }

        if record.is_empty() {
            return None;
        }
        record.insert("link".to_string(), FieldValue::from(key.as_str()));
        Some(record)
    }
}

impl ListingSource for HtmlSource {
    fn listing_request(&self, page: u32, partition: &Partition) -> FetchRequest {
        FetchRequest::get(self.listing.url(page, partition))
    }

    fn parse_listing(&self, page_url: &str, body: &str) -> Result<Vec<ItemKey>, ListingError> {
        let base = if self.resolve_links {
            Some(Url::parse(page_url).map_err(|e| {
                ListingError::InvalidPayload(format!("bad page URL '{}': {}", page_url, e))
            })?)
        } else {
            None
        };

        let document = Html::parse_document(body);
        let mut keys = IndexSet::new();

        for element in document.select(&self.item_selector) {
            let Some(raw) = element.value().attr(&self.key_attribute) else {
                continue;
            };
            let key = match &base {
                Some(base) => resolve_link(raw, base),
                None => Some(raw.trim().to_string()).filter(|k| !k.is_empty()),
            };
            if let Some(key) = key {
                keys.insert(ItemKey::new(key));
            }
        }

        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl Extractor for HtmlSource {
    async fn extract(&self, key: &ItemKey) -> Result<Option<Record>, ExtractError> {
        let response = self.fetcher.fetch(self.detail.request(key)).await?;

        match response.status {
            403 | 404 => {
                tracing::debug!("Detail {} answered {}", key, response.status);
                return Ok(None);
            }
            status if !response.is_success() => return Err(ExtractError::Status(status)),
            _ => {}
        }

        Ok(self.parse_detail(key, &response.body))
    }
}

fn parse_selector(source: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css)
        .map_err(|e| ConfigError::InvalidSelector(format!("[{}] '{}': {:?}", source, css, e)))
}

fn strip_meta_prefix(name: &str) -> String {
    META_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
        .to_string()
}

/// Resolves a link against the page URL
///
/// Returns None for empty, fragment-only and non-HTTP(S) links.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute.to_string())
        }
        _ => None,
    }
}
