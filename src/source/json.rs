//! JSON listing payloads and JSON detail APIs
//!
//! Listing keys live at `listing-key-path` inside a JSON document. The
//! document is either the listing response itself or the text of an element
//! matching `listing-json-selector` (a tracking blob embedded in the HTML).
//! Details are fetched from `detail-url` and mapped through the configured
//! `[[source.json-field]]` paths.

use crate::config::SourceConfig;
use crate::fetch::{FetchRequest, Fetcher};
use crate::source::{
    DetailTemplate, ExtractError, Extractor, ListingError, ListingSource, ListingTemplate,
    NestedPath, Partition,
};
use crate::store::{FieldValue, ItemKey, Record};
use crate::{ConfigError, HarvestError};
use async_trait::async_trait;
use indexmap::IndexSet;
use scraper::{Html, Selector};
use serde_json::Value;
use std::sync::Arc;

/// Configuration-driven JSON source
pub struct JsonSource {
    listing: ListingTemplate,
    detail: DetailTemplate,
    listing_selector: Option<Selector>,
    key_path: NestedPath,
    fields: Vec<(String, NestedPath)>,
    flatten_top_level: bool,
    fetcher: Arc<Fetcher>,
}

impl JsonSource {
    pub fn new(config: &SourceConfig, fetcher: Arc<Fetcher>) -> Result<Self, HarvestError> {
        let listing_selector = match &config.listing_json_selector {
            Some(css) => Some(Selector::parse(css).map_err(|e| {
                ConfigError::InvalidSelector(format!("[{}] '{}': {:?}", config.name, css, e))
            })?),
            None => None,
        };

        Ok(Self {
            listing: ListingTemplate::from_config(config),
            detail: DetailTemplate::from_config(config),
            listing_selector,
            key_path: config.listing_key_path.clone(),
            fields: config
                .json_fields
                .iter()
                .map(|f| (f.name.clone(), f.path.clone()))
                .collect(),
            flatten_top_level: config.flatten_top_level,
            fetcher,
        })
    }

    /// Text of the JSON document holding the listing keys
    fn listing_payload(&self, body: &str) -> Result<String, ListingError> {
        let Some(selector) = &self.listing_selector else {
            return Ok(body.to_string());
        };

        let document = Html::parse_document(body);
        document
            .select(selector)
            .next()
            .map(|element| element.text().collect::<String>())
            .ok_or(ListingError::MissingContainer)
    }

    /// Maps a detail payload to a record
    ///
    /// Configured fields come first, in configuration order; flattened
    /// top-level scalars follow without overriding them. Nulls are dropped.
    fn build_record(&self, payload: &Value) -> Record {
        let mut record = Record::new();

        for (name, path) in &self.fields {
            if let Some(value) = path.lookup(payload).and_then(FieldValue::from_json) {
                record.insert(name.clone(), value);
            }
        }

        if self.flatten_top_level {
            if let Some(object) = payload.as_object() {
                for (name, value) in object {
                    if value.is_object() || value.is_array() || record.contains_key(name) {
                        continue;
                    }
                    if let Some(value) = FieldValue::from_json(value) {
                        record.insert(name.clone(), value);
                    }
                }
            }
        }

        record
    }
}

impl ListingSource for JsonSource {
    fn listing_request(&self, page: u32, partition: &Partition) -> FetchRequest {
        FetchRequest::get(self.listing.url(page, partition))
    }

    fn parse_listing(&self, _page_url: &str, body: &str) -> Result<Vec<ItemKey>, ListingError> {
        let payload = self.listing_payload(body)?;
        let document: Value = serde_json::from_str(payload.trim())
            .map_err(|e| ListingError::InvalidPayload(e.to_string()))?;

        let found = self
            .key_path
            .lookup(&document)
            .ok_or(ListingError::MissingContainer)?;

        let candidates: Vec<&Value> = match found {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let keys: IndexSet<ItemKey> = candidates.into_iter().filter_map(scalar_key).collect();
        Ok(keys.into_iter().collect())
    }
}

#[async_trait]
impl Extractor for JsonSource {
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

        let payload: Value = serde_json::from_str(&response.body)?;
        if !payload.is_object() {
            return Err(ExtractError::Malformed(format!(
                "expected a JSON object for {}",
                key
            )));
        }

        let record = self.build_record(&payload);
        Ok((!record.is_empty()).then_some(record))
    }
}

/// Keys are strings or integers; anything else is ignored
fn scalar_key(value: &Value) -> Option<ItemKey> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(ItemKey::new(s.trim())),
        Value::Number(n) => Some(ItemKey::new(n.to_string())),
        _ => None,
    }
}
