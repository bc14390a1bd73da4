use crate::config::types::{Config, OutputConfig, RequestConfig, SourceConfig, SourceKind};
use crate::fetch::ProxyEndpoint;
use crate::source::template;
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Placeholders every template may use besides dimension names
const BUILTIN_PLACEHOLDERS: [&str; 3] = ["page", "offset", "key"];

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_request_config(&config.requests)?;
    validate_output_config(&config.output)?;

    let mut names = HashSet::new();
    for source in &config.sources {
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                source.name
            )));
        }
        validate_source(source)?;
    }

    Ok(())
}

fn validate_request_config(config: &RequestConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Url::parse(&config.proxy_list_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy-list-url: {}", e)))?;

    for proxy in &config.proxies {
        proxy.parse::<ProxyEndpoint>().map_err(|e| {
            ConfigError::Validation(format!("invalid proxy '{}': {}", proxy, e))
        })?;
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.root.is_empty() {
        return Err(ConfigError::Validation("output root cannot be empty".to_string()));
    }

    if config.snapshot_interval < 1 {
        return Err(ConfigError::Validation(format!(
            "snapshot-interval must be >= 1, got {}",
            config.snapshot_interval
        )));
    }

    if config.batch_size == Some(0) {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates one source entry
fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    if source.name.is_empty() {
        return Err(ConfigError::Validation("source name cannot be empty".to_string()));
    }

    if !source
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "source name must contain only alphanumeric characters, '-' and '_', got '{}'",
            source.name
        )));
    }

    if source.from_page < 1 {
        return Err(ConfigError::Validation(format!(
            "[{}] from-page must be >= 1",
            source.name
        )));
    }

    if source.pages < 1 {
        return Err(ConfigError::Validation(format!(
            "[{}] pages must be >= 1",
            source.name
        )));
    }

    if source.from_page.checked_add(source.pages).is_none() {
        return Err(ConfigError::Validation(format!(
            "[{}] from-page + pages is out of range",
            source.name
        )));
    }

    if source.ids_filename.is_empty() || source.result_filename.is_empty() {
        return Err(ConfigError::Validation(format!(
            "[{}] ids-filename and result-filename cannot be empty",
            source.name
        )));
    }
    validate_file_component(source, "ids-filename", &source.ids_filename)?;
    validate_file_component(source, "result-filename", &source.result_filename)?;

    let mut dimension_names = HashSet::new();
    for dimension in &source.dimensions {
        if dimension.name.is_empty() || dimension.values.is_empty() {
            return Err(ConfigError::Validation(format!(
                "[{}] every dimension needs a name and at least one value",
                source.name
            )));
        }
        for value in &dimension.values {
            validate_file_component(source, &format!("dimension '{}'", dimension.name), value)?;
        }
        if BUILTIN_PLACEHOLDERS.contains(&dimension.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "[{}] dimension name '{}' is reserved",
                source.name, dimension.name
            )));
        }
        if !dimension_names.insert(dimension.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "[{}] duplicate dimension '{}'",
                source.name, dimension.name
            )));
        }
    }

    validate_url_template(source, "listing-url", &source.listing_url, &dimension_names)?;
    if let Some(first) = &source.first_page_url {
        validate_url_template(source, "first-page-url", first, &dimension_names)?;
    }
    if let Some(detail) = &source.detail_url {
        validate_url_template(source, "detail-url", detail, &dimension_names)?;
    }

    match source.kind {
        SourceKind::Html => {
            let selector = source.item_selector.as_deref().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "[{}] html sources require item-selector",
                    source.name
                ))
            })?;
            validate_selector(source, selector)?;
            for css in source.fields.values() {
                validate_selector(source, css)?;
            }
        }
        SourceKind::Json => {
            if source.detail_url.is_none() {
                return Err(ConfigError::Validation(format!(
                    "[{}] json sources require detail-url",
                    source.name
                )));
            }
            if let Some(selector) = &source.listing_json_selector {
                validate_selector(source, selector)?;
            }
            if source.json_fields.is_empty() && !source.flatten_top_level {
                return Err(ConfigError::Validation(format!(
                    "[{}] json sources need json-field entries or flatten-top-level",
                    source.name
                )));
            }
        }
    }

    Ok(())
}

/// Checks placeholder names and that the rendered template is a valid URL
fn validate_url_template(
    source: &SourceConfig,
    label: &str,
    value: &str,
    dimensions: &HashSet<&str>,
) -> Result<(), ConfigError> {
    for name in template::placeholders(value) {
        if !BUILTIN_PLACEHOLDERS.contains(&name) && !dimensions.contains(name) {
            return Err(ConfigError::Validation(format!(
                "[{}] {} uses unknown placeholder '{{{}}}'",
                source.name, label, name
            )));
        }
    }

    let sample = template::render(value, |_| Some("1".to_string()));
    Url::parse(&sample).map_err(|e| {
        ConfigError::InvalidUrl(format!("[{}] {} '{}': {}", source.name, label, value, e))
    })?;

    Ok(())
}

/// Values that end up in snapshot file names must stay inside the output root
fn validate_file_component(
    source: &SourceConfig,
    label: &str,
    value: &str,
) -> Result<(), ConfigError> {
    if value.is_empty() || value.contains(&['/', '\\'][..]) || value.contains("..") {
        return Err(ConfigError::Validation(format!(
            "[{}] {} value '{}' must be a plain file name component",
            source.name, label, value
        )));
    }
    Ok(())
}

fn validate_selector(source: &SourceConfig, css: &str) -> Result<(), ConfigError> {
    Selector::parse(css).map_err(|e| {
        ConfigError::InvalidSelector(format!("[{}] '{}': {:?}", source.name, css, e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{DetailMethod, DimensionConfig};
    use std::collections::BTreeMap;

    fn html_source() -> SourceConfig {
        SourceConfig {
            name: "lavoz".to_string(),
            kind: SourceKind::Html,
            from_page: 1,
            pages: 2,
            page_size: 48,
            ids_filename: "lavoz".to_string(),
            result_filename: "lavoz_houses".to_string(),
            dimensions: vec![DimensionConfig {
                name: "publisher".to_string(),
                values: vec!["owner".to_string()],
            }],
            listing_url: "https://example.com/search?seller={publisher}&page={page}".to_string(),
            first_page_url: None,
            item_selector: Some("a.listing".to_string()),
            key_attribute: None,
            resolve_links: true,
            listing_json_selector: None,
            listing_key_path: Default::default(),
            detail_url: None,
            detail_method: DetailMethod::Get,
            detail_body: None,
            detail_headers: BTreeMap::new(),
            skip_proxy: false,
            fields: BTreeMap::new(),
            json_fields: vec![],
            flatten_top_level: false,
        }
    }

    #[test]
    fn test_valid_html_source() {
        assert!(validate_source(&html_source()).is_ok());
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        let mut source = html_source();
        source.listing_url = "https://example.com/{province}/{page}".to_string();
        assert!(matches!(
            validate_source(&source),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_literal_json_braces_are_not_placeholders() {
        let mut source = html_source();
        source.listing_url =
            r#"https://example.com/buscar?filters={"vendedor":["{publisher}"]}&page={page}"#
                .to_string();
        assert!(validate_source(&source).is_ok());
    }

    #[test]
    fn test_html_source_requires_selector() {
        let mut source = html_source();
        source.item_selector = None;
        assert!(validate_source(&source).is_err());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut source = html_source();
        source.item_selector = Some("a[[".to_string());
        assert!(matches!(
            validate_source(&source),
            Err(ConfigError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_reserved_dimension_name() {
        let mut source = html_source();
        source.dimensions[0].name = "page".to_string();
        assert!(validate_source(&source).is_err());
    }

    #[test]
    fn test_json_source_requires_detail_url() {
        let mut source = html_source();
        source.kind = SourceKind::Json;
        source.flatten_top_level = true;
        assert!(validate_source(&source).is_err());

        source.detail_url = Some("https://api.example.com/items/{key}".to_string());
        assert!(validate_source(&source).is_ok());
    }

    #[test]
    fn test_page_range_overflow_rejected() {
        let mut source = html_source();
        source.from_page = u32::MAX;
        source.pages = 2;
        assert!(matches!(
            validate_source(&source),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_path_components_rejected_in_file_names() {
        let mut source = html_source();
        source.ids_filename = "../outside".to_string();
        assert!(validate_source(&source).is_err());

        let mut source = html_source();
        source.result_filename = "nested/houses".to_string();
        assert!(validate_source(&source).is_err());

        let mut source = html_source();
        source.dimensions[0].values = vec!["owner".to_string(), "a\\b".to_string()];
        assert!(validate_source(&source).is_err());
    }

    #[test]
    fn test_zero_pages_rejected() {
        let mut source = html_source();
        source.pages = 0;
        assert!(validate_source(&source).is_err());
    }
}
