//! `{placeholder}` substitution for URL and body templates
//!
//! A placeholder is a brace pair around a non-empty run of alphanumerics,
//! `-` and `_`. Anything else between braces (JSON filter payloads, for
//! instance) is literal text.

/// Locates the next placeholder at or after `from`
///
/// Returns the byte range of the whole `{name}` token.
fn next_placeholder(template: &str, from: usize) -> Option<(usize, usize)> {
    let mut start = from;
    while let Some(offset) = template[start..].find('{') {
        let open = start + offset;
        let rest = &template[open + 1..];
        if let Some(len) = rest.find('}') {
            let name = &rest[..len];
            if is_placeholder_name(name) {
                return Some((open, open + len + 2));
            }
        }
        start = open + 1;
    }
    None
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Lists placeholder names in order of appearance
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut cursor = 0;
    while let Some((start, end)) = next_placeholder(template, cursor) {
        names.push(&template[start + 1..end - 1]);
        cursor = end;
    }
    names
}

/// Substitutes every placeholder `lookup` knows; unknown ones stay verbatim
pub fn render<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    while let Some((start, end)) = next_placeholder(template, cursor) {
        out.push_str(&template[cursor..start]);
        let name = &template[start + 1..end - 1];
        match lookup(name) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&template[start..end]),
        }
        cursor = end;
    }
    out.push_str(&template[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("https://{province}.example.com/p-{page}"),
            vec!["province", "page"]
        );
        assert!(placeholders("https://example.com/").is_empty());
    }

    #[test]
    fn test_json_literal_is_not_a_placeholder() {
        let template = r#"filters={"seller":["{publisher}"]}&p={page}"#;
        assert_eq!(placeholders(template), vec!["publisher", "page"]);
    }

    #[test]
    fn test_render_substitutes_known_names() {
        let rendered = render("/{a}/{b}/{c}", |name| match name {
            "a" => Some("1".to_string()),
            "c" => Some("3".to_string()),
            _ => None,
        });
        assert_eq!(rendered, "/1/{b}/3");
    }

    #[test]
    fn test_render_keeps_literal_braces() {
        let rendered = render(r#"{"id":"{key}"}"#, |_| Some("42".to_string()));
        assert_eq!(rendered, r#"{"id":"42"}"#);
    }
}
