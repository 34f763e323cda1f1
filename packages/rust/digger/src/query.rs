//! Simple CSS-selector queries run against a page's DOM.
//!
//! The query language is deliberately tiny: a container, the items inside it,
//! and per-item named values taken from an element's `href` or text. It cannot
//! build URLs or combine page data, so a malicious query can at most reveal
//! that a page is being viewed.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use tabdrome_shared::{Result, TabdromeError};

/// Payload of a `round-trip` enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleQuery {
    /// Selects the single element holding all items. First match wins.
    pub container_selector: String,
    /// Selects the items within the container.
    pub item_selector: String,
    /// Output key → how to derive it from an item.
    pub values: BTreeMap<String, ValueQuery>,
}

/// How one named value is derived from an item element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueQuery {
    /// Selector relative to the item. `None` uses the item itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub extract: Extract,
    /// What to do when `selector` matches nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
    /// Value used by [`Fallback::Constant`].
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub fallback_value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Extract {
    /// The element's `href`, resolved against the document URL.
    Href,
    /// The element's text content.
    #[default]
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Fallback {
    Constant,
    UseSelf,
    UseDocumentUrlSansHash,
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| TabdromeError::validation(format!("invalid selector {selector:?}: {e}")))
}

impl SimpleQuery {
    /// Check that every selector in the query parses.
    pub fn validate(&self) -> Result<()> {
        parse_selector(&self.container_selector)?;
        parse_selector(&self.item_selector)?;
        for query in self.values.values() {
            if let Some(selector) = &query.selector {
                parse_selector(selector)?;
            }
        }
        Ok(())
    }

    /// Run the query over an HTML document located at `document_url`.
    ///
    /// Returns `Value::Null` when the container is missing, otherwise an array
    /// with one object per item. A value selector that misses without a
    /// fallback fails the whole query.
    pub fn run(&self, html: &str, document_url: &str) -> Result<Value> {
        let container_sel = parse_selector(&self.container_selector)?;
        let item_sel = parse_selector(&self.item_selector)?;
        let value_sels = self
            .values
            .iter()
            .map(|(key, q)| {
                let sel = q.selector.as_deref().map(parse_selector).transpose()?;
                Ok((key.as_str(), q, sel))
            })
            .collect::<Result<Vec<_>>>()?;

        let doc = Html::parse_document(html);
        let Some(container) = doc.select(&container_sel).next() else {
            return Ok(Value::Null);
        };
        let base = Url::parse(document_url).ok();

        let mut items = Vec::new();
        for item in container.select(&item_sel) {
            let mut out = serde_json::Map::new();
            for (key, query, sel) in &value_sels {
                let node = match sel {
                    Some(sel) => item.select(sel).next(),
                    None => Some(item),
                };
                let node = match (node, query.fallback) {
                    (Some(node), _) => node,
                    (None, Some(Fallback::Constant)) => {
                        out.insert((*key).to_string(), query.fallback_value.clone());
                        continue;
                    }
                    (None, Some(Fallback::UseDocumentUrlSansHash)) => {
                        let sans_hash = document_url.split('#').next().unwrap_or(document_url);
                        out.insert((*key).to_string(), Value::String(sans_hash.to_string()));
                        continue;
                    }
                    (None, Some(Fallback::UseSelf)) => item,
                    (None, None) => {
                        return Err(TabdromeError::Investigation(format!(
                            "selector {:?} matched nothing for value {key:?} on {document_url}",
                            query.selector.as_deref().unwrap_or_default()
                        )));
                    }
                };
                out.insert((*key).to_string(), extract(node, query.extract, base.as_ref()));
            }
            items.push(Value::Object(out));
        }
        Ok(Value::Array(items))
    }
}

fn extract(node: ElementRef<'_>, mode: Extract, base: Option<&Url>) -> Value {
    match mode {
        Extract::Text => Value::String(node.text().collect()),
        Extract::Href => match node.value().attr("href") {
            Some(href) => {
                let resolved = base
                    .and_then(|b| b.join(href).ok())
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| href.to_string());
                Value::String(resolved)
            }
            None => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn breadcrumb_query() -> SimpleQuery {
        serde_json::from_value(json!({
            "container_selector": "ol.crumbs",
            "item_selector": "li",
            "values": {
                "url": { "selector": "a", "extract": "href", "fallback": "constant" },
                "label": { "selector": "span", "extract": "text", "fallback": "use-self" }
            }
        }))
        .expect("valid query")
    }

    const PAGE: &str = r#"<html><body>
        <ol class="crumbs">
          <li><a href="/docs/"><span>Docs</span></a></li>
          <li><a href="guide/"><span>Guide</span></a></li>
          <li>Intro</li>
        </ol>
    </body></html>"#;

    #[test]
    fn extracts_items_with_fallbacks() {
        let result = breadcrumb_query()
            .run(PAGE, "https://docs.example.com/docs/intro#top")
            .expect("query runs");
        assert_eq!(
            result,
            json!([
                { "url": "https://docs.example.com/docs/", "label": "Docs" },
                { "url": "https://docs.example.com/docs/guide/", "label": "Guide" },
                { "url": null, "label": "Intro" }
            ])
        );
    }

    #[test]
    fn missing_container_is_null() {
        let result = breadcrumb_query()
            .run("<html><body><p>nothing</p></body></html>", "https://a.example/")
            .expect("query runs");
        assert!(result.is_null());
    }

    #[test]
    fn empty_container_is_empty_list() {
        let result = breadcrumb_query()
            .run(r#"<ol class="crumbs"></ol>"#, "https://a.example/")
            .expect("query runs");
        assert_eq!(result, json!([]));
    }

    #[test]
    fn document_url_fallback_drops_fragment() {
        let query: SimpleQuery = serde_json::from_value(json!({
            "container_selector": "ol",
            "item_selector": "li",
            "values": {
                "url": { "selector": "a", "extract": "href", "fallback": "use-document-url-sans-hash" }
            }
        }))
        .unwrap();
        let result = query
            .run("<ol><li>here</li></ol>", "https://a.example/page?x=1#frag")
            .unwrap();
        assert_eq!(result, json!([{ "url": "https://a.example/page?x=1" }]));
    }

    #[test]
    fn miss_without_fallback_is_an_error() {
        let query: SimpleQuery = serde_json::from_value(json!({
            "container_selector": "ol",
            "item_selector": "li",
            "values": { "label": { "selector": "b" } }
        }))
        .unwrap();
        let err = query.run("<ol><li>x</li></ol>", "https://a.example/").unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn invalid_selector_fails_validation() {
        let mut query = breadcrumb_query();
        query.item_selector = "li[".into();
        assert!(query.validate().is_err());
        assert!(breadcrumb_query().validate().is_ok());
    }
}
