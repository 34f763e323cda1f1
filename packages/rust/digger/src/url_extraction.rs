//! Synchronous enrichment derived from a tab's own URL and title.
//!
//! Generated URLs are always rebuilt on the tab's origin so an extraction rule
//! cannot be used to point the UI at another site.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use url::Url;

use tabdrome_shared::{NormalizedTab, Result, TabdromeError};

static URL_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)url").expect("valid regex"));

/// Payload of a `pure-extraction` enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlExtractionSpec {
    pub patterns: Vec<UrlPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlPattern {
    #[serde(rename = "match")]
    pub matcher: PathMatch,
    /// One output object per entry.
    pub results: Vec<BTreeMap<String, ValueDef>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname: Option<String>,
}

/// How one output value is produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ValueDef {
    /// A same-origin URL built from `pathname` relative to the tab's URL.
    /// A `null` search param value emits the bare key; a param the tab lacks
    /// is left out.
    Url {
        pathname: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        search_params: Option<BTreeMap<String, Option<Part>>>,
    },
    /// The tab's URL without its fragment.
    SameUrl,
    TabTitle,
    /// Concatenation of parts.
    String { parts: Vec<Part> },
}

impl ValueDef {
    fn is_url(&self) -> bool {
        matches!(self, ValueDef::Url { .. } | ValueDef::SameUrl)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Literal(String),
    SearchParam {
        #[serde(rename = "search-param")]
        search_param: String,
    },
}

impl Part {
    fn resolve(&self, tab: &NormalizedTab) -> Option<String> {
        match self {
            Part::Literal(s) => Some(s.clone()),
            Part::SearchParam { search_param } => {
                tab.parsed_url.search_params.get(search_param).cloned()
            }
        }
    }
}

impl UrlExtractionSpec {
    /// Reject URL-ish keys that are not built as URLs.
    pub fn validate(&self) -> Result<()> {
        for pattern in &self.patterns {
            for piece in &pattern.results {
                for (key, def) in piece {
                    check_url_key(key, def)?;
                }
            }
        }
        Ok(())
    }

    /// Run the first pattern whose pathname matches the tab. `None` when no
    /// pattern matches or any value fails to build.
    pub fn extract(&self, tab: &NormalizedTab) -> Option<Value> {
        let pattern = self.patterns.iter().find(|p| {
            p.matcher
                .pathname
                .as_deref()
                .is_some_and(|path| path == tab.parsed_url.pathname)
        })?;

        let pieces = pattern
            .results
            .iter()
            .map(|piece| populate_piece(piece, tab))
            .collect::<Result<Vec<_>>>();

        match pieces {
            Ok(pieces) => Some(Value::Array(pieces)),
            Err(e) => {
                warn!(tab_id = %tab.id, error = %e, "url extraction failed");
                None
            }
        }
    }
}

fn check_url_key(key: &str, def: &ValueDef) -> Result<()> {
    if URL_KEY_RE.is_match(key) && !def.is_url() {
        return Err(TabdromeError::validation(format!(
            "key {key:?} must be built with a url or same-url value"
        )));
    }
    Ok(())
}

fn populate_piece(piece: &BTreeMap<String, ValueDef>, tab: &NormalizedTab) -> Result<Value> {
    let mut out = serde_json::Map::new();
    for (key, def) in piece {
        check_url_key(key, def)?;
        let value = match def {
            ValueDef::Url {
                pathname,
                search_params,
            } => build_url(pathname, search_params.as_ref(), tab)?,
            ValueDef::SameUrl => {
                let url = &tab.parsed_url;
                format!("{}{}{}", url.origin, url.pathname, url.search)
            }
            ValueDef::TabTitle => tab.title.clone(),
            ValueDef::String { parts } => parts
                .iter()
                .filter_map(|p| p.resolve(tab))
                .collect::<String>(),
        };
        out.insert(key.clone(), Value::String(value));
    }
    Ok(Value::Object(out))
}

fn build_url(
    pathname: &str,
    search_params: Option<&BTreeMap<String, Option<Part>>>,
    tab: &NormalizedTab,
) -> Result<String> {
    let base = Url::parse(&tab.parsed_url.href)
        .map_err(|e| TabdromeError::parse(format!("tab url {}: {e}", tab.parsed_url.href)))?;
    let mut url = base
        .join(pathname)
        .map_err(|e| TabdromeError::parse(format!("pathname {pathname:?}: {e}")))?;

    if url.origin().ascii_serialization() != tab.parsed_url.origin {
        return Err(TabdromeError::validation(format!(
            "pathname {pathname:?} changes the origin"
        )));
    }

    url.set_fragment(None);
    url.set_query(None);
    // Credentials are not part of the origin; never carry them over.
    let _ = url.set_username("");
    let _ = url.set_password(None);

    // An explicit null is a bare key; a part that resolves to nothing is skipped.
    let pairs: Vec<(&str, Option<String>)> = search_params
        .into_iter()
        .flatten()
        .filter_map(|(key, part)| match part {
            None => Some((key.as_str(), None)),
            Some(part) => part.resolve(tab).map(|value| (key.as_str(), Some(value))),
        })
        .collect();
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            match value {
                Some(value) => query.append_pair(key, &value),
                None => query.append_key_only(key),
            };
        }
    }
    Ok(url.to_string())
}
