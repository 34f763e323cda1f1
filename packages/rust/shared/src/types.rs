//! Core domain types for Tabdrome: browser tabs as delivered by the browser,
//! their normalized form, and the enrichment specifications that decorate them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Value of the process-wide monotonic change counter.
pub type Serial = u64;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Browser-allocated tab id. Volatile across browser sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser-allocated window id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// "Sufficiently unique id": the stable join key for a tab across the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Suid(pub String);

impl Suid {
    /// Derive the surrogate id for a browser tab id.
    pub fn for_tab(id: TabId) -> Self {
        Self(format!("!{}", id.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Suid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ParsedUrl
// ---------------------------------------------------------------------------

/// A URL broken into the independent components consumers match against.
///
/// Field semantics follow the WHATWG `URL` accessors: `search` and `hash` keep
/// their leading `?`/`#` and are empty when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedUrl {
    pub href: String,
    pub protocol: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
    pub username: String,
    pub password: String,
    pub origin: String,
    #[serde(default)]
    pub search_params: BTreeMap<String, String>,
}

impl ParsedUrl {
    /// Parse `raw`. Unparseable input is kept verbatim as `href` with an
    /// opaque `"null"` origin so that a bad URL never fails a tab event.
    pub fn parse(raw: &str) -> Self {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!(url = raw, error = %e, "unparseable tab URL, keeping it opaque");
                return Self::opaque(raw);
            }
        };

        let hostname = url.host_str().unwrap_or("").to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() {
            hostname.clone()
        } else {
            format!("{hostname}:{port}")
        };

        Self {
            href: url.to_string(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            port,
            pathname: url.path().to_string(),
            search: url
                .query()
                .filter(|q| !q.is_empty())
                .map(|q| format!("?{q}"))
                .unwrap_or_default(),
            hash: url
                .fragment()
                .filter(|f| !f.is_empty())
                .map(|f| format!("#{f}"))
                .unwrap_or_default(),
            username: url.username().to_string(),
            password: url.password().unwrap_or("").to_string(),
            origin: url.origin().ascii_serialization(),
            search_params: url.query_pairs().into_owned().collect(),
        }
    }

    fn opaque(raw: &str) -> Self {
        Self {
            href: raw.to_string(),
            protocol: String::new(),
            host: String::new(),
            hostname: String::new(),
            port: String::new(),
            pathname: String::new(),
            search: String::new(),
            hash: String::new(),
            username: String::new(),
            password: String::new(),
            origin: "null".into(),
            search_params: BTreeMap::new(),
        }
    }

    /// The URL with any fragment removed.
    pub fn sans_hash(&self) -> &str {
        self.href.split('#').next().unwrap_or(&self.href)
    }
}

// ---------------------------------------------------------------------------
// RawTab
// ---------------------------------------------------------------------------

/// A tab exactly as the browser's `tabs` API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTab {
    pub id: TabId,
    pub window_id: WindowId,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_tab_id: Option<TabId>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub pinned: bool,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub incognito: bool,
    #[serde(default)]
    pub audible: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

// ---------------------------------------------------------------------------
// NormalizedTab
// ---------------------------------------------------------------------------

/// One live browser tab, normalized and version-stamped by the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTab {
    pub id: TabId,
    /// Never changes for the life of the tab.
    pub suid: Suid,
    /// Global serial at the most recent mutation of this tab.
    pub serial: Serial,
    pub created_at: DateTime<Utc>,
    pub window_id: WindowId,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_tab_id: Option<TabId>,
    pub active: bool,
    /// Serial of the last activation of this tab, 0 if never activated.
    pub last_activated_serial: Serial,
    pub pinned: bool,
    pub parsed_url: ParsedUrl,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub incognito: bool,
    pub audible: bool,
    pub muted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Enrichment key → externally derived value. Absent means unknown.
    #[serde(default)]
    pub from_content: BTreeMap<String, serde_json::Value>,
}

impl NormalizedTab {
    /// Normalize a freshly observed browser tab, stamped with `serial`.
    pub fn from_raw(raw: &RawTab, serial: Serial) -> Self {
        Self {
            id: raw.id,
            suid: Suid::for_tab(raw.id),
            serial,
            created_at: Utc::now(),
            window_id: raw.window_id,
            index: raw.index,
            opener_tab_id: raw.opener_tab_id,
            active: raw.active,
            last_activated_serial: if raw.active { serial } else { 0 },
            pinned: raw.pinned,
            parsed_url: ParsedUrl::parse(&raw.url),
            title: raw.title.clone(),
            fav_icon_url: raw.fav_icon_url.clone(),
            status: raw.status.clone(),
            incognito: raw.incognito,
            audible: raw.audible,
            muted: raw.muted,
            width: raw.width,
            height: raw.height,
            from_content: BTreeMap::new(),
        }
    }

    /// Resolve an attribute path (e.g. `url.href`, `title`,
    /// `url.search_params.q`) against the tab's current state.
    pub fn attr(&self, path: &str) -> Option<String> {
        if let Some(rest) = path.strip_prefix("url.") {
            let url = &self.parsed_url;
            if let Some(param) = rest.strip_prefix("search_params.") {
                return url.search_params.get(param).cloned();
            }
            let value = match rest {
                "href" => &url.href,
                "protocol" => &url.protocol,
                "host" => &url.host,
                "hostname" => &url.hostname,
                "port" => &url.port,
                "pathname" => &url.pathname,
                "search" => &url.search,
                "hash" => &url.hash,
                "origin" => &url.origin,
                "sans_hash" => return Some(url.sans_hash().to_string()),
                _ => return None,
            };
            return Some(value.clone());
        }

        match path {
            "id" => Some(self.id.to_string()),
            "suid" => Some(self.suid.to_string()),
            "window_id" => Some(self.window_id.to_string()),
            "index" => Some(self.index.to_string()),
            "title" => Some(self.title.clone()),
            "status" => self.status.clone(),
            "pinned" => Some(self.pinned.to_string()),
            "active" => Some(self.active.to_string()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichmentSpec
// ---------------------------------------------------------------------------

/// Declares how one enrichment key is derived for tabs of one origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSpec {
    /// Stable id of this enrichment; part of the investigation cache key.
    pub enrichment_id: String,
    /// Origin (as in `URL.origin`) whose tabs this enrichment applies to.
    pub origin: String,
    /// The `from_content` key the result is stored under.
    pub provides: String,
    /// `round-trip` or `pure-extraction`.
    pub engine: String,
    /// Attribute paths whose concatenated values form the cache key.
    /// `None` opts out of caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key_spec: Option<Vec<String>>,
    /// Constraint name → attribute path the result depends on.
    #[serde(default = "default_constraint_spec")]
    pub constraint_spec: BTreeMap<String, String>,
    /// Engine-specific payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
}

fn default_constraint_spec() -> BTreeMap<String, String> {
    BTreeMap::from([("url".to_string(), "url.href".to_string())])
}
