//! Enrichment definitions grouped by the origin they apply to.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, warn};

use tabdrome_shared::{EnrichmentSpec, NormalizedTab, Result, TabdromeError};

use crate::query::SimpleQuery;
use crate::url_extraction::UrlExtractionSpec;

/// Engine name for enrichments answered by an investigator round trip.
pub const ROUND_TRIP: &str = "round-trip";
/// Engine name for enrichments computed from the tab itself.
pub const PURE_EXTRACTION: &str = "pure-extraction";
/// ASCII unit separator between cache key attribute values.
pub const CACHE_KEY_SEPARATOR: &str = "\u{1f}";

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

/// A validated engine with its typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentEngine {
    RoundTrip(SimpleQuery),
    PureExtraction(UrlExtractionSpec),
}

impl EnrichmentEngine {
    pub fn name(&self) -> &'static str {
        match self {
            EnrichmentEngine::RoundTrip(_) => ROUND_TRIP,
            EnrichmentEngine::PureExtraction(_) => PURE_EXTRACTION,
        }
    }
}

/// One enrichment, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub id: String,
    pub origin: String,
    /// The `from_content` key this enrichment writes.
    pub provides: String,
    pub cache_key_spec: Option<Vec<String>>,
    pub constraint_spec: BTreeMap<String, String>,
    pub engine: EnrichmentEngine,
    /// The raw payload, as sent to investigators.
    pub payload: Value,
}

impl Enrichment {
    /// Validate a configured spec.
    pub fn from_spec(spec: &EnrichmentSpec) -> Result<Self> {
        let engine = match spec.engine.as_str() {
            ROUND_TRIP => {
                let query: SimpleQuery = serde_json::from_value(spec.spec.clone())
                    .map_err(|e| TabdromeError::validation(format!("round-trip payload: {e}")))?;
                query.validate()?;
                EnrichmentEngine::RoundTrip(query)
            }
            PURE_EXTRACTION => {
                let extraction: UrlExtractionSpec = serde_json::from_value(spec.spec.clone())
                    .map_err(|e| {
                        TabdromeError::validation(format!("pure-extraction payload: {e}"))
                    })?;
                extraction.validate()?;
                EnrichmentEngine::PureExtraction(extraction)
            }
            other => {
                return Err(TabdromeError::validation(format!(
                    "unknown enrichment engine {other:?}"
                )));
            }
        };

        if spec.constraint_spec.is_empty() {
            return Err(TabdromeError::validation(
                "constraint_spec must name at least one attribute",
            ));
        }

        Ok(Self {
            id: spec.enrichment_id.clone(),
            origin: spec.origin.clone(),
            provides: spec.provides.clone(),
            cache_key_spec: spec.cache_key_spec.clone(),
            constraint_spec: spec.constraint_spec.clone(),
            engine,
            payload: spec.spec.clone(),
        })
    }

    /// Cache key for `tab`: the values of the cache key attributes joined by
    /// [`CACHE_KEY_SEPARATOR`]. `None` when the enrichment is uncacheable or
    /// an attribute is absent on this tab.
    pub fn cache_key(&self, tab: &NormalizedTab) -> Option<String> {
        let spec = self.cache_key_spec.as_ref()?;
        spec.iter()
            .map(|path| tab.attr(path))
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(CACHE_KEY_SEPARATOR))
    }
}

// ---------------------------------------------------------------------------
// EnrichmentRegistry
// ---------------------------------------------------------------------------

/// All known enrichments, grouped by origin in configuration order.
#[derive(Debug, Default, Clone)]
pub struct EnrichmentRegistry {
    by_origin: HashMap<String, Vec<Arc<Enrichment>>>,
}

impl EnrichmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration. Invalid specs are logged and skipped; their
    /// keys stay unset until the configuration is fixed.
    pub fn from_specs(specs: &[EnrichmentSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            match Enrichment::from_spec(spec) {
                Ok(enrichment) => registry.register(enrichment),
                Err(e) => error!(
                    enrichment_id = %spec.enrichment_id,
                    engine = %spec.engine,
                    error = %e,
                    "skipping invalid enrichment"
                ),
            }
        }
        registry
    }

    /// Add an enrichment. A second enrichment providing the same key for the
    /// same origin is ignored.
    pub fn register(&mut self, enrichment: Enrichment) {
        let list = self.by_origin.entry(enrichment.origin.clone()).or_default();
        if list.iter().any(|e| e.provides == enrichment.provides) {
            warn!(
                origin = %enrichment.origin,
                key = %enrichment.provides,
                enrichment_id = %enrichment.id,
                "key already provided for this origin, ignoring"
            );
            return;
        }
        debug!(origin = %enrichment.origin, key = %enrichment.provides, "registered enrichment");
        list.push(Arc::new(enrichment));
    }

    /// Enrichments for an origin, in registration order.
    pub fn for_origin(&self, origin: &str) -> &[Arc<Enrichment>] {
        self.by_origin.get(origin).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `enrichment_id` is registered for `origin`.
    pub fn contains(&self, origin: &str, enrichment_id: &str) -> bool {
        self.for_origin(origin).iter().any(|e| e.id == enrichment_id)
    }

    pub fn len(&self) -> usize {
        self.by_origin.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tabdrome_shared::default_enrichments;

    use super::*;

    fn spec(id: &str, engine: &str, payload: Value) -> EnrichmentSpec {
        EnrichmentSpec {
            enrichment_id: id.into(),
            origin: "https://a.example".into(),
            provides: "breadcrumbs".into(),
            engine: engine.into(),
            cache_key_spec: None,
            constraint_spec: [("url".to_string(), "url.href".to_string())].into(),
            spec: payload,
        }
    }

    #[test]
    fn default_enrichments_are_valid() {
        let registry = EnrichmentRegistry::from_specs(&default_enrichments());
        assert_eq!(registry.len(), 1);
        let mdn = registry.for_origin("https://developer.mozilla.org");
        assert_eq!(mdn[0].engine.name(), ROUND_TRIP);
        assert_eq!(mdn[0].provides, "breadcrumbs");
    }

    #[test]
    fn unknown_engine_is_skipped() {
        let registry =
            EnrichmentRegistry::from_specs(&[spec("x", "telepathy", json!({}))]);
        assert!(registry.is_empty());
        assert!(registry.for_origin("https://a.example").is_empty());
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let registry = EnrichmentRegistry::from_specs(&[spec(
            "x",
            PURE_EXTRACTION,
            json!({ "patterns": "nope" }),
        )]);
        assert!(registry.is_empty());
    }

    #[test]
    fn cache_key_keeps_attribute_boundaries() {
        let mut with_key = spec("x", PURE_EXTRACTION, json!({ "patterns": [] }));
        with_key.cache_key_spec = Some(vec!["title".into(), "url.search_params.q".into()]);
        let enrichment = Enrichment::from_spec(&with_key).unwrap();

        let tab = |url: &str, title: &str| {
            let raw: tabdrome_shared::RawTab = serde_json::from_value(json!({
                "id": 1, "windowId": 1, "index": 0, "url": url, "title": title
            }))
            .unwrap();
            NormalizedTab::from_raw(&raw, 1)
        };
        let a = enrichment.cache_key(&tab("https://a.example/?q=c", "ab")).unwrap();
        let b = enrichment.cache_key(&tab("https://a.example/?q=bc", "a")).unwrap();
        assert_eq!(a, "ab\u{1f}c");
        assert_ne!(a, b);

        let uncacheable =
            Enrichment::from_spec(&spec("y", PURE_EXTRACTION, json!({ "patterns": [] }))).unwrap();
        assert!(uncacheable.cache_key(&tab("https://a.example/", "a")).is_none());
    }

    #[test]
    fn duplicate_key_keeps_first() {
        let specs = [
            spec("first", PURE_EXTRACTION, json!({ "patterns": [] })),
            spec("second", PURE_EXTRACTION, json!({ "patterns": [] })),
        ];
        let registry = EnrichmentRegistry::from_specs(&specs);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.for_origin("https://a.example")[0].id, "first");
        assert!(registry.contains("https://a.example", "first"));
        assert!(!registry.contains("https://a.example", "second"));
        assert!(!registry.contains("https://b.example", "first"));
    }
}
