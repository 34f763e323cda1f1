//! Per-tab enrichment state machine.
//!
//! For every `(tab, key)` the digger is in one of three states:
//!
//! - **absent**: no constraint recorded, no value on the tab
//! - **pending**: a constraint is recorded and a lookup or investigation is
//!   under way
//! - **valid**: a constraint is recorded and the tab carries a value
//!
//! The recorded constraint doubles as the in-flight marker: while it holds, a
//! new dig pass leaves the key alone instead of dispatching again. Every
//! recorded constraint gets a fresh epoch, and a completion only lands if its
//! epoch is still the recorded one.
//!
//! The digger does not touch tabs itself. [`ContentDigger::dig_updated_tab`]
//! returns the `from_content` writes to apply and the round trips to start;
//! [`ContentDigger::complete_investigation`] returns the value to write once a
//! round trip finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use tabdrome_shared::{NormalizedTab, Result, TabId};

use crate::cache::{CachedInvestigation, InvestigationCache};
use crate::constraint::Constraint;
use crate::coordinator::DigTarget;
use crate::registry::{Enrichment, EnrichmentEngine, EnrichmentRegistry};

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// A round trip the caller should start, and hand back on completion.
#[derive(Debug, Clone)]
pub struct DigTicket {
    pub tab_id: TabId,
    pub key: String,
    pub epoch: u64,
    pub enrichment: Arc<Enrichment>,
    pub cache_key: Option<String>,
    pub target: DigTarget,
}

impl DigTicket {
    /// Payload to send to the investigator.
    pub fn payload(&self) -> &Value {
        &self.enrichment.payload
    }

    pub fn descriptor(&self) -> &str {
        &self.enrichment.id
    }
}

/// Result of one dig pass over a tab.
#[derive(Debug, Default)]
pub struct DigOutcome {
    /// `from_content` updates: `Some` sets the key, `None` clears it.
    pub writes: Vec<(String, Option<Value>)>,
    pub dispatches: Vec<DigTicket>,
}

impl DigOutcome {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.dispatches.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Shadow state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KeyState {
    epoch: u64,
    constraint: Constraint,
}

#[derive(Debug, Default)]
struct ShadowTab {
    constraints_by_key: HashMap<String, KeyState>,
}

/// JavaScript-style truthiness: investigators signal retryable failure with
/// `null` or another falsy value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// ContentDigger
// ---------------------------------------------------------------------------

pub struct ContentDigger {
    registry: EnrichmentRegistry,
    cache: Box<dyn InvestigationCache>,
    /// Side table keyed by tab id; entries are dropped by [`Self::forget_tab`].
    shadow_tabs: HashMap<TabId, ShadowTab>,
    next_epoch: u64,
}

impl std::fmt::Debug for ContentDigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentDigger")
            .field("registry", &self.registry)
            .field("shadow_tabs", &self.shadow_tabs.len())
            .field("next_epoch", &self.next_epoch)
            .finish_non_exhaustive()
    }
}

impl ContentDigger {
    pub fn new(registry: EnrichmentRegistry, cache: Box<dyn InvestigationCache>) -> Self {
        Self {
            registry,
            cache,
            shadow_tabs: HashMap::new(),
            next_epoch: 1,
        }
    }

    pub fn registry(&self) -> &EnrichmentRegistry {
        &self.registry
    }

    /// Whether a constraint is recorded for the key (pending or valid).
    pub fn is_tracking(&self, tab_id: TabId, key: &str) -> bool {
        self.shadow_tabs
            .get(&tab_id)
            .is_some_and(|s| s.constraints_by_key.contains_key(key))
    }

    /// Cache entries stored since the last call, for persistence.
    pub fn drain_dirty_cache(&mut self) -> Vec<CachedInvestigation> {
        self.cache.drain_dirty()
    }

    fn bump_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    /// Re-evaluate every enrichment of `tab` after it changed.
    ///
    /// Values whose constraint no longer holds are cleared. Keys without a
    /// trusted attempt get a constraint recorded right away, then are served
    /// from the cache, by synchronous extraction, or by a dispatched round
    /// trip, in that order.
    #[instrument(skip_all, fields(tab_id = %tab.id, serial = tab.serial))]
    pub fn dig_updated_tab(&mut self, tab: &NormalizedTab) -> DigOutcome {
        let mut outcome = DigOutcome::default();
        let enrichments: Vec<Arc<Enrichment>> =
            self.registry.for_origin(&tab.parsed_url.origin).to_vec();

        if enrichments.is_empty() && !self.shadow_tabs.contains_key(&tab.id) {
            return outcome;
        }

        let mut still_valid = HashSet::new();
        {
            let shadow = self.shadow_tabs.entry(tab.id).or_default();
            shadow.constraints_by_key.retain(|key, state| {
                if state.constraint.holds_for(tab) {
                    still_valid.insert(key.clone());
                    true
                } else {
                    debug!(key = %key, "constraint violated, clearing value");
                    outcome.writes.push((key.clone(), None));
                    false
                }
            });
        }

        for enrichment in enrichments {
            let key = enrichment.provides.clone();
            if still_valid.contains(&key) {
                continue;
            }

            // Record the constraint before anything else so that a burst of
            // updates does not dispatch the same investigation repeatedly.
            let epoch = self.bump_epoch();
            let constraint = Constraint::capture(&enrichment.constraint_spec, tab);
            self.shadow_tabs
                .entry(tab.id)
                .or_default()
                .constraints_by_key
                .insert(key.clone(), KeyState { epoch, constraint });

            let cache_key = enrichment.cache_key(tab);
            if let Some(ck) = cache_key.as_deref() {
                if let Some(hit) = self.cache.sync_lookup(&enrichment.origin, &enrichment.id, ck) {
                    trace!(key = %key, cache_key = ck, "investigation cache hit");
                    outcome.writes.push((key, Some(hit)));
                    continue;
                }
            }

            match &enrichment.engine {
                EnrichmentEngine::PureExtraction(spec) => match spec.extract(tab) {
                    Some(value) if is_truthy(&value) => {
                        if let Some(ck) = cache_key.as_deref() {
                            self.cache
                                .store_result(&enrichment.origin, &enrichment.id, ck, value.clone());
                        }
                        outcome.writes.push((key, Some(value)));
                    }
                    _ => {
                        debug!(key = %key, "extraction produced nothing, will retry on next change");
                        self.clear_key(tab.id, &key);
                    }
                },
                EnrichmentEngine::RoundTrip(_) => {
                    trace!(key = %key, epoch, "dispatching round trip");
                    outcome.dispatches.push(DigTicket {
                        tab_id: tab.id,
                        key,
                        epoch,
                        enrichment: Arc::clone(&enrichment),
                        cache_key,
                        target: DigTarget {
                            tab_id: tab.id,
                            url: tab.parsed_url.href.clone(),
                        },
                    });
                }
            }
        }

        if self
            .shadow_tabs
            .get(&tab.id)
            .is_some_and(|s| s.constraints_by_key.is_empty())
        {
            self.shadow_tabs.remove(&tab.id);
        }
        outcome
    }

    /// Settle a round trip. `tab` is the tab's current state, `None` if it is
    /// gone. Returns the value to write under `ticket.key`, if any.
    ///
    /// Superseded completions are dropped silently. Failures and falsy results
    /// clear the constraint so the next change retries.
    #[instrument(skip_all, fields(tab_id = %ticket.tab_id, key = %ticket.key, epoch = ticket.epoch))]
    pub fn complete_investigation(
        &mut self,
        tab: Option<&NormalizedTab>,
        ticket: &DigTicket,
        result: Result<Option<Value>>,
    ) -> Option<Value> {
        let current = self
            .shadow_tabs
            .get(&ticket.tab_id)
            .and_then(|s| s.constraints_by_key.get(&ticket.key));
        let Some(state) = current.filter(|s| s.epoch == ticket.epoch) else {
            debug!("superseded investigation result, discarding");
            return None;
        };
        let Some(tab) = tab else {
            debug!("tab gone before investigation finished");
            return None;
        };

        let value = match result {
            Ok(Some(value)) if is_truthy(&value) => value,
            Ok(_) => {
                debug!("investigation came back empty, will retry on next change");
                self.clear_key(ticket.tab_id, &ticket.key);
                return None;
            }
            Err(e) => {
                debug!(error = %e, "investigation failed, will retry on next change");
                self.clear_key(ticket.tab_id, &ticket.key);
                return None;
            }
        };

        if !state.constraint.holds_for(tab) {
            // Any change to the tab runs a dig pass first, which would have
            // replaced this constraint.
            warn!("constraint no longer holds for a current investigation result");
            return None;
        }

        if let Some(ck) = ticket.cache_key.as_deref() {
            let e = &ticket.enrichment;
            self.cache.store_result(&e.origin, &e.id, ck, value.clone());
        }
        Some(value)
    }

    /// Drop all enrichment state for a removed tab.
    pub fn forget_tab(&mut self, tab_id: TabId) {
        if self.shadow_tabs.remove(&tab_id).is_some() {
            trace!(%tab_id, "dropped shadow tab");
        }
    }

    fn clear_key(&mut self, tab_id: TabId, key: &str) {
        if let Some(shadow) = self.shadow_tabs.get_mut(&tab_id) {
            shadow.constraints_by_key.remove(key);
            if shadow.constraints_by_key.is_empty() {
                self.shadow_tabs.remove(&tab_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tabdrome_shared::{EnrichmentSpec, RawTab, TabdromeError};

    use super::*;
    use crate::cache::MemoryInvestigationCache;

    const ORIGIN: &str = "https://docs.example.com";

    fn round_trip_spec() -> EnrichmentSpec {
        EnrichmentSpec {
            enrichment_id: "crumbs".into(),
            origin: ORIGIN.into(),
            provides: "breadcrumbs".into(),
            engine: "round-trip".into(),
            cache_key_spec: Some(vec!["url.sans_hash".into()]),
            constraint_spec: [("url".to_string(), "url.href".to_string())].into(),
            spec: json!({
                "container_selector": "ol",
                "item_selector": "li",
                "values": { "label": { "extract": "text" } }
            }),
        }
    }

    fn extraction_spec() -> EnrichmentSpec {
        EnrichmentSpec {
            enrichment_id: "search-crumbs".into(),
            origin: "https://bugs.example.com".into(),
            provides: "breadcrumbs".into(),
            engine: "pure-extraction".into(),
            cache_key_spec: None,
            constraint_spec: [("url".to_string(), "url.href".to_string())].into(),
            spec: json!({
                "patterns": [{
                    "match": { "pathname": "/search" },
                    "results": [{ "label": { "type": "tab-title" } }]
                }]
            }),
        }
    }

    fn digger() -> ContentDigger {
        let registry = EnrichmentRegistry::from_specs(&[round_trip_spec(), extraction_spec()]);
        ContentDigger::new(registry, Box::new(MemoryInvestigationCache::new()))
    }

    fn tab(id: u32, url: &str) -> NormalizedTab {
        let raw: RawTab = serde_json::from_value(json!({
            "id": id, "windowId": 1, "index": 0, "url": url, "title": "Title"
        }))
        .expect("raw tab");
        NormalizedTab::from_raw(&raw, 1)
    }

    #[test]
    fn tab_without_enrichments_is_left_alone() {
        let mut digger = digger();
        let outcome = digger.dig_updated_tab(&tab(1, "https://a.example/x"));
        assert!(outcome.is_empty());
        assert!(!digger.is_tracking(TabId(1), "breadcrumbs"));
    }

    #[test]
    fn repeated_dig_does_not_redispatch() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide");

        let first = digger.dig_updated_tab(&t);
        assert_eq!(first.dispatches.len(), 1);
        assert_eq!(first.dispatches[0].descriptor(), "crumbs");
        assert!(digger.is_tracking(TabId(1), "breadcrumbs"));

        let second = digger.dig_updated_tab(&t);
        assert!(second.is_empty());
    }

    #[test]
    fn completion_writes_and_caches() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide#intro");
        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);
        assert_eq!(ticket.cache_key.as_deref(), Some("https://docs.example.com/guide"));

        let value = json!([{ "label": "Guide" }]);
        let written = digger.complete_investigation(Some(&t), &ticket, Ok(Some(value.clone())));
        assert_eq!(written, Some(value.clone()));

        // Another tab on the same page is served from the cache.
        let other = tab(2, "https://docs.example.com/guide#other");
        let outcome = digger.dig_updated_tab(&other);
        assert!(outcome.dispatches.is_empty());
        assert_eq!(outcome.writes, vec![("breadcrumbs".to_string(), Some(value))]);

        let dirty = digger.drain_dirty_cache();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].enrichment_id, "crumbs");
    }

    #[test]
    fn superseded_result_is_never_written() {
        let mut digger = digger();
        let old = tab(1, "https://docs.example.com/old");
        let old_ticket = digger.dig_updated_tab(&old).dispatches.remove(0);

        let new = tab(1, "https://docs.example.com/new");
        let outcome = digger.dig_updated_tab(&new);
        assert_eq!(outcome.writes, vec![("breadcrumbs".to_string(), None)]);
        let new_ticket = outcome.dispatches.into_iter().next().expect("redispatched");
        assert!(new_ticket.epoch > old_ticket.epoch);

        let late = digger.complete_investigation(Some(&new), &old_ticket, Ok(Some(json!(["old"]))));
        assert!(late.is_none());
        assert!(digger.is_tracking(TabId(1), "breadcrumbs"));

        let fresh = digger.complete_investigation(Some(&new), &new_ticket, Ok(Some(json!(["new"]))));
        assert_eq!(fresh, Some(json!(["new"])));
    }

    #[test]
    fn null_or_failed_result_allows_retry() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide");

        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);
        assert!(digger.complete_investigation(Some(&t), &ticket, Ok(None)).is_none());
        assert!(!digger.is_tracking(TabId(1), "breadcrumbs"));

        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);
        let timeout = Err(TabdromeError::Timeout { request_id: 3 });
        assert!(digger.complete_investigation(Some(&t), &ticket, timeout).is_none());
        assert!(!digger.is_tracking(TabId(1), "breadcrumbs"));

        assert_eq!(digger.dig_updated_tab(&t).dispatches.len(), 1);
    }

    #[test]
    fn stale_constraint_at_completion_is_discarded() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide");
        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);

        // The tab changed without a dig pass in between.
        let moved_on = tab(1, "https://docs.example.com/elsewhere");
        let written = digger.complete_investigation(Some(&moved_on), &ticket, Ok(Some(json!([1]))));
        assert!(written.is_none());
        assert!(digger.drain_dirty_cache().is_empty());
    }

    #[test]
    fn pure_extraction_is_synchronous() {
        let mut digger = digger();
        let outcome = digger.dig_updated_tab(&tab(1, "https://bugs.example.com/search?q=x"));
        assert!(outcome.dispatches.is_empty());
        assert_eq!(
            outcome.writes,
            vec![("breadcrumbs".to_string(), Some(json!([{ "label": "Title" }])))]
        );
        assert!(digger.is_tracking(TabId(1), "breadcrumbs"));

        // No matching pattern: nothing written, nothing tracked.
        let outcome = digger.dig_updated_tab(&tab(2, "https://bugs.example.com/show"));
        assert!(outcome.is_empty());
        assert!(!digger.is_tracking(TabId(2), "breadcrumbs"));
    }

    #[test]
    fn leaving_the_origin_clears_values() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide");
        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);
        digger.complete_investigation(Some(&t), &ticket, Ok(Some(json!([1]))));

        let outcome = digger.dig_updated_tab(&tab(1, "https://a.example/"));
        assert_eq!(outcome.writes, vec![("breadcrumbs".to_string(), None)]);
        assert!(outcome.dispatches.is_empty());
        assert!(!digger.is_tracking(TabId(1), "breadcrumbs"));
    }

    #[test]
    fn forgotten_tab_drops_completion() {
        let mut digger = digger();
        let t = tab(1, "https://docs.example.com/guide");
        let ticket = digger.dig_updated_tab(&t).dispatches.remove(0);
        digger.forget_tab(TabId(1));
        assert!(digger.complete_investigation(None, &ticket, Ok(Some(json!([1])))).is_none());
    }
}
