//! Snapshots of the tab attributes an enrichment value depends on.

use std::collections::BTreeMap;

use tabdrome_shared::NormalizedTab;

/// Attribute values captured when an enrichment was started. The value stays
/// trustworthy only while every captured attribute still resolves the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Constraint name → (attribute path, captured value).
    attrs: BTreeMap<String, (String, Option<String>)>,
}

impl Constraint {
    /// Capture `spec` (name → attribute path) against the tab's current state.
    pub fn capture(spec: &BTreeMap<String, String>, tab: &NormalizedTab) -> Self {
        let attrs = spec
            .iter()
            .map(|(name, path)| (name.clone(), (path.clone(), tab.attr(path))))
            .collect();
        Self { attrs }
    }

    /// Whether the tab still has the captured values.
    pub fn holds_for(&self, tab: &NormalizedTab) -> bool {
        self.attrs
            .values()
            .all(|(path, captured)| tab.attr(path) == *captured)
    }
}
