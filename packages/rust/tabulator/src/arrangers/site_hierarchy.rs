use serde::Deserialize;
use tracing::warn;

use tabdrome_shared::{NormalizedTab, Result};

use crate::arrangers::Arranger;
use crate::bid::BidTag;
use crate::node::{GroupKey, GroupTree, NodeProps, ROOT_SORT_GROUP, ROOT_SORT_KEY, SORT_CHILDREN_BY};

/// The `from_content` key this arranger consumes.
const BREADCRUMBS: &str = "breadcrumbs";

#[derive(Debug, Deserialize)]
struct Crumb {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "title")]
    label: Option<String>,
    /// `"strong"` lets this crumb's label replace one set earlier.
    #[serde(default, alias = "titleStrength")]
    title_strength: Option<String>,
}

/// `developer.mozilla.org` → `org.mozilla.developer`, so sibling domains sort
/// together.
fn clustering_domain_sort_key(hostname: &str) -> String {
    hostname.rsplit('.').collect::<Vec<_>>().join(".")
}

/// Groups tabs by site, then by their breadcrumb trail.
#[derive(Debug, Default, Clone)]
pub struct SiteHierarchyArranger;

impl SiteHierarchyArranger {
    pub const NAME: &'static str = "site-hierarchy";

    fn crumbs(tab: &NormalizedTab) -> Vec<Crumb> {
        let Some(value) = tab.from_content.get(BREADCRUMBS) else {
            return Vec::new();
        };
        match serde_json::from_value::<Vec<Crumb>>(value.clone()) {
            Ok(crumbs) => crumbs,
            Err(e) => {
                warn!(tab_id = %tab.id, error = %e, "malformed breadcrumbs, placing under domain");
                Vec::new()
            }
        }
    }
}

impl Arranger for SiteHierarchyArranger {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bid_for_tab(&self, tab: &NormalizedTab) -> Option<BidTag> {
        // Breadcrumbs supplied for the tab imply the user wants the site's own
        // hierarchy.
        tab.from_content
            .contains_key(BREADCRUMBS)
            .then_some(BidTag::ExtensionImpliesIntent)
    }

    fn arrange_tabs(&self, tabs: &[&NormalizedTab], tree: &mut GroupTree) -> Result<()> {
        let root = tree.root();
        for tab in tabs {
            let hostname = tab.parsed_url.hostname.clone();
            let mut node = tree.get_or_create_group(
                root,
                GroupKey::Domain {
                    domain: hostname.clone(),
                },
                NodeProps::new()
                    .with(ROOT_SORT_GROUP, "domain-clustered")
                    .with(ROOT_SORT_KEY, clustering_domain_sort_key(&hostname))
                    .with(SORT_CHILDREN_BY, "text")
                    .with("text", hostname.as_str()),
                NodeProps::new(),
            );

            for crumb in Self::crumbs(tab) {
                let label = crumb
                    .label
                    .as_deref()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string);
                if crumb.url.is_none() && label.is_none() {
                    continue;
                }
                let text = label.clone().unwrap_or_else(|| tab.title.clone());
                node = tree.get_or_create_group(
                    node,
                    GroupKey::breadcrumb(crumb.url, label.clone()),
                    NodeProps::new().with(SORT_CHILDREN_BY, "text"),
                    NodeProps::new().with("text", text),
                );
                if crumb.title_strength.as_deref() == Some("strong") {
                    if let Some(label) = label {
                        tree.set_prop(node, "text", label);
                    }
                }
            }

            let leaf = tree.get_or_create_group(
                node,
                GroupKey::Tab {
                    suid: tab.suid.clone(),
                },
                NodeProps::new().with("text", tab.title.as_str()),
                NodeProps::new(),
            );
            tree.set_tab(leaf, tab);
        }
        Ok(())
    }
}
