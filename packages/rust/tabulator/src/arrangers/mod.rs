//! Arranger trait and built-in arrangers.
//!
//! Arrangers bid for each tab; the tabulator hands every arranger the tabs it
//! won, all at once, so it can lay them out together.

mod session;
mod site_hierarchy;

use tabdrome_shared::{NormalizedTab, Result};

use crate::bid::BidTag;
use crate::node::GroupTree;

pub use session::SessionArranger;
pub use site_hierarchy::SiteHierarchyArranger;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A pluggable placement policy.
pub trait Arranger: Send + Sync {
    /// Configuration name, also used in logs.
    fn name(&self) -> &str;

    /// Claim `tab` with a bid, or decline with `None`.
    fn bid_for_tab(&self, tab: &NormalizedTab) -> Option<BidTag>;

    /// Place the tabs this arranger won into `tree`.
    fn arrange_tabs(&self, tabs: &[&NormalizedTab], tree: &mut GroupTree) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Names accepted by [`arranger_by_name`].
pub const BUILTIN_ARRANGERS: [&str; 2] = [SiteHierarchyArranger::NAME, SessionArranger::NAME];

/// Instantiate a built-in arranger.
pub fn arranger_by_name(name: &str) -> Option<Box<dyn Arranger>> {
    match name {
        SessionArranger::NAME => Some(Box::new(SessionArranger)),
        SiteHierarchyArranger::NAME => Some(Box::new(SiteHierarchyArranger::default())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_by_name() {
        for name in BUILTIN_ARRANGERS {
            let arranger = arranger_by_name(name).expect("builtin");
            assert_eq!(arranger.name(), name);
        }
        assert!(arranger_by_name("chronological").is_none());
    }
}
