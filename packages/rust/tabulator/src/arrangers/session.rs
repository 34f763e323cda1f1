use tabdrome_shared::{NormalizedTab, Result};

use crate::arrangers::Arranger;
use crate::bid::BidTag;
use crate::node::{GroupKey, GroupTree, NodeProps, ROOT_SORT_GROUP, ROOT_SORT_KEY};

/// Plain tab-strip order: every tab is a root-level leaf, pinned tabs first.
///
/// Bids `meh` on everything so that no tab is ever left unplaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionArranger;

impl SessionArranger {
    pub const NAME: &'static str = "session";
}

impl Arranger for SessionArranger {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn bid_for_tab(&self, _tab: &NormalizedTab) -> Option<BidTag> {
        Some(BidTag::Meh)
    }

    fn arrange_tabs(&self, tabs: &[&NormalizedTab], tree: &mut GroupTree) -> Result<()> {
        let root = tree.root();
        for tab in tabs {
            let group = if tab.pinned { "pinned" } else { "normal" };
            let id = tree.get_or_create_group(
                root,
                GroupKey::Tab {
                    suid: tab.suid.clone(),
                },
                NodeProps::new()
                    .with(ROOT_SORT_GROUP, group)
                    .with(ROOT_SORT_KEY, tab.index)
                    .with("text", tab.title.as_str()),
                NodeProps::new(),
            );
            tree.set_tab(id, tab);
        }
        Ok(())
    }
}
