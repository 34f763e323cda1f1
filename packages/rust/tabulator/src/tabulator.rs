//! Bidding and tree assembly.

use tracing::{debug, instrument};

use tabdrome_shared::{NormalizedTab, Result, Serial, TabdromeError};

use crate::arrangers::{Arranger, arranger_by_name};
use crate::bid::BidTag;
use crate::node::GroupTree;
use crate::serialize::SerializedNode;

/// Runs arrangers in registration order. Earlier arrangers win equal bids.
pub struct Tabulator {
    arrangers: Vec<Box<dyn Arranger>>,
}

impl std::fmt::Debug for Tabulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tabulator")
            .field("arrangers", &self.names())
            .finish()
    }
}

impl Tabulator {
    pub fn new(arrangers: Vec<Box<dyn Arranger>>) -> Self {
        Self { arrangers }
    }

    /// Instantiate built-in arrangers by configuration name.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let arrangers = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                arranger_by_name(name)
                    .ok_or_else(|| TabdromeError::config(format!("unknown arranger {name:?}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(arrangers))
    }

    pub fn names(&self) -> Vec<&str> {
        self.arrangers.iter().map(|a| a.name()).collect()
    }

    /// Partition `tabs` among the arrangers by bid and build the tree.
    ///
    /// Every tab must be claimed by some arranger; an unclaimed tab is a
    /// wiring defect and fails the pass.
    #[instrument(skip_all, fields(tabs = tabs.len()))]
    pub fn tabulate(&self, tabs: &[NormalizedTab]) -> Result<GroupTree> {
        let mut assignments: Vec<Vec<&NormalizedTab>> = vec![Vec::new(); self.arrangers.len()];

        for tab in tabs {
            let mut best: Option<(usize, BidTag)> = None;
            for (i, arranger) in self.arrangers.iter().enumerate() {
                let Some(bid) = arranger.bid_for_tab(tab) else {
                    continue;
                };
                // Strictly greater, so the first registered arranger keeps ties.
                if best.is_none_or(|(_, high)| bid > high) {
                    best = Some((i, bid));
                }
            }
            let Some((winner, bid)) = best else {
                return Err(TabdromeError::arrangement(format!(
                    "no arranger bid on tab {}",
                    tab.id
                )));
            };
            debug!(tab_id = %tab.id, arranger = self.arrangers[winner].name(), ?bid, "tab assigned");
            assignments[winner].push(tab);
        }

        let mut tree = GroupTree::new();
        for (arranger, assigned) in self.arrangers.iter().zip(&assignments) {
            if !assigned.is_empty() {
                arranger.arrange_tabs(assigned, &mut tree)?;
            }
        }
        Ok(tree)
    }

    /// [`Self::tabulate`] then serialize with `serial` on the root.
    pub fn tabulate_serialized(&self, tabs: &[NormalizedTab], serial: Serial) -> Result<SerializedNode> {
        Ok(self.tabulate(tabs)?.serialize(serial))
    }
}
