//! Bid tags arrangers use to claim tabs.

use serde::{Deserialize, Serialize};

/// How strongly an arranger wants a tab. Variants are declared in ascending
/// priority; the derived `Ord` is the bidding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BidTag {
    /// Can place any tab, no particular reason to.
    Meh,
    /// Another extension supplied data implying the user wants this layout.
    ExtensionImpliesIntent,
}
