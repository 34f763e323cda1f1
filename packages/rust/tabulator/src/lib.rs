//! Arrangement engine for Tabdrome.
//!
//! Arrangers bid for tabs, the winners place their tabs into a [`GroupTree`],
//! and the tree is serialized with stable node ids and change hashes so a UI
//! can diff successive trees cheaply.

pub mod arrangers;
pub mod bid;
pub mod node;
pub mod serialize;
pub mod tabulator;

pub use arrangers::{Arranger, SessionArranger, SiteHierarchyArranger, arranger_by_name};
pub use bid::BidTag;
pub use node::{GroupKey, GroupNode, GroupTree, NodeId, NodeProps};
pub use serialize::SerializedNode;
pub use tabulator::Tabulator;
