//! Core pipeline orchestration for Tabdrome.
//!
//! This crate ties the tracker, the digger and the tabulator together into
//! one event-driven [`Pipeline`], and provides [`ClientBridge`] for handing
//! the resulting trees to UI clients.

pub mod bridge;
pub mod event;
pub mod pipeline;

pub use bridge::{BridgeMessage, ClientBridge, TreeDelivery};
pub use event::BrowserEvent;
pub use pipeline::{Pipeline, PipelineStats};
