//! Tab state synchronizer.
//!
//! This crate provides:
//! - [`TabTracker`] — turns raw browser tab events into a versioned set of
//!   [`NormalizedTab`](tabdrome_shared::NormalizedTab)s, indexed by id and window
//! - [`SerialClock`] — the monotonic counter every mutation is stamped with
//! - [`WindowChanges`] — the coalesced per-window batch handed downstream

pub mod clock;
pub mod tracker;

pub use clock::SerialClock;
pub use tracker::{TabTracker, WindowChanges};
