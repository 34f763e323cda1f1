//! Normalized tab bookkeeping driven by browser tab lifecycle events.
//!
//! Every mutation stamps the touched tabs with a fresh [`SerialClock`] value
//! and marks the owning window dirty. Nothing is pushed per event: the owner
//! drains [`TabTracker::take_dirty`] after a short coalescing delay, so a
//! burst such as a session restore collapses into one batch per window.
//!
//! Events that reference tabs we do not know are expected races (an update
//! can beat its creation event, an activation can trail a removal) and are
//! dropped with a debug log.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument, trace};

use tabdrome_shared::{NormalizedTab, ParsedUrl, RawTab, Serial, TabId, WindowId};

use crate::clock::SerialClock;

// ---------------------------------------------------------------------------
// WindowChanges
// ---------------------------------------------------------------------------

/// One window's coalesced state, handed downstream after a flush.
#[derive(Debug, Clone)]
pub struct WindowChanges {
    pub window_id: WindowId,
    /// Every live tab of the window, ordered by position index.
    pub tabs: Vec<NormalizedTab>,
    /// Last-known state of tabs removed from the window since the last flush.
    pub removed: Vec<NormalizedTab>,
    /// Global serial at flush time.
    pub serial: Serial,
}

#[derive(Debug, Default)]
struct WindowInfo {
    active_tab_id: Option<TabId>,
    tabs: BTreeSet<TabId>,
    removed: Vec<NormalizedTab>,
}

// ---------------------------------------------------------------------------
// TabTracker
// ---------------------------------------------------------------------------

/// Owns the normalized tab set. Sole writer of every [`NormalizedTab`].
#[derive(Debug, Default)]
pub struct TabTracker {
    tabs_by_id: HashMap<TabId, NormalizedTab>,
    windows: HashMap<WindowId, WindowInfo>,
    dirty: BTreeSet<WindowId>,
    clock: SerialClock,
}

impl TabTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current global serial.
    pub fn serial(&self) -> Serial {
        self.clock.current()
    }

    pub fn tab(&self, id: TabId) -> Option<&NormalizedTab> {
        self.tabs_by_id.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tabs_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tabs_by_id.is_empty()
    }

    /// Active tab of a window, as far as we know.
    pub fn active_tab(&self, window_id: WindowId) -> Option<TabId> {
        self.windows.get(&window_id).and_then(|w| w.active_tab_id)
    }

    /// Whether any window is waiting to be flushed.
    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    // -----------------------------------------------------------------------
    // Browser events
    // -----------------------------------------------------------------------

    /// A tab appeared. A duplicate creation for a known id is folded into an
    /// update.
    #[instrument(skip_all, fields(tab_id = %raw.id, window_id = %raw.window_id))]
    pub fn on_created(&mut self, raw: &RawTab) -> TabId {
        if self.tabs_by_id.contains_key(&raw.id) {
            debug!("creation for an already known tab, treating as update");
            self.apply_update(raw);
            return raw.id;
        }

        let serial = self.clock.bump();
        let tab = NormalizedTab::from_raw(raw, serial);

        let window = self.windows.entry(raw.window_id).or_default();
        window.tabs.insert(raw.id);
        // There is no synthetic activation event for tabs that already exist,
        // so the first active tab we see claims the window.
        if tab.active && window.active_tab_id.is_none() {
            window.active_tab_id = Some(raw.id);
        }
        self.tabs_by_id.insert(raw.id, tab);
        self.dirty.insert(raw.window_id);
        trace!(serial, "tab created");
        raw.id
    }

    /// A tab changed. Returns `None` when the tab is not known yet; its
    /// creation event will carry the state.
    #[instrument(skip_all, fields(tab_id = %raw.id))]
    pub fn on_updated(&mut self, raw: &RawTab) -> Option<TabId> {
        if !self.tabs_by_id.contains_key(&raw.id) {
            debug!("update before creation, leaving it to the creation event");
            return None;
        }
        self.apply_update(raw);
        Some(raw.id)
    }

    fn apply_update(&mut self, raw: &RawTab) {
        let serial = self.clock.bump();
        let Some(tab) = self.tabs_by_id.get_mut(&raw.id) else {
            return;
        };

        if tab.window_id != raw.window_id {
            let old_window = tab.window_id;
            if let Some(old) = self.windows.get_mut(&old_window) {
                old.tabs.remove(&raw.id);
                if old.active_tab_id == Some(raw.id) {
                    old.active_tab_id = None;
                }
            }
            self.windows
                .entry(raw.window_id)
                .or_default()
                .tabs
                .insert(raw.id);
            self.dirty.insert(old_window);
            tab.index = raw.index;
            debug!(from = %old_window, to = %raw.window_id, "tab changed windows");
        }

        tab.serial = serial;
        tab.window_id = raw.window_id;
        tab.active = raw.active;
        tab.pinned = raw.pinned;
        // Parsing is not free; only redo it when the URL actually changed.
        if tab.parsed_url.href != raw.url {
            tab.parsed_url = ParsedUrl::parse(&raw.url);
        }
        tab.title = raw.title.clone();
        tab.fav_icon_url = raw.fav_icon_url.clone();
        tab.status = raw.status.clone();
        tab.incognito = raw.incognito;
        tab.audible = raw.audible;
        tab.muted = raw.muted;
        tab.width = raw.width;
        tab.height = raw.height;

        self.dirty.insert(raw.window_id);
    }

    /// The active tab of a window changed. The outgoing and incoming tabs
    /// share one serial. Returns the touched tabs.
    #[instrument(skip(self))]
    pub fn on_activated(&mut self, tab_id: TabId, window_id: WindowId) -> Vec<TabId> {
        let Some(window) = self.windows.get_mut(&window_id) else {
            debug!("activation in unknown window");
            return Vec::new();
        };

        let serial = self.clock.bump();
        let mut touched = Vec::with_capacity(2);

        if let Some(prev_id) = window.active_tab_id.take() {
            if let Some(prev) = self.tabs_by_id.get_mut(&prev_id) {
                prev.active = false;
                prev.serial = serial;
                touched.push(prev_id);
            }
        }

        if window.tabs.contains(&tab_id) {
            if let Some(tab) = self.tabs_by_id.get_mut(&tab_id) {
                tab.active = true;
                tab.serial = serial;
                tab.last_activated_serial = serial;
                window.active_tab_id = Some(tab_id);
                if !touched.contains(&tab_id) {
                    touched.push(tab_id);
                }
            }
        } else {
            debug!("activated tab is not known in this window");
        }

        self.dirty.insert(window_id);
        touched
    }

    /// A tab was dragged from `from_index` to `to_index` within its window.
    /// Every tab whose index lies in the affected range shifts by one and
    /// gets the move's serial. Returns the touched tabs.
    #[instrument(skip(self))]
    pub fn on_moved(&mut self, tab_id: TabId, from_index: u32, to_index: u32) -> Vec<TabId> {
        let Some(window_id) = self.tabs_by_id.get(&tab_id).map(|t| t.window_id) else {
            debug!("move of unknown tab");
            return Vec::new();
        };
        let Some(window) = self.windows.get(&window_id) else {
            return Vec::new();
        };
        if from_index == to_index {
            return Vec::new();
        }

        let serial = self.clock.bump();
        let (lo, hi) = (from_index.min(to_index), from_index.max(to_index));
        let moving_right = from_index < to_index;
        let mut touched = Vec::new();

        for id in &window.tabs {
            let Some(tab) = self.tabs_by_id.get_mut(id) else {
                continue;
            };
            if *id == tab_id {
                tab.index = to_index;
            } else if tab.index >= lo && tab.index <= hi {
                if moving_right {
                    tab.index = tab.index.saturating_sub(1);
                } else {
                    tab.index += 1;
                }
            } else {
                continue;
            }
            tab.serial = serial;
            touched.push(*id);
        }

        self.dirty.insert(window_id);
        touched
    }

    /// A tab closed. Returns its last-known state for downstream cleanup.
    #[instrument(skip(self))]
    pub fn on_removed(&mut self, tab_id: TabId) -> Option<NormalizedTab> {
        let Some(tab) = self.tabs_by_id.remove(&tab_id) else {
            debug!("removal of unknown tab");
            return None;
        };
        self.clock.bump();

        if let Some(window) = self.windows.get_mut(&tab.window_id) {
            window.tabs.remove(&tab_id);
            if window.active_tab_id == Some(tab_id) {
                window.active_tab_id = None;
            }
            window.removed.push(tab.clone());
        }
        self.dirty.insert(tab.window_id);
        Some(tab)
    }

    /// A window closed with all of its tabs. Returns each removed tab. The
    /// window is forgotten entirely, so it is never flushed again.
    #[instrument(skip(self))]
    pub fn on_window_removed(&mut self, window_id: WindowId) -> Vec<NormalizedTab> {
        self.dirty.remove(&window_id);
        let Some(window) = self.windows.remove(&window_id) else {
            debug!("removal of unknown window");
            return Vec::new();
        };

        let mut removed = Vec::with_capacity(window.tabs.len());
        for id in window.tabs {
            if let Some(tab) = self.tabs_by_id.remove(&id) {
                self.clock.bump();
                removed.push(tab);
            }
        }
        debug!(tabs = removed.len(), "window removed");
        removed
    }

    // -----------------------------------------------------------------------
    // Enrichment results
    // -----------------------------------------------------------------------

    /// Store (`Some`) or clear (`None`) an enrichment value on a tab.
    ///
    /// The tab may have gone away while the value was being computed; that is
    /// not an error. Returns whether anything changed.
    pub fn set_from_content(
        &mut self,
        tab_id: TabId,
        key: &str,
        value: Option<serde_json::Value>,
    ) -> bool {
        let Some(tab) = self.tabs_by_id.get_mut(&tab_id) else {
            debug!(%tab_id, key, "enrichment for a tab that no longer exists");
            return false;
        };

        let changed = match value {
            Some(value) => {
                if tab.from_content.get(key) == Some(&value) {
                    false
                } else {
                    tab.from_content.insert(key.to_string(), value);
                    true
                }
            }
            None => tab.from_content.remove(key).is_some(),
        };

        if changed {
            tab.serial = self.clock.bump();
            self.dirty.insert(tab.window_id);
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Flushing
    // -----------------------------------------------------------------------

    /// Drain the dirty windows into per-window batches.
    pub fn take_dirty(&mut self) -> Vec<WindowChanges> {
        let serial = self.clock.current();
        let dirty = std::mem::take(&mut self.dirty);

        dirty
            .into_iter()
            .filter_map(|window_id| {
                let window = self.windows.get_mut(&window_id)?;
                let mut tabs: Vec<NormalizedTab> = window
                    .tabs
                    .iter()
                    .filter_map(|id| self.tabs_by_id.get(id).cloned())
                    .collect();
                tabs.sort_by_key(|t| (t.index, t.id));
                Some(WindowChanges {
                    window_id,
                    tabs,
                    removed: std::mem::take(&mut window.removed),
                    serial,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u32, window: u32, index: u32, url: &str) -> RawTab {
        RawTab {
            id: TabId(id),
            window_id: WindowId(window),
            index,
            opener_tab_id: None,
            active: false,
            pinned: false,
            url: url.into(),
            title: format!("Tab {id}"),
            fav_icon_url: None,
            status: Some("complete".into()),
            incognito: false,
            audible: false,
            muted: false,
            width: None,
            height: None,
        }
    }

    fn tracker_with_tabs(n: u32) -> TabTracker {
        let mut tracker = TabTracker::new();
        for i in 0..n {
            tracker.on_created(&raw(i + 1, 1, i, &format!("https://a.example/{i}")));
        }
        tracker
    }

    #[test]
    fn created_tab_is_indexed_and_stamped() {
        let mut tracker = TabTracker::new();
        let id = tracker.on_created(&raw(7, 1, 0, "https://a.example/x"));
        let tab = tracker.tab(id).expect("tab tracked");
        assert_eq!(tab.suid.as_str(), "!7");
        assert_eq!(tab.serial, 1);
        assert_eq!(tab.parsed_url.origin, "https://a.example");
        assert!(tab.from_content.is_empty());
        assert!(tracker.has_dirty());
    }

    #[test]
    fn first_active_tab_claims_window() {
        let mut tracker = TabTracker::new();
        let mut a = raw(1, 1, 0, "https://a.example/");
        a.active = true;
        let mut b = raw(2, 1, 1, "https://b.example/");
        b.active = true;
        tracker.on_created(&a);
        tracker.on_created(&b);
        assert_eq!(tracker.active_tab(WindowId(1)), Some(TabId(1)));
    }

    #[test]
    fn update_before_create_is_ignored() {
        let mut tracker = TabTracker::new();
        assert!(tracker.on_updated(&raw(9, 1, 0, "https://a.example/")).is_none());
        assert!(tracker.is_empty());
        assert_eq!(tracker.serial(), 0);
    }

    #[test]
    fn update_bumps_serial_and_reparses_changed_url() {
        let mut tracker = tracker_with_tabs(1);
        let before = tracker.tab(TabId(1)).unwrap().serial;

        let mut r = raw(1, 1, 0, "https://b.example/y?q=1");
        r.title = "New".into();
        tracker.on_updated(&r).expect("known tab");

        let tab = tracker.tab(TabId(1)).unwrap();
        assert!(tab.serial > before);
        assert_eq!(tab.parsed_url.hostname, "b.example");
        assert_eq!(tab.parsed_url.search, "?q=1");
        assert_eq!(tab.title, "New");
    }

    #[test]
    fn update_moves_tab_between_windows() {
        let mut tracker = tracker_with_tabs(2);
        tracker.take_dirty();

        let mut r = raw(2, 5, 0, "https://a.example/1");
        r.window_id = WindowId(5);
        tracker.on_updated(&r).expect("known tab");

        let batches = tracker.take_dirty();
        let ids: Vec<_> = batches.iter().map(|b| b.window_id).collect();
        assert_eq!(ids, vec![WindowId(1), WindowId(5)]);
        assert_eq!(batches[0].tabs.len(), 1);
        assert_eq!(batches[1].tabs[0].id, TabId(2));
    }

    #[test]
    fn activation_swap_shares_one_serial() {
        let mut tracker = tracker_with_tabs(3);
        tracker.on_activated(TabId(1), WindowId(1));
        let touched = tracker.on_activated(TabId(3), WindowId(1));
        assert_eq!(touched, vec![TabId(1), TabId(3)]);

        let old = tracker.tab(TabId(1)).unwrap();
        let new = tracker.tab(TabId(3)).unwrap();
        assert!(!old.active);
        assert!(new.active);
        assert_eq!(old.serial, new.serial);
        assert_eq!(new.serial, tracker.serial());
        assert_eq!(new.last_activated_serial, new.serial);
        assert_eq!(tracker.active_tab(WindowId(1)), Some(TabId(3)));
    }

    #[test]
    fn activation_in_unknown_window_is_swallowed() {
        let mut tracker = tracker_with_tabs(1);
        let serial = tracker.serial();
        assert!(tracker.on_activated(TabId(1), WindowId(99)).is_empty());
        assert_eq!(tracker.serial(), serial);
    }

    #[test]
    fn move_right_shifts_intermediate_tabs_left() {
        let mut tracker = tracker_with_tabs(5);
        // Tab 2 (index 1) dragged to index 3.
        let touched = tracker.on_moved(TabId(2), 1, 3);
        assert_eq!(touched.len(), 3);

        let idx = |id| tracker.tab(TabId(id)).unwrap().index;
        assert_eq!((idx(1), idx(2), idx(3), idx(4), idx(5)), (0, 3, 1, 2, 4));
        let serial = tracker.serial();
        for id in [2, 3, 4] {
            assert_eq!(tracker.tab(TabId(id)).unwrap().serial, serial);
        }
        assert!(tracker.tab(TabId(1)).unwrap().serial < serial);
    }

    #[test]
    fn move_left_shifts_intermediate_tabs_right() {
        let mut tracker = tracker_with_tabs(4);
        tracker.on_moved(TabId(4), 3, 0);
        let idx = |id| tracker.tab(TabId(id)).unwrap().index;
        assert_eq!((idx(4), idx(1), idx(2), idx(3)), (0, 1, 2, 3));

        let batch = tracker.take_dirty().remove(0);
        let order: Vec<_> = batch.tabs.iter().map(|t| t.id.0).collect();
        assert_eq!(order, vec![4, 1, 2, 3]);
    }

    #[test]
    fn removal_reports_last_known_state() {
        let mut tracker = tracker_with_tabs(2);
        tracker.take_dirty();
        let serial = tracker.serial();

        let removed = tracker.on_removed(TabId(1)).expect("known tab");
        assert_eq!(removed.suid.as_str(), "!1");
        assert!(tracker.serial() > serial);
        assert!(tracker.tab(TabId(1)).is_none());

        let batch = tracker.take_dirty().remove(0);
        assert_eq!(batch.tabs.len(), 1);
        assert_eq!(batch.removed.len(), 1);
        assert_eq!(batch.removed[0].id, TabId(1));
        assert_eq!(batch.serial, tracker.serial());
    }

    #[test]
    fn removal_of_unknown_tab_is_swallowed() {
        let mut tracker = tracker_with_tabs(1);
        assert!(tracker.on_removed(TabId(42)).is_none());
    }

    #[test]
    fn window_removal_drops_every_tab() {
        let mut tracker = tracker_with_tabs(3);
        tracker.on_created(&raw(10, 2, 0, "https://b.example/"));
        let removed = tracker.on_window_removed(WindowId(1));
        assert_eq!(removed.len(), 3);
        assert_eq!(tracker.len(), 1);

        let batches = tracker.take_dirty();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].window_id, WindowId(2));
    }

    #[test]
    fn from_content_writes_bump_serial_only_on_change() {
        let mut tracker = tracker_with_tabs(1);
        let value = serde_json::json!([{"url": "https://a.example/", "label": "Home"}]);

        assert!(tracker.set_from_content(TabId(1), "breadcrumbs", Some(value.clone())));
        let serial = tracker.serial();
        assert_eq!(tracker.tab(TabId(1)).unwrap().serial, serial);

        assert!(!tracker.set_from_content(TabId(1), "breadcrumbs", Some(value)));
        assert_eq!(tracker.serial(), serial);

        assert!(tracker.set_from_content(TabId(1), "breadcrumbs", None));
        assert!(tracker.tab(TabId(1)).unwrap().from_content.is_empty());
        assert!(!tracker.set_from_content(TabId(77), "breadcrumbs", None));
    }

    #[test]
    fn serial_strictly_increases_across_mutations() {
        let mut tracker = TabTracker::new();
        let mut seen = vec![tracker.serial()];
        tracker.on_created(&raw(1, 1, 0, "https://a.example/"));
        seen.push(tracker.serial());
        tracker.on_created(&raw(2, 1, 1, "https://a.example/2"));
        seen.push(tracker.serial());
        tracker.on_updated(&raw(1, 1, 0, "https://a.example/changed"));
        seen.push(tracker.serial());
        tracker.on_activated(TabId(2), WindowId(1));
        seen.push(tracker.serial());
        tracker.on_moved(TabId(1), 0, 1);
        seen.push(tracker.serial());
        tracker.on_removed(TabId(2));
        seen.push(tracker.serial());

        assert!(seen.windows(2).all(|w| w[1] > w[0]), "serials: {seen:?}");
    }
}
