//! The event-driven pipeline: browser events → tracker → digger → tabulator →
//! delivery.
//!
//! One task owns all state. It waits on four sources:
//!
//! 1. browser events, applied to the tracker and dug immediately
//! 2. finished investigations, whose values are written back onto tabs
//! 3. the flush deadline, after which every dirty window is re-arranged and
//!    delivered once
//! 4. the persist deadline, after which new cache entries are written out
//!
//! Round trips run as spawned tasks that only talk to the coordinator, so
//! the tracker has exactly one writer.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

use tabdrome_digger::{
    CachedInvestigation, ContentDigger, DigTicket, DigTransport, EnrichmentRegistry,
    InvestigationCoordinator, MemoryInvestigationCache,
};
use tabdrome_shared::{AppConfig, CoordinatorConfig, PipelineConfig, Result, TabId};
use tabdrome_storage::Storage;
use tabdrome_tabulator::Tabulator;
use tabdrome_tracker::TabTracker;

use crate::bridge::TreeDelivery;
use crate::event::BrowserEvent;

type Investigation = (DigTicket, Result<Option<Value>>);

/// Counters reported when the pipeline stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub events: u64,
    pub flushes: u64,
    pub deliveries: u64,
    pub investigations_started: u64,
    pub investigations_finished: u64,
    pub cache_entries_persisted: u64,
}

pub struct Pipeline {
    config: PipelineConfig,
    tracker: TabTracker,
    digger: ContentDigger,
    tabulator: Tabulator,
    coordinator: InvestigationCoordinator,
    delivery: Arc<dyn TreeDelivery>,
    storage: Option<Storage>,
    investigations: JoinSet<Investigation>,
    flush_at: Option<Instant>,
    persist_at: Option<Instant>,
    stats: PipelineStats,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("tracker", &self.tracker)
            .field("digger", &self.digger)
            .field("tabulator", &self.tabulator)
            .field("in_flight", &self.investigations.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Persisted results whose enrichment is still registered. Rows of any other
/// `(origin, enrichment_id)` are deleted from `storage`.
async fn load_configured(
    storage: &Storage,
    registry: &EnrichmentRegistry,
) -> Result<Vec<CachedInvestigation>> {
    let (kept, stale): (Vec<_>, Vec<_>) = storage
        .load_investigations()
        .await?
        .into_iter()
        .partition(|entry| registry.contains(&entry.origin, &entry.enrichment_id));

    let stale: BTreeSet<(String, String)> = stale
        .into_iter()
        .map(|entry| (entry.origin, entry.enrichment_id))
        .collect();
    for (origin, enrichment_id) in &stale {
        let removed = storage.invalidate_enrichment(origin, enrichment_id).await?;
        info!(%origin, %enrichment_id, removed, "dropped cache of unregistered enrichment");
    }
    Ok(kept)
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        digger: ContentDigger,
        tabulator: Tabulator,
        coordinator: InvestigationCoordinator,
        delivery: Arc<dyn TreeDelivery>,
    ) -> Self {
        Self {
            config,
            tracker: TabTracker::new(),
            digger,
            tabulator,
            coordinator,
            delivery,
            storage: None,
            investigations: JoinSet::new(),
            flush_at: None,
            persist_at: None,
            stats: PipelineStats::default(),
        }
    }

    /// Persist new cache entries into `storage`.
    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Wire a pipeline from the application config: enrichment registry,
    /// arrangers, coordinator timings and, when `[storage] db_path` is set, a
    /// cache preloaded from disk. Persisted results of enrichments that are no
    /// longer registered are deleted first.
    pub async fn from_app_config(
        app: &AppConfig,
        transport: Arc<dyn DigTransport>,
        delivery: Arc<dyn TreeDelivery>,
    ) -> Result<Self> {
        let registry = EnrichmentRegistry::from_specs(&app.enrichments);
        let tabulator = Tabulator::from_names(&app.pipeline.arrangers)?;
        let coordinator = InvestigationCoordinator::new(CoordinatorConfig::from(app), transport);

        let storage = match app.storage.db_path.as_deref() {
            Some(path) => Some(Storage::open(Path::new(path)).await?),
            None => None,
        };
        let cache = match &storage {
            Some(storage) => {
                MemoryInvestigationCache::load(load_configured(storage, &registry).await?)
            }
            None => MemoryInvestigationCache::new(),
        };
        info!(
            enrichments = registry.len(),
            arrangers = ?tabulator.names(),
            cached = cache.len(),
            "pipeline configured"
        );

        let digger = ContentDigger::new(registry, Box::new(cache));
        let mut pipeline = Self::new(
            PipelineConfig::from(app),
            digger,
            tabulator,
            coordinator,
            delivery,
        );
        pipeline.storage = storage;
        Ok(pipeline)
    }

    pub fn tracker(&self) -> &TabTracker {
        &self.tracker
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Consume events until the sender side closes, then drain outstanding
    /// investigations, flush and persist one last time.
    ///
    /// Fails only on an arrangement defect; everything else is logged.
    #[instrument(skip_all)]
    pub async fn run(mut self, mut events: mpsc::Receiver<BrowserEvent>) -> Result<PipelineStats> {
        loop {
            let flush_at = self.flush_at.unwrap_or_else(Instant::now);
            let persist_at = self.persist_at.unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                Some(joined) = self.investigations.join_next(), if !self.investigations.is_empty() => {
                    self.on_investigation(joined);
                }
                _ = time::sleep_until(flush_at), if self.flush_at.is_some() => self.flush()?,
                _ = time::sleep_until(persist_at), if self.persist_at.is_some() => self.persist().await,
            }
        }

        debug!(in_flight = self.investigations.len(), "event stream closed, draining");
        while let Some(joined) = self.investigations.join_next().await {
            self.on_investigation(joined);
        }
        self.flush()?;
        self.persist().await;
        info!(stats = ?self.stats, "pipeline stopped");
        Ok(self.stats)
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(kind = event.kind()))]
    fn handle_event(&mut self, event: BrowserEvent) {
        self.stats.events += 1;
        let touched: Vec<TabId> = match event {
            BrowserEvent::Created { tab } => vec![self.tracker.on_created(&tab)],
            BrowserEvent::Updated { tab } => self.tracker.on_updated(&tab).into_iter().collect(),
            BrowserEvent::Activated { tab_id, window_id } => {
                self.tracker.on_activated(tab_id, window_id)
            }
            BrowserEvent::Moved {
                tab_id,
                from_index,
                to_index,
            } => self.tracker.on_moved(tab_id, from_index, to_index),
            BrowserEvent::Removed { tab_id } => {
                if let Some(tab) = self.tracker.on_removed(tab_id) {
                    self.digger.forget_tab(tab.id);
                }
                Vec::new()
            }
            BrowserEvent::WindowRemoved { window_id } => {
                for tab in self.tracker.on_window_removed(window_id) {
                    self.digger.forget_tab(tab.id);
                }
                self.delivery.window_removed(window_id);
                Vec::new()
            }
        };

        for tab_id in touched {
            self.dig(tab_id);
        }
        self.schedule_flush();
    }

    fn dig(&mut self, tab_id: TabId) {
        let Some(tab) = self.tracker.tab(tab_id) else {
            return;
        };
        let outcome = self.digger.dig_updated_tab(tab);
        if outcome.is_empty() {
            return;
        }
        for (key, value) in outcome.writes {
            self.tracker.set_from_content(tab_id, &key, value);
        }
        for ticket in outcome.dispatches {
            self.spawn_investigation(ticket);
        }
        self.schedule_persist();
    }

    fn spawn_investigation(&mut self, ticket: DigTicket) {
        self.stats.investigations_started += 1;
        let coordinator = self.coordinator.clone();
        self.investigations.spawn(async move {
            let result = coordinator
                .ask(&ticket.target, ticket.descriptor(), ticket.payload().clone())
                .await;
            (ticket, result)
        });
    }

    fn on_investigation(&mut self, joined: std::result::Result<Investigation, JoinError>) {
        let (ticket, result) = match joined {
            Ok(finished) => finished,
            Err(e) => {
                error!(error = %e, "investigation task failed");
                return;
            }
        };
        self.stats.investigations_finished += 1;
        let tab = self.tracker.tab(ticket.tab_id);
        let Some(value) = self.digger.complete_investigation(tab, &ticket, result) else {
            return;
        };
        if self.tracker.set_from_content(ticket.tab_id, &ticket.key, Some(value)) {
            self.schedule_flush();
        }
        self.schedule_persist();
    }

    // -----------------------------------------------------------------------
    // Flush and persist
    // -----------------------------------------------------------------------

    fn schedule_flush(&mut self) {
        if self.flush_at.is_none() && self.tracker.has_dirty() {
            self.flush_at = Some(Instant::now() + self.config.flush_delay);
        }
    }

    fn schedule_persist(&mut self) {
        if self.persist_at.is_none() && self.storage.is_some() {
            self.persist_at = Some(Instant::now() + self.config.persist_delay);
        }
    }

    /// Arrange and deliver every dirty window.
    #[instrument(skip_all)]
    fn flush(&mut self) -> Result<()> {
        self.flush_at = None;
        let batches = self.tracker.take_dirty();
        if batches.is_empty() {
            return Ok(());
        }
        self.stats.flushes += 1;
        for changes in batches {
            trace!(
                window_id = %changes.window_id,
                tabs = changes.tabs.len(),
                removed = changes.removed.len(),
                serial = changes.serial,
                "arranging window"
            );
            let tree = self
                .tabulator
                .tabulate_serialized(&changes.tabs, changes.serial)?;
            self.delivery.deliver(changes.window_id, &tree);
            self.stats.deliveries += 1;
        }
        Ok(())
    }

    /// Write new cache entries out. Failures lose only cached work.
    async fn persist(&mut self) {
        self.persist_at = None;
        let Some(storage) = &self.storage else {
            return;
        };
        let dirty = self.digger.drain_dirty_cache();
        if dirty.is_empty() {
            return;
        }
        match storage.upsert_investigations(&dirty).await {
            Ok(written) => self.stats.cache_entries_persisted += written as u64,
            Err(e) => warn!(error = %e, entries = dirty.len(), "failed to persist investigation cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;
    use serde_json::json;
    use tabdrome_shared::{RawTab, WindowId};
    use tabdrome_tabulator::SerializedNode;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        trees: Mutex<Vec<(WindowId, SerializedNode)>>,
    }

    impl TreeDelivery for Recorder {
        fn deliver(&self, window_id: WindowId, tree: &SerializedNode) {
            self.trees.lock().push((window_id, tree.clone()));
        }
    }

    struct Silent;

    impl DigTransport for Silent {
        fn send(
            &self,
            _: &tabdrome_digger::DigTarget,
            _: tabdrome_digger::DigRequest,
            _: tabdrome_digger::Responder,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn pipeline(delivery: Arc<Recorder>) -> Pipeline {
        let coordinator = InvestigationCoordinator::new(CoordinatorConfig::default(), Arc::new(Silent));
        Pipeline::new(
            PipelineConfig::default(),
            ContentDigger::new(EnrichmentRegistry::new(), Box::new(MemoryInvestigationCache::new())),
            Tabulator::from_names(&["session"]).unwrap(),
            coordinator,
            delivery,
        )
    }

    fn created(id: u32, window: u32, index: u32) -> BrowserEvent {
        let tab: RawTab = serde_json::from_value(json!({
            "id": id, "windowId": window, "index": index,
            "url": format!("https://a.example/{id}"), "title": format!("T{id}")
        }))
        .unwrap();
        BrowserEvent::Created { tab }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_coalesced_into_one_delivery_per_window() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(16);
        for event in [created(1, 1, 0), created(2, 1, 1), created(3, 2, 0)] {
            tx.send(event).await.unwrap();
        }
        drop(tx);

        let stats = pipeline(recorder.clone()).run(rx).await.unwrap();
        assert_eq!(stats.events, 3);
        assert_eq!(stats.flushes, 1);

        let trees = recorder.trees.lock();
        let by_window: BTreeMap<_, _> = trees.iter().map(|(w, t)| (*w, t)).collect();
        assert_eq!(trees.len(), 2);
        assert_eq!(by_window[&WindowId(1)].children.len(), 2);
        assert_eq!(by_window[&WindowId(1)].serial, 3);
        assert_eq!(by_window[&WindowId(2)].children.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn events_after_the_delay_flush_separately() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(16);
        let run = tokio::spawn(pipeline(recorder.clone()).run(rx));

        tx.send(created(1, 1, 0)).await.unwrap();
        time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(BrowserEvent::Removed { tab_id: TabId(1) }).await.unwrap();
        drop(tx);

        let stats = run.await.unwrap().unwrap();
        assert_eq!(stats.flushes, 2);
        let trees = recorder.trees.lock();
        assert_eq!(trees[0].1.children.len(), 1);
        assert!(trees[1].1.children.is_empty());
        assert_ne!(trees[0].1.hash, trees[1].1.hash);
    }
}
