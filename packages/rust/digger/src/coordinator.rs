//! Request/response plumbing between the enrichment engine and the external
//! investigators that examine a tab's content.
//!
//! Each [`InvestigationCoordinator::ask`] allocates a monotonic request id,
//! hands a [`DigRequest`] to the [`DigTransport`] and waits for the matching
//! [`DigResponse`]. Investigators are not guaranteed to answer (the page may
//! navigate away mid-request), so an eviction sweep rejects anything older
//! than the configured age with a retryable [`TabdromeError::Timeout`]. The
//! sweep only runs while requests are outstanding.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, instrument, trace};

use tabdrome_shared::{CoordinatorConfig, Result, TabId, TabdromeError};

/// Message kind of every investigation request.
pub const DIG_KIND: &str = "dig";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request sent to a tab's content context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigRequest {
    pub id: u64,
    pub kind: String,
    pub payload: Value,
}

/// Investigator answer. An `error` is logged; `result` is delivered either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The tab an investigation is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigTarget {
    pub tab_id: TabId,
    pub url: String,
}

/// Delivers requests to investigators. Answers come back through the
/// [`Responder`], synchronously or later from another task.
pub trait DigTransport: Send + Sync {
    fn send(&self, target: &DigTarget, request: DigRequest, responder: Responder) -> Result<()>;
}

/// Handle a transport uses to report answers. Does not keep the coordinator
/// alive.
#[derive(Clone)]
pub struct Responder {
    inner: Weak<Inner>,
}

impl Responder {
    pub fn respond(&self, response: DigResponse) {
        match self.inner.upgrade() {
            Some(inner) => inner.on_response(response),
            None => debug!(request_id = response.id, "coordinator gone, dropping response"),
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

type Reply = oneshot::Sender<Result<Option<Value>>>;

struct PendingRequest {
    issued_at: Instant,
    descriptor: String,
    reply: Reply,
}

#[derive(Default)]
struct State {
    pending: HashMap<u64, PendingRequest>,
    eviction: Option<JoinHandle<()>>,
}

struct Inner {
    config: CoordinatorConfig,
    transport: Arc<dyn DigTransport>,
    next_id: AtomicU64,
    state: Mutex<State>,
}

/// Matches investigator answers to outstanding requests. Cheap to clone.
#[derive(Clone)]
pub struct InvestigationCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for InvestigationCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvestigationCoordinator")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl InvestigationCoordinator {
    pub fn new(config: CoordinatorConfig, transport: Arc<dyn DigTransport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                next_id: AtomicU64::new(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Ask the investigator behind `target` to run `payload`.
    ///
    /// Resolves with the investigator's result (`None` for an in-band
    /// failure), or fails with [`TabdromeError::Timeout`] when evicted and
    /// [`TabdromeError::Investigation`] when the transport refuses the request.
    #[instrument(skip_all, fields(tab_id = %target.tab_id, descriptor = %descriptor))]
    pub async fn ask(
        &self,
        target: &DigTarget,
        descriptor: &str,
        payload: Value,
    ) -> Result<Option<Value>> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            state.pending.insert(
                id,
                PendingRequest {
                    issued_at: Instant::now(),
                    descriptor: descriptor.to_string(),
                    reply: tx,
                },
            );
            self.arm_eviction(&mut state);
        }
        trace!(request_id = id, "dispatching investigation");

        let request = DigRequest {
            id,
            kind: DIG_KIND.into(),
            payload,
        };
        // The transport may answer synchronously, so the lock must be released.
        if let Err(e) = self.inner.transport.send(target, request, self.responder()) {
            self.inner.forget(id);
            return Err(TabdromeError::Investigation(format!(
                "request {id} could not be sent: {e}"
            )));
        }

        rx.await.map_err(|_| {
            TabdromeError::Investigation(format!("request {id} was dropped without an answer"))
        })?
    }

    /// Deliver an answer received outside of a [`Responder`].
    pub fn on_response(&self, response: DigResponse) {
        self.inner.on_response(response);
    }

    pub fn responder(&self) -> Responder {
        Responder {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Whether the eviction sweep is currently scheduled.
    pub fn eviction_armed(&self) -> bool {
        self.inner.state.lock().eviction.is_some()
    }

    fn arm_eviction(&self, state: &mut State) {
        if state.eviction.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.eviction_interval;
        state.eviction = Some(tokio::spawn(eviction_loop(weak, interval)));
    }
}

impl Inner {
    fn on_response(&self, response: DigResponse) {
        let pending = {
            let mut state = self.state.lock();
            let pending = state.pending.remove(&response.id);
            if state.pending.is_empty() {
                if let Some(handle) = state.eviction.take() {
                    handle.abort();
                }
            }
            pending
        };

        let Some(pending) = pending else {
            debug!(request_id = response.id, "response for unknown request, ignoring");
            return;
        };

        if let Some(err) = &response.error {
            error!(
                request_id = response.id,
                descriptor = %pending.descriptor,
                error = %err,
                "investigator reported an error"
            );
        }
        // The asker may have given up; nothing to do then.
        let _ = pending.reply.send(Ok(response.result));
    }

    fn forget(&self, id: u64) {
        let mut state = self.state.lock();
        state.pending.remove(&id);
        if state.pending.is_empty() {
            if let Some(handle) = state.eviction.take() {
                handle.abort();
            }
        }
    }

    /// Reject every request older than the eviction age. Returns whether the
    /// sweep should keep running.
    fn evict_expired(&self) -> bool {
        let now = Instant::now();
        let age = self.config.eviction_age;

        let (expired, keep_running) = {
            let mut state = self.state.lock();
            let ids: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.issued_at) >= age)
                .map(|(id, _)| *id)
                .collect();
            let expired: Vec<(u64, PendingRequest)> = ids
                .into_iter()
                .filter_map(|id| state.pending.remove(&id).map(|p| (id, p)))
                .collect();
            let keep_running = !state.pending.is_empty();
            if !keep_running {
                state.eviction = None;
            }
            (expired, keep_running)
        };

        for (id, pending) in expired {
            debug!(request_id = id, descriptor = %pending.descriptor, "evicting unanswered request");
            let _ = pending
                .reply
                .send(Err(TabdromeError::Timeout { request_id: id }));
        }
        keep_running
    }
}

async fn eviction_loop(inner: Weak<Inner>, interval: Duration) {
    loop {
        time::sleep(interval).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.evict_expired() {
            return;
        }
    }
}
