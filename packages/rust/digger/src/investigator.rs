//! An investigator that answers simple queries from stored HTML snapshots
//! instead of a live page. Used for replays and tests.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use tabdrome_shared::{Result, TabdromeError};

use crate::coordinator::{DIG_KIND, DigRequest, DigResponse, DigTarget, DigTransport, Responder};
use crate::query::SimpleQuery;

/// Page URL → HTML. Lookups fall back to the URL without its fragment.
#[derive(Debug, Default)]
pub struct HtmlSnapshotInvestigator {
    pages: RwLock<HashMap<String, String>>,
}

impl HtmlSnapshotInvestigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: HashMap<String, String>) -> Self {
        Self {
            pages: RwLock::new(pages),
        }
    }

    pub fn insert(&self, url: impl Into<String>, html: impl Into<String>) {
        self.pages.write().insert(url.into(), html.into());
    }

    fn page_for(&self, url: &str) -> Option<String> {
        let pages = self.pages.read();
        pages
            .get(url)
            .or_else(|| pages.get(url.split('#').next().unwrap_or(url)))
            .cloned()
    }

    fn investigate(&self, target: &DigTarget, request: &DigRequest) -> Result<Option<serde_json::Value>> {
        let Some(html) = self.page_for(&target.url) else {
            return Err(TabdromeError::Investigation(format!(
                "no snapshot for {}",
                target.url
            )));
        };
        let query: SimpleQuery = serde_json::from_value(request.payload.clone())
            .map_err(|e| TabdromeError::Investigation(format!("bad query payload: {e}")))?;
        let result = query.run(&html, &target.url)?;
        Ok(Some(result).filter(|v| !v.is_null()))
    }
}

impl DigTransport for HtmlSnapshotInvestigator {
    fn send(&self, target: &DigTarget, request: DigRequest, responder: Responder) -> Result<()> {
        if request.kind != DIG_KIND {
            return Err(TabdromeError::Investigation(format!(
                "unsupported request kind {:?}",
                request.kind
            )));
        }

        let response = match self.investigate(target, &request) {
            Ok(result) => DigResponse {
                id: request.id,
                result,
                error: None,
            },
            Err(e) => {
                debug!(tab_id = %target.tab_id, error = %e, "snapshot investigation failed");
                DigResponse {
                    id: request.id,
                    result: None,
                    error: Some(e.to_string()),
                }
            }
        };
        responder.respond(response);
        Ok(())
    }
}
