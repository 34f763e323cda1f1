//! Enrichment for Tabdrome: deciding, per tab and enrichment key, whether a
//! cached value, a synchronous extraction or an investigator round trip
//! supplies the tab's `from_content` data, and dropping values whose
//! justifying tab state has changed.

pub mod cache;
pub mod constraint;
pub mod coordinator;
pub mod engine;
pub mod investigator;
pub mod query;
pub mod registry;
pub mod url_extraction;

pub use cache::{CachedInvestigation, InvestigationCache, MemoryInvestigationCache};
pub use constraint::Constraint;
pub use coordinator::{
    DIG_KIND, DigRequest, DigResponse, DigTarget, DigTransport, InvestigationCoordinator,
    Responder,
};
pub use engine::{ContentDigger, DigOutcome, DigTicket};
pub use investigator::HtmlSnapshotInvestigator;
pub use query::SimpleQuery;
pub use registry::{Enrichment, EnrichmentEngine, EnrichmentRegistry};
pub use url_extraction::UrlExtractionSpec;
