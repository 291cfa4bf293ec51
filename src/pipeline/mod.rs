//! Knowledge base pipelines
//!
//! Each pipeline is a free function over a [`DocumentStore`] returning one
//! report value. Sub-steps that fail are recorded in the report and the
//! remaining steps still run; only a failed prerequisite returns `Err`.

pub mod blindspot;
pub mod consolidate;
pub mod exchange;
pub mod sync;

pub use blindspot::{blindspot_report, BlindspotReport};
pub use consolidate::{consolidate, ConsolidationReport};
pub use exchange::{export, import, ExportReport, ImportReport};
pub use sync::{sync_domains, SyncReport};

use serde::de::DeserializeOwned;

use crate::store::{Family, Hit};

/// Decode a hit into a typed record, logging and dropping malformed ones.
pub(crate) fn decode_hit<T: DeserializeOwned>(family: Family, hit: &Hit) -> Option<T> {
    match serde_json::from_value(hit.source.clone()) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!(family = %family, id = %hit.id, error = %e, "Skipping malformed document");
            None
        }
    }
}
