//! Blindspot classifier
//!
//! Merges the lookup snapshot with a fresh aggregation of the staging
//! history and sorts every domain into VOID, SPARSE, DENSE or STALE.
//! Either source may fail; it then contributes nothing and the report is
//! built from whatever was read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::decode_hit;
use crate::memory::{
    density_score, round2, timestamp, AuditAction, AuditLogEntry, DensityStatus, DomainSnapshot,
    STALE_AFTER_DAYS,
};
use crate::store::{AggregateSpec, DocumentStore, Family, Filter, MetricOp, SearchQuery};

/// Domains read from either source.
pub const DOMAIN_BUCKETS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewSource {
    Lookup,
    Staging,
}

/// One source's picture of a domain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainView {
    pub domain: String,
    pub density_score: f64,
    pub memory_count: u64,
    pub avg_confidence: f64,
    pub last_updated: Option<String>,
    pub source: ViewSource,
}

impl From<DomainSnapshot> for DomainView {
    fn from(s: DomainSnapshot) -> Self {
        Self {
            domain: s.domain,
            density_score: s.density_score,
            memory_count: s.memory_count,
            avg_confidence: s.avg_confidence,
            last_updated: s.last_updated,
            source: ViewSource::Lookup,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlindspotEntry {
    #[serde(flatten)]
    pub view: DomainView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_since_update: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Classified {
    pub void: Vec<BlindspotEntry>,
    pub sparse: Vec<BlindspotEntry>,
    pub dense: Vec<BlindspotEntry>,
    pub stale: Vec<BlindspotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlindspotReport {
    pub summary: String,
    pub report: Classified,
}

async fn read_lookup(store: &dyn DocumentStore) -> Vec<DomainView> {
    let query = SearchQuery::new(Filter::MatchAll)
        .size(DOMAIN_BUCKETS)
        .source([
            "domain",
            "memory_count",
            "avg_confidence",
            "density_score",
            "status",
            "last_updated",
        ]);
    match store.search(Family::DomainLookup, query).await {
        Ok(page) => page
            .hits
            .iter()
            .filter_map(|hit| decode_hit::<DomainSnapshot>(Family::DomainLookup, hit))
            .map(DomainView::from)
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "Lookup read failed; continuing without it");
            Vec::new()
        }
    }
}

async fn read_staging(store: &dyn DocumentStore) -> Vec<DomainView> {
    let spec = AggregateSpec::group_by("domain", DOMAIN_BUCKETS)
        .metric("count", MetricOp::Max, "memory_count")
        .metric("confidence", MetricOp::Avg, "avg_confidence")
        .metric("density", MetricOp::Avg, "density_score")
        .metric("latest", MetricOp::Latest, "last_updated");
    match store.aggregate(Family::DomainStaging, spec).await {
        Ok(buckets) => buckets
            .into_iter()
            .map(|b| {
                let count = b.value("count").unwrap_or(0.0).max(0.0) as u64;
                let confidence = round2(b.value("confidence").unwrap_or(0.0));
                let density = b
                    .value("density")
                    .map(round2)
                    .unwrap_or_else(|| density_score(count, confidence));
                DomainView {
                    last_updated: b.string("latest"),
                    domain: b.key,
                    density_score: density,
                    memory_count: count,
                    avg_confidence: confidence,
                    source: ViewSource::Staging,
                }
            })
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "Staging aggregation failed; continuing without it");
            Vec::new()
        }
    }
}

/// Merge both views. Staging replaces a lookup row only when strictly newer.
pub fn merge(lookup: Vec<DomainView>, staging: Vec<DomainView>) -> BTreeMap<String, DomainView> {
    let mut domains: BTreeMap<String, DomainView> = lookup
        .into_iter()
        .map(|v| (v.domain.clone(), v))
        .collect();

    for view in staging {
        let replace = match domains.get(&view.domain) {
            None => true,
            Some(current) => timestamp::is_newer(
                view.last_updated.as_deref(),
                current.last_updated.as_deref(),
            ),
        };
        if replace {
            domains.insert(view.domain.clone(), view);
        }
    }
    domains
}

/// Staleness first, then density.
pub fn classify(views: impl IntoIterator<Item = DomainView>, now: DateTime<Utc>) -> Classified {
    let mut out = Classified::default();
    for view in views {
        let days = view
            .last_updated
            .as_deref()
            .and_then(|s| timestamp::days_since(s, now));
        if let Some(days) = days.filter(|d| *d > STALE_AFTER_DAYS) {
            out.stale.push(BlindspotEntry {
                view,
                days_since_update: Some(days),
            });
            continue;
        }

        let entry = BlindspotEntry {
            view,
            days_since_update: None,
        };
        match DensityStatus::from_score(entry.view.density_score) {
            DensityStatus::Void => out.void.push(entry),
            DensityStatus::Sparse => out.sparse.push(entry),
            DensityStatus::Dense => out.dense.push(entry),
        }
    }
    out
}

/// Build the report against the current time.
pub async fn blindspot_report(store: &dyn DocumentStore) -> BlindspotReport {
    blindspot_report_at(store, Utc::now()).await
}

pub async fn blindspot_report_at(store: &dyn DocumentStore, now: DateTime<Utc>) -> BlindspotReport {
    let lookup = read_lookup(store).await;
    let staging = read_staging(store).await;
    let merged = merge(lookup, staging);
    let report = classify(merged.into_values(), now);

    let summary = format!(
        "VOID {}, SPARSE {}, DENSE {}, Stale {}",
        report.void.len(),
        report.sparse.len(),
        report.dense.len(),
        report.stale.len()
    );
    tracing::info!(%summary, "Blindspot report generated");

    let triggered = !(report.void.is_empty() && report.sparse.is_empty() && report.stale.is_empty());
    AuditLogEntry::new(AuditAction::BlindspotReport)
        .details(summary.clone())
        .blindspot_triggered(triggered)
        .record(store)
        .await;

    BlindspotReport { summary, report }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::DomainStagingRecord;
    use crate::store::{InMemoryStore, StoreOp};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn view(domain: &str, density: f64, last_updated: Option<String>, source: ViewSource) -> DomainView {
        DomainView {
            domain: domain.to_string(),
            density_score: density,
            memory_count: 0,
            avg_confidence: 0.0,
            last_updated,
            source,
        }
    }

    fn days_ago(days: i64) -> Option<String> {
        Some(timestamp::format(now() - Duration::days(days)))
    }

    #[test]
    fn test_density_buckets() {
        let out = classify(
            vec![
                view("a", 0.5, days_ago(1), ViewSource::Lookup),
                view("b", 3.0, days_ago(1), ViewSource::Lookup),
                view("c", 7.0, days_ago(1), ViewSource::Lookup),
            ],
            now(),
        );
        assert_eq!(out.void[0].view.domain, "a");
        assert_eq!(out.sparse[0].view.domain, "b");
        assert_eq!(out.dense[0].view.domain, "c");
        assert!(out.stale.is_empty());
    }

    #[test]
    fn test_stale_beats_density() {
        let out = classify(vec![view("old", 10.0, days_ago(31), ViewSource::Lookup)], now());
        assert!(out.dense.is_empty());
        assert_eq!(out.stale.len(), 1);
        assert_eq!(out.stale[0].days_since_update, Some(31));
        assert_eq!(out.stale[0].view.density_score, 10.0);
    }

    #[test]
    fn test_thirty_days_is_not_stale() {
        let out = classify(vec![view("edge", 10.0, days_ago(30), ViewSource::Lookup)], now());
        assert_eq!(out.dense.len(), 1);
    }

    #[test]
    fn test_unparseable_date_is_not_stale() {
        let out = classify(
            vec![view("x", 2.0, Some("yesterday".to_string()), ViewSource::Lookup)],
            now(),
        );
        assert_eq!(out.sparse.len(), 1);
    }

    #[test]
    fn test_merge_recency_rule() {
        let lookup = vec![
            view("newer-in-staging", 1.0, days_ago(10), ViewSource::Lookup),
            view("older-in-staging", 9.0, days_ago(1), ViewSource::Lookup),
            view("tie", 9.0, days_ago(2), ViewSource::Lookup),
            view("lookup-only", 2.0, days_ago(2), ViewSource::Lookup),
        ];
        let staging = vec![
            view("newer-in-staging", 6.0, days_ago(1), ViewSource::Staging),
            view("older-in-staging", 0.2, days_ago(5), ViewSource::Staging),
            view("tie", 0.2, days_ago(2), ViewSource::Staging),
            view("no-date", 0.1, None, ViewSource::Staging),
            view("staging-only", 4.0, days_ago(3), ViewSource::Staging),
        ];
        let merged = merge(lookup, staging);

        let newer = &merged["newer-in-staging"];
        assert_eq!(newer.source, ViewSource::Staging);
        assert_eq!(newer.density_score, 6.0);
        assert_eq!(merged["older-in-staging"].source, ViewSource::Lookup);
        assert_eq!(merged["tie"].source, ViewSource::Lookup);
        assert_eq!(merged["lookup-only"].source, ViewSource::Lookup);
        assert_eq!(merged["staging-only"].source, ViewSource::Staging);
        assert_eq!(merged["no-date"].source, ViewSource::Staging);
    }

    #[tokio::test]
    async fn test_report_reads_both_sources() {
        let store = InMemoryStore::new();
        let snapshot = DomainSnapshot::new("payments", 20, 0.8, 16.0, days_ago(40));
        store
            .index(Family::DomainLookup, serde_json::to_value(&snapshot).unwrap())
            .await
            .unwrap();

        let mut staged = DomainStagingRecord::measured("database", 2, 0.9);
        staged.last_updated = days_ago(2).unwrap();
        store
            .index(Family::DomainStaging, serde_json::to_value(&staged).unwrap())
            .await
            .unwrap();

        let report = blindspot_report_at(&store, now()).await;
        assert_eq!(report.summary, "VOID 0, SPARSE 1, DENSE 0, Stale 1");
        assert_eq!(report.report.stale[0].view.domain, "payments");
        assert_eq!(report.report.sparse[0].view.source, ViewSource::Staging);
        assert_eq!(report.report.sparse[0].view.density_score, 1.8);

        let audit = store.documents(Family::AuditLog).await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0]["action"], "blindspot_report");
        assert_eq!(audit[0]["blindspot_triggered"], true);
    }

    #[tokio::test]
    async fn test_staging_history_takes_max_count_and_average_density() {
        let store = InMemoryStore::new();
        for (count, confidence, age) in [(2, 0.9, 3), (6, 0.5, 1)] {
            let mut staged = DomainStagingRecord::measured("database", count, confidence);
            staged.last_updated = days_ago(age).unwrap();
            store
                .index(Family::DomainStaging, serde_json::to_value(&staged).unwrap())
                .await
                .unwrap();
        }

        let report = blindspot_report_at(&store, now()).await;
        let db = &report.report.sparse[0].view;
        assert_eq!(db.memory_count, 6);
        assert_eq!(db.avg_confidence, 0.7);
        // Densities 1.8 and 3.0 average to 2.4.
        assert_eq!(db.density_score, 2.4);
        assert_eq!(db.last_updated, days_ago(1));
    }

    #[tokio::test]
    async fn test_touch_only_domain_is_void() {
        let store = InMemoryStore::new();
        let mut touch = DomainStagingRecord::touch("fresh");
        touch.last_updated = days_ago(1).unwrap();
        store
            .index(Family::DomainStaging, serde_json::to_value(&touch).unwrap())
            .await
            .unwrap();

        let report = blindspot_report_at(&store, now()).await;
        assert_eq!(report.report.void.len(), 1);
        assert_eq!(report.report.void[0].view.density_score, 0.0);
    }

    #[tokio::test]
    async fn test_failed_sources_degrade_to_empty() {
        let store = InMemoryStore::new();
        let snapshot = DomainSnapshot::new("payments", 20, 0.8, 16.0, days_ago(1));
        store
            .index(Family::DomainLookup, serde_json::to_value(&snapshot).unwrap())
            .await
            .unwrap();
        store.fail_on(StoreOp::Aggregate).await;

        let report = blindspot_report_at(&store, now()).await;
        assert_eq!(report.report.dense.len(), 1);

        store.fail_on(StoreOp::Search).await;
        let report = blindspot_report_at(&store, now()).await;
        assert_eq!(report.summary, "VOID 0, SPARSE 0, DENSE 0, Stale 0");
    }

    #[tokio::test]
    async fn test_missing_lookup_collection_is_tolerated() {
        let store = InMemoryStore::new();
        store.delete_collection(Family::DomainLookup).await.unwrap();
        let report = blindspot_report_at(&store, now()).await;
        assert!(report.report.void.is_empty());
    }
}
