//! Domain synchronizer
//!
//! Rebuilds the lookup collection from the whole staging history: delete,
//! recreate with the fixed schema, bulk insert one row per domain. The
//! sequence is not atomic, so each step reports separately.
//!
//! Rows are classified by density alone; staleness is only applied by the
//! blindspot report.

use serde::Serialize;

use crate::error::Result;
use crate::memory::domain::lookup_schema;
use crate::memory::{density_score, round2, DomainSnapshot};
use crate::outcome::StepOutcome;
use crate::store::{AggregateSpec, Bucket, DocumentStore, Family, MetricOp};

/// Domains carried into the lookup collection.
pub const SYNC_BUCKETS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertStats {
    pub inserted: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncReport {
    /// Staging was empty; the lookup collection was left untouched
    Skipped { summary: String },
    Completed {
        summary: String,
        domains_aggregated: usize,
        domains_synced: usize,
        /// `true` when a previous lookup collection existed
        delete: StepOutcome<bool>,
        create: StepOutcome<()>,
        insert: StepOutcome<InsertStats>,
    },
}

impl SyncReport {
    pub fn summary(&self) -> &str {
        match self {
            Self::Skipped { summary } | Self::Completed { summary, .. } => summary,
        }
    }

    pub fn domains_synced(&self) -> usize {
        match self {
            Self::Skipped { .. } => 0,
            Self::Completed { domains_synced, .. } => *domains_synced,
        }
    }
}

fn snapshot_from_bucket(bucket: &Bucket) -> DomainSnapshot {
    let count = bucket.value("max_count").unwrap_or(0.0).max(0.0) as u64;
    let confidence = round2(bucket.value("avg_conf").unwrap_or(0.0));
    let density = bucket
        .value("max_density")
        .map(round2)
        .unwrap_or_else(|| density_score(count, confidence));
    DomainSnapshot::new(&bucket.key, count, confidence, density, bucket.string("latest"))
}

/// Rebuild the lookup collection.
///
/// Returns `Err` only when the staging aggregation cannot be read; every
/// later step is reported in [`SyncReport::Completed`].
pub async fn sync_domains(store: &dyn DocumentStore) -> Result<SyncReport> {
    let spec = AggregateSpec::group_by("domain", SYNC_BUCKETS)
        .metric("latest", MetricOp::Latest, "last_updated")
        .metric("avg_conf", MetricOp::Avg, "avg_confidence")
        .metric("max_count", MetricOp::Max, "memory_count")
        .metric("max_density", MetricOp::Max, "density_score");

    let buckets = store
        .aggregate(Family::DomainStaging, spec)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Staging aggregation failed");
            e
        })?;

    if buckets.is_empty() {
        tracing::info!("No data in staging, skipping sync");
        return Ok(SyncReport::Skipped {
            summary: "No data in staging, skipping sync".to_string(),
        });
    }

    let snapshots: Vec<DomainSnapshot> = buckets.iter().map(snapshot_from_bucket).collect();

    let delete = StepOutcome::from_store(
        "lookup_delete",
        store.delete_collection(Family::DomainLookup).await,
    );
    let create = StepOutcome::from_store(
        "lookup_create",
        store
            .create_collection(Family::DomainLookup, lookup_schema())
            .await,
    );

    let insert = if create.is_ok() {
        let mut items = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            items.push((Family::DomainLookup, serde_json::to_value(snapshot)?));
        }
        StepOutcome::from_store(
            "lookup_insert",
            store.bulk_index(items).await.map(|statuses| {
                let inserted = statuses.iter().filter(|s| s.is_ok()).count();
                InsertStats {
                    inserted,
                    rejected: statuses.len() - inserted,
                }
            }),
        )
    } else {
        StepOutcome::skipped("lookup collection was not recreated")
    };

    let (summary, domains_synced) = match &insert {
        StepOutcome::Ok(stats) => {
            let mut summary = format!("Sync complete: {} domains", snapshots.len());
            if stats.rejected > 0 {
                summary.push_str(" (some bulk errors occurred)");
            }
            (summary, stats.inserted)
        }
        StepOutcome::Failed(reason) => (format!("Sync failed at bulk insert: {}", reason), 0),
        StepOutcome::Skipped(_) => match &create {
            StepOutcome::Failed(reason) => (format!("Sync failed at lookup recreation: {}", reason), 0),
            _ => ("Sync failed at lookup recreation".to_string(), 0),
        },
    };
    tracing::info!(%summary, domains = snapshots.len(), "Domain sync finished");

    Ok(SyncReport::Completed {
        summary,
        domains_aggregated: snapshots.len(),
        domains_synced,
        delete,
        create,
        insert,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DensityStatus, DomainStagingRecord, EpisodicRecord};
    use crate::pipeline::consolidate::consolidate;
    use crate::store::{InMemoryStore, StoreOp};

    async fn stage(store: &InMemoryStore, record: DomainStagingRecord) {
        store
            .index(Family::DomainStaging, serde_json::to_value(&record).unwrap())
            .await
            .unwrap();
    }

    async fn lookup_domains(store: &InMemoryStore) -> Vec<String> {
        let mut domains: Vec<String> = store
            .documents(Family::DomainLookup)
            .await
            .iter()
            .map(|d| d["domain"].as_str().unwrap().to_string())
            .collect();
        domains.sort();
        domains
    }

    #[tokio::test]
    async fn test_empty_staging_skips() {
        let store = InMemoryStore::new();
        let old = DomainSnapshot::new("kept", 1, 1.0, 1.0, None);
        store
            .index(Family::DomainLookup, serde_json::to_value(&old).unwrap())
            .await
            .unwrap();

        let report = sync_domains(&store).await.unwrap();
        assert!(matches!(report, SyncReport::Skipped { .. }));
        assert_eq!(lookup_domains(&store).await, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_aggregates_max_avg_latest() {
        let store = InMemoryStore::new();
        let mut first = DomainStagingRecord::measured("db", 2, 0.9);
        first.last_updated = "2025-01-01T00:00:00.000Z".to_string();
        let mut second = DomainStagingRecord::measured("db", 6, 0.7);
        second.last_updated = "2025-02-01T00:00:00.000Z".to_string();
        stage(&store, first).await;
        stage(&store, second).await;

        let report = sync_domains(&store).await.unwrap();
        assert_eq!(report.summary(), "Sync complete: 1 domains");
        assert_eq!(report.domains_synced(), 1);

        let rows = store.documents(Family::DomainLookup).await;
        let row: DomainSnapshot = serde_json::from_value(rows[0].clone()).unwrap();
        assert_eq!(row.memory_count, 6);
        assert_eq!(row.avg_confidence, 0.8);
        assert_eq!(row.density_score, 4.2);
        assert_eq!(row.status, DensityStatus::Sparse);
        assert_eq!(row.last_updated.as_deref(), Some("2025-02-01T00:00:00.000Z"));
        assert_eq!(
            store.schema(Family::DomainLookup).await.unwrap().mode.as_deref(),
            Some("lookup")
        );
    }

    #[tokio::test]
    async fn test_rebuild_drops_vanished_domains() {
        let store = InMemoryStore::new();
        stage(&store, DomainStagingRecord::measured("a", 3, 0.9)).await;
        stage(&store, DomainStagingRecord::measured("b", 3, 0.9)).await;
        sync_domains(&store).await.unwrap();
        assert_eq!(lookup_domains(&store).await, vec!["a", "b"]);

        // Staging is never trimmed by this crate; simulate a history that
        // now only holds `a`.
        store.delete_collection(Family::DomainStaging).await.unwrap();
        stage(&store, DomainStagingRecord::measured("a", 5, 0.9)).await;
        sync_domains(&store).await.unwrap();
        assert_eq!(lookup_domains(&store).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = InMemoryStore::new();
        stage(&store, DomainStagingRecord::measured("a", 3, 0.9)).await;
        let first = sync_domains(&store).await.unwrap();
        let rows_first = store.documents(Family::DomainLookup).await;
        let second = sync_domains(&store).await.unwrap();
        let rows_second = store.documents(Family::DomainLookup).await;
        assert_eq!(first.summary(), second.summary());
        assert_eq!(rows_first, rows_second);
    }

    #[tokio::test]
    async fn test_density_matches_consolidation() {
        let store = InMemoryStore::new();
        for text in ["one", "two", "three"] {
            let ep = EpisodicRecord::new(text, "ops", 0.7, vec![]);
            store
                .index(Family::Episodic, serde_json::to_value(&ep).unwrap())
                .await
                .unwrap();
        }
        let consolidated = consolidate(&store).await.unwrap();
        let measured = &consolidated.domain_updates["ops"];

        sync_domains(&store).await.unwrap();
        let rows = store.documents(Family::DomainLookup).await;
        let row: DomainSnapshot = serde_json::from_value(rows[0].clone()).unwrap();
        assert_eq!(row.density_score, measured.density_score);
        assert_eq!(row.density_score, density_score(row.memory_count, row.avg_confidence));
        assert_eq!(row.status, measured.status);
    }

    #[tokio::test]
    async fn test_sync_ignores_staleness() {
        let store = InMemoryStore::new();
        let mut old = DomainStagingRecord::measured("legacy", 10, 1.0);
        old.last_updated = "2020-01-01T00:00:00.000Z".to_string();
        stage(&store, old).await;
        sync_domains(&store).await.unwrap();
        let rows = store.documents(Family::DomainLookup).await;
        assert_eq!(rows[0]["status"], "DENSE");
    }

    #[tokio::test]
    async fn test_aggregation_failure_is_fatal() {
        let store = InMemoryStore::new();
        stage(&store, DomainStagingRecord::measured("a", 3, 0.9)).await;
        store.fail_on(StoreOp::Aggregate).await;
        assert!(sync_domains(&store).await.is_err());
    }

    #[tokio::test]
    async fn test_each_step_reported() {
        let store = InMemoryStore::new();
        stage(&store, DomainStagingRecord::measured("a", 3, 0.9)).await;

        store.fail_on(StoreOp::CreateCollection).await;
        let report = sync_domains(&store).await.unwrap();
        match report {
            SyncReport::Completed { delete, create, insert, domains_synced, summary, .. } => {
                assert_eq!(delete, StepOutcome::Ok(true));
                assert!(matches!(create, StepOutcome::Failed(_)));
                assert!(matches!(insert, StepOutcome::Skipped(_)));
                assert_eq!(domains_synced, 0);
                assert!(summary.contains("recreation"));
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert!(!store.has_collection(Family::DomainLookup).await);

        store.clear_faults().await;
        store.fail_on(StoreOp::BulkIndex).await;
        let report = sync_domains(&store).await.unwrap();
        match report {
            SyncReport::Completed { delete, create, insert, .. } => {
                assert_eq!(delete, StepOutcome::Ok(false));
                assert!(create.is_ok());
                assert!(matches!(insert, StepOutcome::Failed(_)));
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_partial_bulk_rejection() {
        let store = InMemoryStore::new();
        stage(&store, DomainStagingRecord::measured("a", 3, 0.9)).await;
        store.fail_on_family(StoreOp::BulkIndex, Family::DomainLookup).await;
        let report = sync_domains(&store).await.unwrap();
        assert_eq!(report.summary(), "Sync complete: 1 domains (some bulk errors occurred)");
        assert_eq!(report.domains_synced(), 0);
    }
}
