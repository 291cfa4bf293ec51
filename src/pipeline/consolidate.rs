//! Consolidation engine
//!
//! Pulls a batch of unconsolidated episodes (newest first), groups them by
//! category, merges in fact statistics, appends one measured staging record
//! per category and finally flips the batch to consolidated.
//!
//! The flip is not coupled to the staging writes. If it fails the batch is
//! picked up again next run and its categories get a second staging record.

use serde::Serialize;
use std::collections::BTreeMap;

use super::decode_hit;
use crate::error::Result;
use crate::memory::episode::{CONSOLIDATED_FIELD, UNKNOWN_CATEGORY};
use crate::memory::{
    normalize_name, round2, AuditAction, AuditLogEntry, DensityStatus, DomainStagingRecord,
    EpisodicRecord,
};
use crate::outcome::StepOutcome;
use crate::store::{
    AggregateSpec, DocumentStore, Family, FieldUpdate, Filter, MetricOp, SearchQuery, SortOrder,
};

/// Episodes taken per run.
pub const EPISODE_BATCH: usize = 50;
/// Category buckets read from the fact aggregation.
pub const FACT_BUCKETS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStats {
    pub episode_count: u64,
    pub avg_importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactStats {
    pub doc_count: u64,
    pub avg_confidence: Option<f64>,
}

/// Measured values written for one category, with the write's outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainUpdate {
    pub memory_count: u64,
    pub avg_confidence: f64,
    pub density_score: f64,
    pub status: DensityStatus,
    pub write: StepOutcome<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewEpisode {
    pub category: String,
    pub content: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidationReport {
    pub summary: String,
    pub episodes_processed: usize,
    pub category_stats: BTreeMap<String, CategoryStats>,
    pub fact_stats: StepOutcome<BTreeMap<String, FactStats>>,
    pub domain_updates: BTreeMap<String, DomainUpdate>,
    pub marked_consolidated: StepOutcome<u64>,
    /// Raw episode text grouped by category, for downstream extraction
    pub episodes_for_review: Vec<ReviewEpisode>,
}

impl ConsolidationReport {
    fn nothing_to_do() -> Self {
        let reason = "no unconsolidated episodes";
        Self {
            summary: "No episodes to consolidate".to_string(),
            episodes_processed: 0,
            category_stats: BTreeMap::new(),
            fact_stats: StepOutcome::skipped(reason),
            domain_updates: BTreeMap::new(),
            marked_consolidated: StepOutcome::skipped(reason),
            episodes_for_review: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Group {
    total_importance: f64,
    episodes: Vec<EpisodicRecord>,
}

fn category_of(episode: &EpisodicRecord) -> String {
    let name = normalize_name(&episode.category);
    if name.is_empty() {
        UNKNOWN_CATEGORY.to_string()
    } else {
        name
    }
}

/// Run one consolidation pass.
///
/// Returns `Err` only when the episode batch itself cannot be read.
pub async fn consolidate(store: &dyn DocumentStore) -> Result<ConsolidationReport> {
    let query = SearchQuery::new(Filter::term(CONSOLIDATED_FIELD, false))
        .size(EPISODE_BATCH)
        .sort_by("timestamp", SortOrder::Desc)
        .source(["raw_text", "content", "category", "importance", "timestamp"]);

    let page = store.search(Family::Episodic, query).await.map_err(|e| {
        tracing::error!(error = %e, "Episode fetch failed");
        e
    })?;

    if page.hits.is_empty() {
        tracing::debug!("No unconsolidated episodes");
        return Ok(ConsolidationReport::nothing_to_do());
    }

    let mut groups: BTreeMap<String, Group> = BTreeMap::new();
    let mut ids = Vec::with_capacity(page.hits.len());
    for hit in &page.hits {
        // An undecodable episode still counts toward its batch.
        let episode = decode_hit::<EpisodicRecord>(Family::Episodic, hit)
            .unwrap_or_else(|| EpisodicRecord::new("", UNKNOWN_CATEGORY, 0.0, Vec::new()));
        let group = groups.entry(category_of(&episode)).or_default();
        group.total_importance += episode.importance;
        group.episodes.push(episode);
        ids.push(hit.id.clone());
    }

    let category_stats: BTreeMap<String, CategoryStats> = groups
        .iter()
        .map(|(cat, g)| {
            let count = g.episodes.len() as u64;
            let stats = CategoryStats {
                episode_count: count,
                avg_importance: round2(g.total_importance / count as f64),
            };
            (cat.clone(), stats)
        })
        .collect();

    let fact_spec = AggregateSpec::group_by("category", FACT_BUCKETS).metric(
        "avg_confidence",
        MetricOp::Avg,
        "confidence",
    );
    let fact_stats = StepOutcome::from_store(
        "fact_aggregation",
        store
            .aggregate(Family::Semantic, fact_spec)
            .await
            .map(|buckets| {
                buckets
                    .into_iter()
                    .map(|b| {
                        let stats = FactStats {
                            doc_count: b.doc_count,
                            avg_confidence: b.value("avg_confidence").map(round2),
                        };
                        (b.key, stats)
                    })
                    .collect::<BTreeMap<_, _>>()
            }),
    );

    let empty = BTreeMap::new();
    let facts = fact_stats.value().unwrap_or(&empty);
    let mut domain_updates = BTreeMap::new();
    for (cat, stats) in &category_stats {
        let fact = facts.get(cat);
        let memory_count = fact.map_or(0, |f| f.doc_count) + stats.episode_count;
        let avg_confidence = fact
            .and_then(|f| f.avg_confidence)
            .unwrap_or(stats.avg_importance);

        let record = DomainStagingRecord::measured(cat, memory_count, avg_confidence);
        let density_score = record.density_score.unwrap_or_default();
        let status = record.status.unwrap_or_default();
        let write = StepOutcome::from_store(
            "staging_write",
            store
                .index(Family::DomainStaging, serde_json::to_value(&record)?)
                .await,
        );
        tracing::debug!(domain = %cat, memory_count, density_score, %status, "Domain measured");

        domain_updates.insert(
            cat.clone(),
            DomainUpdate {
                memory_count,
                avg_confidence,
                density_score,
                status,
                write,
            },
        );
    }

    let marked_consolidated = StepOutcome::from_store(
        "mark_consolidated",
        store
            .update_matching(
                Family::Episodic,
                &ids,
                FieldUpdate {
                    field: CONSOLIDATED_FIELD.to_string(),
                    value: serde_json::Value::Bool(true),
                },
            )
            .await,
    );

    let episodes_for_review = groups
        .into_iter()
        .flat_map(|(cat, g)| {
            g.episodes.into_iter().map(move |ep| ReviewEpisode {
                category: cat.clone(),
                content: if ep.content.is_empty() { ep.raw_text } else { ep.content },
                importance: ep.importance,
            })
        })
        .collect();

    let summary = format!(
        "Consolidated {} episodes. {} categories: {}",
        ids.len(),
        category_stats.len(),
        category_stats
            .iter()
            .map(|(k, v)| format!("{}({})", k, v.episode_count))
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!(episodes = ids.len(), categories = category_stats.len(), "Consolidation finished");

    AuditLogEntry::new(AuditAction::Consolidate)
        .details(summary.clone())
        .record(store)
        .await;

    Ok(ConsolidationReport {
        summary,
        episodes_processed: ids.len(),
        category_stats,
        fact_stats,
        domain_updates,
        marked_consolidated,
        episodes_for_review,
    })
}
