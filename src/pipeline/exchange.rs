//! Knowledge base export and import
//!
//! The exchange format is NDJSON: one record per line, tagged with `_type`
//! (`episodic`, `semantic` or `domain`). Search-only fields are never
//! written out and are regenerated on import.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decode_hit;
use crate::error::Result;
use crate::memory::{
    normalize_name, AuditAction, AuditLogEntry, DomainSnapshot, DomainStagingRecord,
    EpisodicRecord, SemanticFact,
};
use crate::store::{Document, DocumentStore, Family, Filter, Hit, SearchQuery, StoreResult};
use crate::validate;

/// Documents fetched per export page.
pub const EXPORT_PAGE_SIZE: usize = 100;

/// One line of the exchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum ExchangeRecord {
    Episodic(EpisodicRecord),
    Semantic(SemanticFact),
    Domain(DomainStagingRecord),
}

impl ExchangeRecord {
    const TAGS: [&'static str; 3] = ["episodic", "semantic", "domain"];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCounts {
    pub episodic: usize,
    pub semantic: usize,
    pub domain: usize,
}

impl FamilyCounts {
    pub fn total(&self) -> usize {
        self.episodic + self.semantic + self.domain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportReport {
    pub summary: String,
    pub ndjson: String,
    pub counts: FamilyCounts,
    /// Families whose scan failed; their lines are absent from `ndjson`
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conflict {
    pub entity: String,
    pub attribute: String,
    pub existing_value: String,
    pub imported_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportReport {
    pub summary: String,
    pub imported: FamilyCounts,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
}

/// Scan a whole family with a stable cursor.
async fn scan(store: &dyn DocumentStore, family: Family, fields: &[&str]) -> StoreResult<Vec<Hit>> {
    let mut hits = Vec::new();
    let mut after = None;
    loop {
        let query = SearchQuery::new(Filter::MatchAll)
            .size(EXPORT_PAGE_SIZE)
            .sort_insertion()
            .source(fields.iter().copied())
            .after(after);
        let page = store.search(family, query).await?;
        let full = page.hits.len() == EXPORT_PAGE_SIZE;
        hits.extend(page.hits);
        match page.next_cursor {
            Some(cursor) if full => after = Some(cursor),
            _ => break,
        }
    }
    Ok(hits)
}

fn export_lines(family: Family, hits: &[Hit]) -> Vec<ExchangeRecord> {
    hits.iter()
        .filter_map(|hit| match family {
            Family::Episodic => decode_hit::<EpisodicRecord>(family, hit)
                .map(|r| ExchangeRecord::Episodic(r.without_search_fields())),
            Family::Semantic => decode_hit::<SemanticFact>(family, hit)
                .map(|r| ExchangeRecord::Semantic(r.without_search_fields())),
            _ => decode_hit::<DomainSnapshot>(family, hit)
                .map(|r| ExchangeRecord::Domain(r.to_staging())),
        })
        .collect()
}

/// Export episodes, facts and the lookup snapshot as NDJSON.
///
/// A family whose scan fails is listed in `errors`; the others still export.
pub async fn export(store: &dyn DocumentStore) -> ExportReport {
    const SOURCES: [(Family, &[&str]); 3] = [
        (
            Family::Episodic,
            &[
                "raw_text",
                "category",
                "importance",
                "timestamp",
                "source_type",
                "consolidated",
                "external_refs",
            ],
        ),
        (
            Family::Semantic,
            &[
                "entity",
                "attribute",
                "value",
                "confidence",
                "category",
                "first_observed",
                "last_updated",
                "update_count",
                "external_refs",
            ],
        ),
        (
            Family::DomainLookup,
            &[
                "domain",
                "memory_count",
                "avg_confidence",
                "density_score",
                "status",
                "last_updated",
            ],
        ),
    ];

    let mut lines = Vec::new();
    let mut counts = FamilyCounts::default();
    let mut errors = Vec::new();

    for (family, fields) in SOURCES {
        let hits = match scan(store, family, fields).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::error!(family = %family, error = %e, "Export scan failed");
                errors.push(format!("{} scan: {}", family, e.classification()));
                continue;
            }
        };
        for record in export_lines(family, &hits) {
            let line = match serde_json::to_string(&record) {
                Ok(line) => line,
                Err(e) => {
                    errors.push(format!("{} encode: {}", family, e));
                    continue;
                }
            };
            match record {
                ExchangeRecord::Episodic(_) => counts.episodic += 1,
                ExchangeRecord::Semantic(_) => counts.semantic += 1,
                ExchangeRecord::Domain(_) => counts.domain += 1,
            }
            lines.push(line);
        }
    }

    let summary = format!(
        "Export complete: episodic {}, semantic {}, domain {} (total {})",
        counts.episodic,
        counts.semantic,
        counts.domain,
        counts.total()
    );
    tracing::info!(%summary, "Knowledge base exported");

    AuditLogEntry::new(AuditAction::Export)
        .details(summary.clone())
        .record(store)
        .await;

    ExportReport {
        summary,
        ndjson: lines.join("\n"),
        counts,
        errors,
    }
}

/// Parse one line into a normalized, validated record.
fn parse_line(line: &str) -> std::result::Result<ExchangeRecord, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("JSON parse error: {}", e))?;
    let tag = value
        .get("_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !ExchangeRecord::TAGS.contains(&tag.as_str()) {
        return Err(format!("unknown _type '{}'", tag));
    }
    let record: ExchangeRecord =
        serde_json::from_value(value).map_err(|e| format!("invalid {} record: {}", tag, e))?;

    let record = match record {
        ExchangeRecord::Episodic(mut ep) => {
            ep.category = normalize_name(&ep.category);
            let ep = ep.with_search_fields();
            validate::episode(&ep).map(|_| ExchangeRecord::Episodic(ep))
        }
        ExchangeRecord::Semantic(fact) => {
            let fact = fact.normalized().with_search_fields();
            validate::fact(&fact).map(|_| ExchangeRecord::Semantic(fact))
        }
        ExchangeRecord::Domain(mut domain) => {
            domain.domain = normalize_name(&domain.domain);
            validate::domain(&domain).map(|_| ExchangeRecord::Domain(domain))
        }
    };
    record.map_err(|e| e.public_message())
}

/// Look for an existing fact with the same key and a different value.
///
/// A failed lookup counts as "no conflict"; the fact is inserted anyway.
async fn find_conflict(store: &dyn DocumentStore, fact: &SemanticFact) -> Option<Conflict> {
    let query = SearchQuery::new(Filter::All(vec![
        Filter::term("entity", fact.entity.as_str()),
        Filter::term("attribute", fact.attribute.as_str()),
    ]))
    .size(1)
    .source(["value", "last_updated"]);

    let page = match store.search(Family::Semantic, query).await {
        Ok(page) => page,
        Err(e) => {
            tracing::warn!(entity = %fact.entity, error = %e, "Duplicate check failed; inserting anyway");
            return None;
        }
    };
    let existing = page.hits.first()?;
    let existing_value = match &existing.source["value"] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    (existing_value != fact.value).then(|| Conflict {
        entity: fact.entity.clone(),
        attribute: fact.attribute.clone(),
        existing_value,
        imported_value: fact.value.clone(),
    })
}

/// Bulk-write one family, returning the number of accepted documents.
async fn write_family(
    store: &dyn DocumentStore,
    family: Family,
    tag: &str,
    docs: Vec<Document>,
    errors: &mut Vec<String>,
) -> usize {
    if docs.is_empty() {
        return 0;
    }
    let items = docs.into_iter().map(|d| (family, d)).collect();
    match store.bulk_index(items).await {
        Ok(statuses) => {
            let ok = statuses.iter().filter(|s| s.is_ok()).count();
            let rejected = statuses.len() - ok;
            if rejected > 0 {
                errors.push(format!("{} bulk: {} item(s) rejected", tag, rejected));
            }
            ok
        }
        Err(e) => {
            tracing::error!(family = %family, error = %e, "Import bulk write failed");
            errors.push(format!("{} bulk: {}", tag, e.classification()));
            0
        }
    }
}

/// Import an NDJSON payload.
///
/// Oversized payloads are rejected before anything is written. Bad lines
/// are reported and skipped. Facts are append-only: a differing value for
/// an existing (entity, attribute) is reported as a conflict and stored.
pub async fn import(store: &dyn DocumentStore, ndjson: &str) -> Result<ImportReport> {
    validate::import_payload(ndjson)?;

    let mut errors = Vec::new();
    let mut episodes = Vec::new();
    let mut facts = Vec::new();
    let mut domains = Vec::new();

    for (i, line) in ndjson.trim().split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(ExchangeRecord::Episodic(r)) => episodes.push(r),
            Ok(ExchangeRecord::Semantic(r)) => facts.push(r),
            Ok(ExchangeRecord::Domain(r)) => domains.push(r),
            Err(e) => errors.push(format!("line {}: {}", i + 1, e)),
        }
    }

    let mut conflicts = Vec::new();
    for fact in &facts {
        if let Some(conflict) = find_conflict(store, fact).await {
            tracing::info!(entity = %conflict.entity, attribute = %conflict.attribute, "Import conflict");
            conflicts.push(conflict);
        }
    }

    let episodes = to_documents(&episodes)?;
    let facts = to_documents(&facts)?;
    let domains = to_documents(&domains)?;

    let imported = FamilyCounts {
        episodic: write_family(store, Family::Episodic, "episodic", episodes, &mut errors).await,
        semantic: write_family(store, Family::Semantic, "semantic", facts, &mut errors).await,
        domain: write_family(store, Family::DomainStaging, "domain", domains, &mut errors).await,
    };

    let mut summary = format!(
        "Import complete: {} docs (episodic {}, semantic {}, domain {})",
        imported.total(),
        imported.episodic,
        imported.semantic,
        imported.domain
    );
    if !conflicts.is_empty() {
        summary.push_str(&format!(", CONFLICT {} found", conflicts.len()));
    }
    if !errors.is_empty() {
        summary.push_str(&format!(", {} error(s)", errors.len()));
    }
    tracing::info!(%summary, "Knowledge base imported");

    AuditLogEntry::new(AuditAction::Import)
        .details(summary.clone())
        .record(store)
        .await;

    Ok(ImportReport {
        summary,
        imported,
        conflicts,
        errors,
    })
}

fn to_documents<T: Serialize>(records: &[T]) -> Result<Vec<Document>> {
    records
        .iter()
        .map(|r| serde_json::to_value(r).map_err(Into::into))
        .collect()
}
