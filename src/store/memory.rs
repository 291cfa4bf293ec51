//! In-process document store
//!
//! Deterministic stand-in for the real cluster, used by tests and by the
//! `memory` backend. Behaves like Elasticsearch where the pipelines can
//! observe it: indexing auto-creates a collection, reading a deleted
//! collection fails with `NotFound`, metrics skip documents missing the
//! field, and terms buckets are ordered by document count.
//!
//! Failures can be injected per operation (and optionally per family) to
//! exercise partial-failure paths.

use super::{
    AggregateSpec, Bucket, CollectionSchema, Cursor, Document, DocumentStore, Family, FieldUpdate,
    Filter, Hit, ItemStatus, MetricOp, MetricValue, SearchPage, SearchQuery, SortKey, SortOrder,
    StoreError, StoreResult,
};
use crate::memory::timestamp;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Gateway operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Index,
    Search,
    Aggregate,
    UpdateMatching,
    BulkIndex,
    DeleteCollection,
    CreateCollection,
}

#[derive(Debug, Clone)]
struct StoredDoc {
    id: String,
    seq: u64,
    body: Document,
}

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<u64, StoredDoc>,
    schema: Option<CollectionSchema>,
}

/// In-memory document store
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<Family, Collection>>>,
    /// (operation, family); `None` family fails the operation everywhere
    faults: Arc<RwLock<HashSet<(StoreOp, Option<Family>)>>>,
    seq: AtomicU64,
}

impl InMemoryStore {
    /// Create a store with every family present and empty
    pub fn new() -> Self {
        let collections = Family::all()
            .into_iter()
            .map(|f| (f, Collection::default()))
            .collect();
        Self {
            collections: Arc::new(RwLock::new(collections)),
            faults: Arc::new(RwLock::new(HashSet::new())),
            seq: AtomicU64::new(1),
        }
    }

    /// Make `op` fail for every family until cleared.
    pub async fn fail_on(&self, op: StoreOp) {
        self.faults.write().await.insert((op, None));
    }

    /// Make `op` fail for one family until cleared.
    ///
    /// For `BulkIndex` this rejects only the items of that family; the rest
    /// of the batch is written.
    pub async fn fail_on_family(&self, op: StoreOp, family: Family) {
        self.faults.write().await.insert((op, Some(family)));
    }

    pub async fn clear_faults(&self) {
        self.faults.write().await.clear();
    }

    /// All documents of a family in insertion order (empty if missing).
    pub async fn documents(&self, family: Family) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(&family)
            .map(|c| c.docs.values().map(|d| d.body.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, family: Family) -> usize {
        self.collections
            .read()
            .await
            .get(&family)
            .map(|c| c.docs.len())
            .unwrap_or(0)
    }

    pub async fn has_collection(&self, family: Family) -> bool {
        self.collections.read().await.contains_key(&family)
    }

    pub async fn schema(&self, family: Family) -> Option<CollectionSchema> {
        self.collections
            .read()
            .await
            .get(&family)
            .and_then(|c| c.schema.clone())
    }

    async fn check(&self, op: StoreOp, family: Option<Family>) -> StoreResult<()> {
        let faults = self.faults.read().await;
        if faults.contains(&(op, None)) || family.is_some_and(|f| faults.contains(&(op, Some(f)))) {
            return Err(StoreError::Unavailable(format!(
                "injected failure: {:?} on {}",
                op,
                family.map(|f| f.to_string()).unwrap_or_else(|| "*".to_string())
            )));
        }
        Ok(())
    }

    fn next_id(&self) -> (String, u64) {
        let seq = self.seq.fetch_add(1, AtomicOrdering::SeqCst);
        (format!("doc-{}", uuid::Uuid::new_v4()), seq)
    }

    fn insert(&self, collections: &mut HashMap<Family, Collection>, family: Family, body: Document) -> String {
        let (id, seq) = self.next_id();
        collections.entry(family).or_default().docs.insert(
            seq,
            StoredDoc {
                id: id.clone(),
                seq,
                body,
            },
        );
        id
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn index(&self, family: Family, document: Document) -> StoreResult<String> {
        self.check(StoreOp::Index, Some(family)).await?;
        let mut collections = self.collections.write().await;
        Ok(self.insert(&mut collections, family, document))
    }

    async fn search(&self, family: Family, query: SearchQuery) -> StoreResult<SearchPage> {
        self.check(StoreOp::Search, Some(family)).await?;
        let collections = self.collections.read().await;
        let collection = collections
            .get(&family)
            .ok_or_else(|| StoreError::NotFound(family.to_string()))?;

        let mut matched: Vec<(Cursor, &StoredDoc)> = collection
            .docs
            .values()
            .filter(|d| matches(&query.filter, d))
            .map(|d| (sort_values(&query.sort, d), d))
            .collect();

        matched.sort_by(|a, b| compare_cursors(&query.sort, &a.0, &b.0));

        if let Some(after) = &query.after {
            matched.retain(|(key, _)| compare_cursors(&query.sort, key, after) == Ordering::Greater);
        }

        let hits: Vec<Hit> = matched
            .into_iter()
            .take(query.size)
            .map(|(cursor, d)| Hit {
                id: d.id.clone(),
                source: project(&d.body, query.source.as_deref()),
                cursor: Some(cursor),
            })
            .collect();

        let next_cursor = hits.last().and_then(|h| h.cursor.clone());
        Ok(SearchPage { hits, next_cursor })
    }

    async fn aggregate(&self, family: Family, spec: AggregateSpec) -> StoreResult<Vec<Bucket>> {
        self.check(StoreOp::Aggregate, Some(family)).await?;
        let collections = self.collections.read().await;
        let collection = collections
            .get(&family)
            .ok_or_else(|| StoreError::NotFound(family.to_string()))?;

        let mut groups: HashMap<String, Vec<&Document>> = HashMap::new();
        for doc in collection.docs.values() {
            if let Some(key) = doc.body.get(&spec.group_by).and_then(Value::as_str) {
                groups.entry(key.to_string()).or_default().push(&doc.body);
            }
        }

        let mut buckets: Vec<Bucket> = groups
            .into_iter()
            .map(|(key, docs)| {
                let metrics = spec
                    .metrics
                    .iter()
                    .map(|m| (m.name.clone(), compute_metric(m.op, &m.field, &docs)))
                    .collect();
                Bucket {
                    key,
                    doc_count: docs.len() as u64,
                    metrics,
                }
            })
            .collect();

        buckets.sort_by(|a, b| b.doc_count.cmp(&a.doc_count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(spec.size);
        Ok(buckets)
    }

    async fn update_matching(
        &self,
        family: Family,
        ids: &[String],
        update: FieldUpdate,
    ) -> StoreResult<u64> {
        self.check(StoreOp::UpdateMatching, Some(family)).await?;
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&family)
            .ok_or_else(|| StoreError::NotFound(family.to_string()))?;

        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut updated = 0;
        for doc in collection.docs.values_mut() {
            if wanted.contains(doc.id.as_str()) {
                if let Some(obj) = doc.body.as_object_mut() {
                    obj.insert(update.field.clone(), update.value.clone());
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn bulk_index(&self, items: Vec<(Family, Document)>) -> StoreResult<Vec<ItemStatus>> {
        self.check(StoreOp::BulkIndex, None).await?;
        let rejected: HashSet<Family> = self
            .faults
            .read()
            .await
            .iter()
            .filter(|(op, _)| *op == StoreOp::BulkIndex)
            .filter_map(|(_, f)| *f)
            .collect();

        let mut collections = self.collections.write().await;
        let statuses = items
            .into_iter()
            .map(|(family, doc)| {
                if rejected.contains(&family) {
                    ItemStatus {
                        id: None,
                        error: Some(format!("rejected by {}", family)),
                    }
                } else {
                    ItemStatus {
                        id: Some(self.insert(&mut collections, family, doc)),
                        error: None,
                    }
                }
            })
            .collect();
        Ok(statuses)
    }

    async fn delete_collection(&self, family: Family) -> StoreResult<bool> {
        self.check(StoreOp::DeleteCollection, Some(family)).await?;
        Ok(self.collections.write().await.remove(&family).is_some())
    }

    async fn create_collection(&self, family: Family, schema: CollectionSchema) -> StoreResult<()> {
        self.check(StoreOp::CreateCollection, Some(family)).await?;
        let mut collections = self.collections.write().await;
        if collections.contains_key(&family) {
            return Err(StoreError::Http {
                status: 400,
                body: format!("resource_already_exists_exception: {}", family),
            });
        }
        collections.insert(
            family,
            Collection {
                docs: BTreeMap::new(),
                schema: Some(schema),
            },
        );
        Ok(())
    }
}

fn matches(filter: &Filter, doc: &StoredDoc) -> bool {
    match filter {
        Filter::MatchAll => true,
        Filter::Term { field, value } => doc.body.get(field) == Some(value),
        Filter::Ids(ids) => ids.iter().any(|id| id == &doc.id),
        Filter::All(inner) => inner.iter().all(|f| matches(f, doc)),
    }
}

/// Sort values for a document, with the insertion sequence as tiebreaker.
fn sort_values(sort: &[SortKey], doc: &StoredDoc) -> Cursor {
    let mut values: Cursor = sort
        .iter()
        .map(|key| match key {
            SortKey::Field { field, .. } => doc.body.get(field).cloned().unwrap_or(Value::Null),
            SortKey::Insertion => Value::from(doc.seq),
        })
        .collect();
    values.push(Value::from(doc.seq));
    values
}

fn compare_cursors(sort: &[SortKey], a: &Cursor, b: &Cursor) -> Ordering {
    for (i, (va, vb)) in a.iter().zip(b.iter()).enumerate() {
        let order = match sort.get(i) {
            Some(SortKey::Field { order, .. }) => *order,
            _ => SortOrder::Asc,
        };
        let ord = compare_values(va, vb);
        let ord = match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Missing values sort after everything else in ascending order.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

fn project(body: &Document, fields: Option<&[String]>) -> Document {
    match (fields, body.as_object()) {
        (Some(fields), Some(obj)) => Value::Object(
            obj.iter()
                .filter(|(k, _)| fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        _ => body.clone(),
    }
}

fn compute_metric(op: MetricOp, field: &str, docs: &[&Document]) -> MetricValue {
    match op {
        MetricOp::Latest => latest_metric(field, docs),
        MetricOp::Avg | MetricOp::Max | MetricOp::Sum => numeric_metric(op, field, docs),
    }
}

fn latest_metric(field: &str, docs: &[&Document]) -> MetricValue {
    docs.iter()
        .filter_map(|d| d.get(field).and_then(Value::as_str))
        .filter_map(|s| timestamp::parse(s).map(|t| (t, s)))
        .max_by_key(|(t, _)| *t)
        .map(|(t, s)| MetricValue {
            value: Some(t.timestamp_millis() as f64),
            as_string: Some(s.to_string()),
        })
        .unwrap_or_default()
}

fn numeric_metric(op: MetricOp, field: &str, docs: &[&Document]) -> MetricValue {
    let values: Vec<f64> = docs
        .iter()
        .filter_map(|d| d.get(field).and_then(Value::as_f64))
        .collect();
    let sum: f64 = values.iter().sum();

    let value = match op {
        // Elasticsearch reports an empty sum as 0
        MetricOp::Sum => Some(sum),
        _ if values.is_empty() => None,
        MetricOp::Avg => Some(sum / values.len() as f64),
        _ => values.iter().cloned().reduce(f64::max),
    };
    MetricValue {
        value,
        as_string: None,
    }
}
