//! Document-store gateway
//!
//! The pipelines never talk to a database directly. They go through the
//! [`DocumentStore`] trait, which models the handful of operations an
//! Elasticsearch-style document store offers: index, paged search,
//! bucketed aggregation, update-by-ids, bulk index, and collection
//! delete/create.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryStore`]: process-local, used by tests and `backend = "memory"`
//! - [`ElasticStore`]: REST client for an Elasticsearch-compatible cluster

pub mod elastic;
pub mod memory;

pub use elastic::ElasticStore;
pub use memory::{InMemoryStore, StoreOp};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type for gateway calls.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Document-store failures.
///
/// Variants carry full detail for logging; [`StoreError::classification`]
/// is what ends up in tool results.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("response decode error: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("collection not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Short, non-leaking description of the failure.
    pub fn classification(&self) -> String {
        match self {
            Self::Http { status, .. } => format!("HTTP {}", status),
            Self::Timeout => "timeout".to_string(),
            Self::Transport(_) => "transport error".to_string(),
            Self::Decode(_) => "decode error".to_string(),
            Self::Unavailable(_) => "store unavailable".to_string(),
            Self::NotFound(_) => "not found".to_string(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// The record families the knowledge base is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Raw experiences awaiting consolidation
    Episodic,
    /// Entity/attribute/value facts
    Semantic,
    /// Append-only time series of domain density snapshots
    DomainStaging,
    /// One authoritative row per domain, rebuilt by sync
    DomainLookup,
    /// Traceability log
    AuditLog,
}

impl Family {
    /// Collection (index) name in the backing store.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic-memories",
            Self::Semantic => "semantic-memories",
            Self::DomainStaging => "knowledge-domains-staging",
            Self::DomainLookup => "knowledge-domains",
            Self::AuditLog => "memory-access-log",
        }
    }

    pub fn all() -> [Family; 5] {
        [
            Self::Episodic,
            Self::Semantic,
            Self::DomainStaging,
            Self::DomainLookup,
            Self::AuditLog,
        ]
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// Raw document body as stored.
pub type Document = serde_json::Value;

/// Opaque continuation point for paged scans.
pub type Cursor = Vec<serde_json::Value>;

/// Document filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    MatchAll,
    /// Exact match on a keyword/boolean field
    Term {
        field: String,
        value: serde_json::Value,
    },
    /// Document id in the given set
    Ids(Vec<String>),
    /// Every inner filter must match
    All(Vec<Filter>),
}

impl Filter {
    pub fn term(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Field { field: String, order: SortOrder },
    /// Storage order; stable across pages
    Insertion,
}

/// A single page request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub size: usize,
    /// Restrict the returned source to these fields
    pub source: Option<Vec<String>>,
    /// Continue after this cursor
    pub after: Option<Cursor>,
}

impl SearchQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            size: 10,
            source: None,
            after: None,
        }
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey::Field {
            field: field.into(),
            order,
        });
        self
    }

    pub fn sort_insertion(mut self) -> Self {
        self.sort.push(SortKey::Insertion);
        self
    }

    pub fn source<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn after(mut self, cursor: Option<Cursor>) -> Self {
        self.after = cursor;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub source: Document,
    /// Sort values of this hit; feed back as `after` to continue
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<Hit>,
    /// Cursor of the last hit, `None` when the page was empty
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricOp {
    Avg,
    Max,
    Sum,
    /// Max of an ISO-8601 date field, reported with its string form
    Latest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub op: MetricOp,
    pub field: String,
}

/// Group documents by a keyword field and compute metrics per group.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub group_by: String,
    /// Maximum number of buckets returned
    pub size: usize,
    pub metrics: Vec<MetricSpec>,
}

impl AggregateSpec {
    pub fn group_by(field: impl Into<String>, size: usize) -> Self {
        Self {
            group_by: field.into(),
            size,
            metrics: Vec::new(),
        }
    }

    pub fn metric(mut self, name: impl Into<String>, op: MetricOp, field: impl Into<String>) -> Self {
        self.metrics.push(MetricSpec {
            name: name.into(),
            op,
            field: field.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricValue {
    /// `None` when no document in the bucket had the field
    pub value: Option<f64>,
    pub as_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: String,
    pub doc_count: u64,
    pub metrics: HashMap<String, MetricValue>,
}

impl Bucket {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).and_then(|m| m.value)
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.metrics.get(name).and_then(|m| m.as_string.clone())
    }
}

/// Assignment applied to every matched document.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub field: String,
    pub value: serde_json::Value,
}

/// Per-item result of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemStatus {
    pub id: Option<String>,
    pub error: Option<String>,
}

impl ItemStatus {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Keyword,
    Integer,
    Float,
    Date,
}

/// Fixed mapping used when (re)creating a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    /// Backend-specific index mode (e.g. `lookup`)
    pub mode: Option<String>,
    pub fields: Vec<(String, FieldType)>,
}

/// Generic document-store operations consumed by the pipelines.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Index one document, returning its id.
    async fn index(&self, family: Family, document: Document) -> StoreResult<String>;

    /// Fetch one page of matching documents.
    async fn search(&self, family: Family, query: SearchQuery) -> StoreResult<SearchPage>;

    /// Bucketed statistics over a family.
    async fn aggregate(&self, family: Family, spec: AggregateSpec) -> StoreResult<Vec<Bucket>>;

    /// Apply `update` to every document whose id is in `ids`.
    async fn update_matching(
        &self,
        family: Family,
        ids: &[String],
        update: FieldUpdate,
    ) -> StoreResult<u64>;

    /// Index many documents in one round trip.
    async fn bulk_index(&self, items: Vec<(Family, Document)>) -> StoreResult<Vec<ItemStatus>>;

    /// Drop a whole collection. Returns whether it existed.
    async fn delete_collection(&self, family: Family) -> StoreResult<bool>;

    /// Create an empty collection with the given schema.
    async fn create_collection(&self, family: Family, schema: CollectionSchema) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_names() {
        assert_eq!(Family::Episodic.collection(), "episodic-memories");
        assert_eq!(Family::DomainLookup.collection(), "knowledge-domains");
        assert_eq!(Family::DomainStaging.to_string(), "knowledge-domains-staging");
    }

    #[test]
    fn test_classification_hides_detail() {
        let e = StoreError::Transport("connect to https://es.internal:9200 refused".to_string());
        assert_eq!(e.classification(), "transport error");
        assert_eq!(StoreError::Timeout.classification(), "timeout");
    }

    #[test]
    fn test_search_query_builder() {
        let q = SearchQuery::new(Filter::term("consolidated", false))
            .size(50)
            .sort_by("timestamp", SortOrder::Desc)
            .source(["raw_text", "category"]);
        assert_eq!(q.size, 50);
        assert_eq!(q.sort.len(), 1);
        assert_eq!(q.source.as_ref().unwrap().len(), 2);
        assert!(q.after.is_none());
    }
}
