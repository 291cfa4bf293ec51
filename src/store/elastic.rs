//! Elasticsearch REST gateway

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::{
    AggregateSpec, Bucket, CollectionSchema, Document, DocumentStore, Family, FieldType,
    FieldUpdate, Filter, Hit, ItemStatus, MetricOp, MetricValue, SearchPage, SearchQuery,
    SortKey, SortOrder, StoreError, StoreResult,
};

const GROUPS_AGG: &str = "groups";

/// [`DocumentStore`] backed by an Elasticsearch-compatible cluster.
pub struct ElasticStore {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    bulk_timeout: Duration,
    client: reqwest::Client,
}

impl ElasticStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        bulk_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            timeout,
            bulk_timeout,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, self.url(path))
            .timeout(self.timeout);
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("ApiKey {}", key)),
            None => builder,
        }
    }

    async fn post_json(&self, path: &str, family: Family, body: &Value) -> StoreResult<Value> {
        tracing::debug!(family = %family, path, "POST");
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        let response = check_status(response, family).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-2xx response into a [`StoreError`], keeping the body for logs.
async fn check_status(
    response: reqwest::Response,
    family: Family,
) -> StoreResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StoreError::NotFound(family.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Http {
        status: status.as_u16(),
        body,
    })
}

fn filter_clause(filter: &Filter) -> Value {
    match filter {
        Filter::MatchAll => json!({ "match_all": {} }),
        Filter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
        Filter::Ids(ids) => json!({ "ids": { "values": ids } }),
        Filter::All(filters) => {
            let must: Vec<Value> = filters.iter().map(filter_clause).collect();
            json!({ "bool": { "must": must } })
        }
    }
}

fn sort_clause(key: &SortKey) -> Value {
    match key {
        SortKey::Field { field, order } => {
            let order = match order {
                SortOrder::Asc => "asc",
                SortOrder::Desc => "desc",
            };
            json!({ field.as_str(): { "order": order } })
        }
        SortKey::Insertion => json!("_doc"),
    }
}

fn search_body(query: &SearchQuery) -> Value {
    let mut body = Map::new();
    body.insert("query".into(), filter_clause(&query.filter));
    body.insert("size".into(), json!(query.size));
    if !query.sort.is_empty() {
        body.insert(
            "sort".into(),
            Value::Array(query.sort.iter().map(sort_clause).collect()),
        );
    }
    if let Some(fields) = &query.source {
        body.insert("_source".into(), json!(fields));
    }
    if let Some(after) = &query.after {
        body.insert("search_after".into(), json!(after));
    }
    Value::Object(body)
}

fn aggregate_body(spec: &AggregateSpec) -> Value {
    let mut metrics = Map::new();
    for metric in &spec.metrics {
        let op = match metric.op {
            MetricOp::Avg => "avg",
            MetricOp::Max | MetricOp::Latest => "max",
            MetricOp::Sum => "sum",
        };
        metrics.insert(metric.name.clone(), json!({ op: { "field": metric.field } }));
    }
    json!({
        "size": 0,
        "aggs": {
            GROUPS_AGG: {
                "terms": { "field": spec.group_by, "size": spec.size },
                "aggs": metrics,
            }
        }
    })
}

fn update_body(ids: &[String], update: &FieldUpdate) -> Value {
    json!({
        "query": { "ids": { "values": ids } },
        "script": {
            "lang": "painless",
            "source": "ctx._source[params.field] = params.value",
            "params": { "field": update.field, "value": update.value },
        }
    })
}

fn bulk_body(items: &[(Family, Document)]) -> StoreResult<String> {
    let mut body = String::new();
    for (family, doc) in items {
        let action = json!({ "index": { "_index": family.collection() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(
            &serde_json::to_string(doc).map_err(|e| StoreError::Decode(e.to_string()))?,
        );
        body.push('\n');
    }
    Ok(body)
}

fn schema_body(schema: &CollectionSchema) -> Value {
    let properties: Map<String, Value> = schema
        .fields
        .iter()
        .map(|(name, ty)| {
            let ty = match ty {
                FieldType::Keyword => "keyword",
                FieldType::Integer => "integer",
                FieldType::Float => "float",
                FieldType::Date => "date",
            };
            (name.clone(), json!({ "type": ty }))
        })
        .collect();

    let mut body = Map::new();
    if let Some(mode) = &schema.mode {
        body.insert("settings".into(), json!({ "index": { "mode": mode } }));
    }
    body.insert("mappings".into(), json!({ "properties": properties }));
    Value::Object(body)
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Option<Vec<Value>>,
}

fn parse_search(raw: Value) -> StoreResult<SearchPage> {
    let response: SearchResponse =
        serde_json::from_value(raw).map_err(|e| StoreError::Decode(e.to_string()))?;
    let hits: Vec<Hit> = response
        .hits
        .hits
        .into_iter()
        .map(|h| Hit {
            id: h.id,
            source: h.source,
            cursor: h.sort,
        })
        .collect();
    let next_cursor = hits.last().and_then(|h| h.cursor.clone());
    Ok(SearchPage { hits, next_cursor })
}

fn parse_buckets(raw: &Value, spec: &AggregateSpec) -> StoreResult<Vec<Bucket>> {
    let buckets = raw
        .pointer(&format!("/aggregations/{}/buckets", GROUPS_AGG))
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Decode("missing aggregation buckets".to_string()))?;

    Ok(buckets
        .iter()
        .map(|b| {
            let key = match &b["key"] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let metrics: HashMap<String, MetricValue> = spec
                .metrics
                .iter()
                .map(|m| {
                    let agg = &b[m.name.as_str()];
                    let value = MetricValue {
                        value: agg["value"].as_f64(),
                        as_string: agg["value_as_string"].as_str().map(String::from),
                    };
                    (m.name.clone(), value)
                })
                .collect();
            Bucket {
                key,
                doc_count: b["doc_count"].as_u64().unwrap_or(0),
                metrics,
            }
        })
        .collect())
}

fn parse_bulk(raw: &Value) -> Vec<ItemStatus> {
    raw["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    let result = &item["index"];
                    match result.get("error") {
                        Some(err) => ItemStatus {
                            id: None,
                            error: Some(
                                err["type"].as_str().unwrap_or("bulk item error").to_string(),
                            ),
                        },
                        None => ItemStatus {
                            id: result["_id"].as_str().map(String::from),
                            error: None,
                        },
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl DocumentStore for ElasticStore {
    async fn index(&self, family: Family, document: Document) -> StoreResult<String> {
        let raw = self
            .post_json(&format!("{}/_doc", family.collection()), family, &document)
            .await?;
        raw["_id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| StoreError::Decode("index response without _id".to_string()))
    }

    async fn search(&self, family: Family, query: SearchQuery) -> StoreResult<SearchPage> {
        let raw = self
            .post_json(
                &format!("{}/_search", family.collection()),
                family,
                &search_body(&query),
            )
            .await?;
        parse_search(raw)
    }

    async fn aggregate(&self, family: Family, spec: AggregateSpec) -> StoreResult<Vec<Bucket>> {
        let raw = self
            .post_json(
                &format!("{}/_search", family.collection()),
                family,
                &aggregate_body(&spec),
            )
            .await?;
        parse_buckets(&raw, &spec)
    }

    async fn update_matching(
        &self,
        family: Family,
        ids: &[String],
        update: FieldUpdate,
    ) -> StoreResult<u64> {
        let raw = self
            .post_json(
                &format!("{}/_update_by_query?conflicts=proceed&refresh=true", family.collection()),
                family,
                &update_body(ids, &update),
            )
            .await?;
        Ok(raw["updated"].as_u64().unwrap_or(0))
    }

    async fn bulk_index(&self, items: Vec<(Family, Document)>) -> StoreResult<Vec<ItemStatus>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let family = items[0].0;
        let body = bulk_body(&items)?;
        tracing::debug!(items = items.len(), "POST _bulk");

        let response = self
            .request(reqwest::Method::POST, "_bulk?refresh=true")
            .timeout(self.bulk_timeout)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let raw: Value = check_status(response, family).await?.json().await?;
        Ok(parse_bulk(&raw))
    }

    async fn delete_collection(&self, family: Family) -> StoreResult<bool> {
        let response = self
            .request(reqwest::Method::DELETE, family.collection())
            .send()
            .await?;
        match check_status(response, family).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_collection(&self, family: Family, schema: CollectionSchema) -> StoreResult<()> {
        let response = self
            .request(reqwest::Method::PUT, family.collection())
            .json(&schema_body(&schema))
            .send()
            .await?;
        check_status(response, family).await?;
        Ok(())
    }
}
