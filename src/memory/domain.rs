//! Domain staging records and lookup snapshots

use serde::{Deserialize, Serialize};

use super::{density_score, normalize_name, timestamp, DensityStatus};
use crate::store::{CollectionSchema, FieldType};

/// One point of a domain's density history.
///
/// `remember` and import write "touch" records that only carry the domain
/// and a timestamp; consolidation writes fully measured ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainStagingRecord {
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub density_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DensityStatus>,
    #[serde(default = "timestamp::now")]
    pub last_updated: String,
}

impl DomainStagingRecord {
    pub fn touch(domain: &str) -> Self {
        Self {
            domain: normalize_name(domain),
            memory_count: None,
            avg_confidence: None,
            density_score: None,
            status: None,
            last_updated: timestamp::now(),
        }
    }

    pub fn measured(domain: &str, memory_count: u64, avg_confidence: f64) -> Self {
        let density = density_score(memory_count, avg_confidence);
        Self {
            domain: normalize_name(domain),
            memory_count: Some(memory_count),
            avg_confidence: Some(avg_confidence),
            density_score: Some(density),
            status: Some(DensityStatus::from_score(density)),
            last_updated: timestamp::now(),
        }
    }
}

/// The authoritative row for one domain in the lookup collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSnapshot {
    pub domain: String,
    #[serde(default)]
    pub memory_count: u64,
    #[serde(default)]
    pub avg_confidence: f64,
    #[serde(default)]
    pub density_score: f64,
    #[serde(default)]
    pub status: DensityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl DomainSnapshot {
    /// Build a snapshot, classifying by density only.
    pub fn new(
        domain: &str,
        memory_count: u64,
        avg_confidence: f64,
        density_score: f64,
        last_updated: Option<String>,
    ) -> Self {
        Self {
            domain: normalize_name(domain),
            memory_count,
            avg_confidence,
            density_score,
            status: DensityStatus::from_score(density_score),
            last_updated,
        }
    }

    /// Export form: snapshots travel as staging records.
    pub fn to_staging(&self) -> DomainStagingRecord {
        DomainStagingRecord {
            domain: self.domain.clone(),
            memory_count: Some(self.memory_count),
            avg_confidence: Some(self.avg_confidence),
            density_score: Some(self.density_score),
            status: Some(self.status),
            last_updated: self.last_updated.clone().unwrap_or_else(timestamp::now),
        }
    }
}

/// Fixed mapping of the lookup collection.
pub fn lookup_schema() -> CollectionSchema {
    CollectionSchema {
        mode: Some("lookup".to_string()),
        fields: vec![
            ("domain".to_string(), FieldType::Keyword),
            ("memory_count".to_string(), FieldType::Integer),
            ("avg_confidence".to_string(), FieldType::Float),
            ("density_score".to_string(), FieldType::Float),
            ("status".to_string(), FieldType::Keyword),
            ("last_updated".to_string(), FieldType::Date),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_touch_carries_no_measurements() {
        let r = DomainStagingRecord::touch(" Database ");
        assert_eq!(r.domain, "database");
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("memory_count").is_none());
        assert!(v.get("status").is_none());
    }

    #[test]
    fn test_measured_computes_density() {
        let r = DomainStagingRecord::measured("db", 4, 0.9);
        assert_eq!(r.density_score, Some(3.6));
        assert_eq!(r.status, Some(DensityStatus::Sparse));
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let s: DomainSnapshot = serde_json::from_value(json!({"domain": "ops"})).unwrap();
        assert_eq!(s.memory_count, 0);
        assert_eq!(s.status, DensityStatus::Void);
        assert!(s.last_updated.is_none());
    }

    #[test]
    fn test_lookup_schema_mode() {
        let schema = lookup_schema();
        assert_eq!(schema.mode.as_deref(), Some("lookup"));
        assert!(schema
            .fields
            .iter()
            .any(|(f, t)| f == "last_updated" && *t == FieldType::Date));
    }
}
