//! Knowledge base records
//!
//! Typed views of the documents each family holds:
//!
//! - [`EpisodicRecord`]: raw experience awaiting consolidation
//! - [`SemanticFact`]: entity/attribute/value triple, append-only
//! - [`DomainStagingRecord`]: one point of a domain's density time series
//! - [`DomainSnapshot`]: the single authoritative row per domain
//! - [`AuditLogEntry`]: traceability record per tool action
//!
//! Documents are converted to and from these types at every store boundary.

pub mod audit;
pub mod domain;
pub mod episode;
pub mod fact;
pub mod timestamp;

pub use audit::{AuditAction, AuditLogEntry};
pub use domain::{DomainSnapshot, DomainStagingRecord};
pub use episode::EpisodicRecord;
pub use fact::SemanticFact;

use serde::{Deserialize, Deserializer, Serialize};

/// Density below this is VOID.
pub const VOID_BELOW: f64 = 1.0;
/// Density at or above this is DENSE.
pub const DENSE_FROM: f64 = 5.0;
/// A domain not updated for more than this many whole days is stale.
pub const STALE_AFTER_DAYS: i64 = 30;

/// Confidence used when a label is not recognised.
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Importance assumed for an episode stored without one.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Trim and lowercase a domain/category/entity/attribute name.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Map a confidence label or numeric string to 0.0–1.0.
///
/// `high`/`medium`/`low` map to 0.9/0.7/0.5; numbers are clamped; anything
/// else falls back to [`DEFAULT_CONFIDENCE`].
pub fn parse_confidence(raw: &str) -> f64 {
    if let Ok(n) = raw.trim().parse::<f64>() {
        if n.is_finite() {
            return n.clamp(0.0, 1.0);
        }
    }
    match raw.trim().to_lowercase().as_str() {
        "high" => 0.9,
        "medium" => 0.7,
        "low" => 0.5,
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Round to two decimal places.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// `round(memory_count × avg_confidence, 2)`, shared by consolidation and sync.
pub fn density_score(memory_count: u64, avg_confidence: f64) -> f64 {
    round2(memory_count as f64 * avg_confidence)
}

/// Density bucket of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityStatus {
    #[default]
    Void,
    Sparse,
    Dense,
}

impl DensityStatus {
    pub fn from_score(density: f64) -> Self {
        if density < VOID_BELOW {
            Self::Void
        } else if density < DENSE_FROM {
            Self::Sparse
        } else {
            Self::Dense
        }
    }
}

impl std::fmt::Display for DensityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Void => write!(f, "VOID"),
            Self::Sparse => write!(f, "SPARSE"),
            Self::Dense => write!(f, "DENSE"),
        }
    }
}

/// Accept a number or a numeric string (older documents stored both).
pub(crate) fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(f64),
        Str(String),
    }

    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("not a number: {s:?}"))),
    }
}

/// Accept a string or a bare JSON scalar, kept in its textual form.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Payment-Service "), "payment-service");
        assert_eq!(normalize_name("DATABASE"), "database");
    }

    #[test]
    fn test_parse_confidence() {
        assert_eq!(parse_confidence("high"), 0.9);
        assert_eq!(parse_confidence(" Medium "), 0.7);
        assert_eq!(parse_confidence("low"), 0.5);
        assert_eq!(parse_confidence("0.35"), 0.35);
        assert_eq!(parse_confidence("7"), 1.0);
        assert_eq!(parse_confidence("certain"), DEFAULT_CONFIDENCE);
        assert_eq!(parse_confidence("NaN"), DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_density_score_rounding() {
        assert_eq!(density_score(3, 0.9), 2.7);
        assert_eq!(density_score(7, 0.333), 2.33);
        assert_eq!(density_score(0, 0.9), 0.0);
    }

    #[test]
    fn test_density_thresholds() {
        assert_eq!(DensityStatus::from_score(0.5), DensityStatus::Void);
        assert_eq!(DensityStatus::from_score(1.0), DensityStatus::Sparse);
        assert_eq!(DensityStatus::from_score(3.0), DensityStatus::Sparse);
        assert_eq!(DensityStatus::from_score(5.0), DensityStatus::Dense);
        assert_eq!(DensityStatus::from_score(7.0), DensityStatus::Dense);
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&DensityStatus::Sparse).unwrap();
        assert_eq!(json, "\"SPARSE\"");
        let parsed: DensityStatus = serde_json::from_str("\"DENSE\"").unwrap();
        assert_eq!(parsed, DensityStatus::Dense);
    }
}
