//! Semantic facts

use serde::{Deserialize, Serialize};

use super::{lenient_f64, lenient_string, normalize_name, timestamp, DEFAULT_CONFIDENCE};

/// Entity/attribute/value triple.
///
/// Facts are append-only: a new fact with an existing (entity, attribute)
/// key is stored alongside the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticFact {
    /// Search-only concatenation of entity, attribute and value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub entity: String,
    pub attribute: String,
    #[serde(deserialize_with = "lenient_string")]
    pub value: String,
    #[serde(default = "default_confidence", deserialize_with = "lenient_f64")]
    pub confidence: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default = "timestamp::now")]
    pub first_observed: String,
    #[serde(default = "timestamp::now")]
    pub last_updated: String,
    #[serde(default = "one")]
    pub update_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_refs: Vec<String>,
}

impl SemanticFact {
    pub fn new(
        entity: &str,
        attribute: &str,
        value: impl Into<String>,
        confidence: f64,
        category: &str,
        external_refs: Vec<String>,
    ) -> Self {
        let now = timestamp::now();
        Self {
            content: String::new(),
            entity: entity.to_string(),
            attribute: attribute.to_string(),
            value: value.into(),
            confidence,
            category: category.to_string(),
            first_observed: now.clone(),
            last_updated: now,
            update_count: 1,
            external_refs,
        }
        .normalized()
        .with_search_fields()
    }

    /// Trim and lowercase entity, attribute and category.
    pub fn normalized(mut self) -> Self {
        self.entity = normalize_name(&self.entity);
        self.attribute = normalize_name(&self.attribute);
        self.category = normalize_name(&self.category);
        self
    }

    pub fn with_search_fields(mut self) -> Self {
        self.content = format!("{} {} {}", self.entity, self.attribute, self.value);
        self
    }

    pub fn without_search_fields(mut self) -> Self {
        self.content.clear();
        self
    }
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn one() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_fact_is_normalized() {
        let f = SemanticFact::new(
            " Payment-Service",
            "DB-Connection-Pool-Size ",
            "20",
            0.9,
            "Database",
            vec![],
        );
        assert_eq!(f.entity, "payment-service");
        assert_eq!(f.attribute, "db-connection-pool-size");
        assert_eq!(f.category, "database");
        assert_eq!(f.content, "payment-service db-connection-pool-size 20");
        assert_eq!(f.update_count, 1);
        assert_eq!(f.first_observed, f.last_updated);
    }

    #[test]
    fn test_import_defaults() {
        let f: SemanticFact = serde_json::from_value(json!({
            "entity": "svc",
            "attribute": "port",
            "value": "8080",
        }))
        .unwrap();
        assert_eq!(f.update_count, 1);
        assert_eq!(f.confidence, DEFAULT_CONFIDENCE);
        assert!(timestamp::parse(&f.first_observed).is_some());
    }

    #[test]
    fn test_numeric_value_kept_as_text() {
        let f: SemanticFact = serde_json::from_value(json!({
            "entity": "svc",
            "attribute": "port",
            "value": 8080,
        }))
        .unwrap();
        assert_eq!(f.value, "8080");

        let f: SemanticFact = serde_json::from_value(json!({
            "entity": "svc",
            "attribute": "tls",
            "value": true,
        }))
        .unwrap();
        assert_eq!(f.value, "true");

        let err = serde_json::from_value::<SemanticFact>(json!({
            "entity": "svc",
            "attribute": "hosts",
            "value": ["a", "b"],
        }));
        assert!(err.is_err());
    }
}
