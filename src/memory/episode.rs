//! Episodic records

use serde::{Deserialize, Serialize};

use super::{lenient_f64, timestamp, DEFAULT_IMPORTANCE};

/// Field flipped by consolidation.
pub const CONSOLIDATED_FIELD: &str = "consolidated";

/// Category used when an episode carries none.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// A raw experience awaiting consolidation.
///
/// `content` is a search-only copy of `raw_text`; it is never exported and
/// is regenerated whenever a record is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodicRecord {
    #[serde(default)]
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default = "timestamp::now")]
    pub timestamp: String,
    #[serde(default = "default_importance", deserialize_with = "lenient_f64")]
    pub importance: f64,
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub consolidated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_refs: Vec<String>,
}

impl EpisodicRecord {
    /// Fresh, unconsolidated episode from a conversation.
    pub fn new(
        raw_text: impl Into<String>,
        category: impl Into<String>,
        importance: f64,
        external_refs: Vec<String>,
    ) -> Self {
        let raw_text = raw_text.into();
        Self {
            content: raw_text.clone(),
            raw_text,
            timestamp: timestamp::now(),
            importance,
            category: category.into(),
            source_type: default_source_type(),
            consolidated: false,
            external_refs,
        }
    }

    /// Regenerate the search-only `content` copy.
    pub fn with_search_fields(mut self) -> Self {
        self.content = self.raw_text.clone();
        self
    }

    /// Drop fields that only exist for the store's search index.
    pub fn without_search_fields(mut self) -> Self {
        self.content.clear();
        self
    }
}

fn default_importance() -> f64 {
    DEFAULT_IMPORTANCE
}

fn unknown_category() -> String {
    UNKNOWN_CATEGORY.to_string()
}

fn default_source_type() -> String {
    "conversation".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_episode() {
        let ep = EpisodicRecord::new("DB pool size is 20", "database", 0.9, vec![]);
        assert_eq!(ep.content, ep.raw_text);
        assert!(!ep.consolidated);
        assert_eq!(ep.source_type, "conversation");
        assert!(timestamp::parse(&ep.timestamp).is_some());
    }

    #[test]
    fn test_defaults_on_sparse_document() {
        let ep: EpisodicRecord = serde_json::from_value(json!({"raw_text": "hello"})).unwrap();
        assert_eq!(ep.category, UNKNOWN_CATEGORY);
        assert!(!ep.consolidated);
        assert_eq!(ep.importance, 0.5);
        assert!(ep.content.is_empty());
    }

    #[test]
    fn test_importance_accepts_numeric_string() {
        let ep: EpisodicRecord =
            serde_json::from_value(json!({"raw_text": "x", "importance": "0.4"})).unwrap();
        assert_eq!(ep.importance, 0.4);
    }

    #[test]
    fn test_search_fields_not_serialized_when_stripped() {
        let ep = EpisodicRecord::new("text", "c", 0.5, vec![]).without_search_fields();
        let v = serde_json::to_value(&ep).unwrap();
        assert!(v.get("content").is_none());
        assert!(v.get("external_refs").is_none());
    }
}
