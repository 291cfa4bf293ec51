//! Audit log entries

use serde::{Deserialize, Serialize};

use super::timestamp;
use crate::store::{DocumentStore, Family};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Remember,
    Consolidate,
    BlindspotReport,
    Export,
    Import,
}

/// Traceability record. Never read back by the pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: String,
    pub action: AuditAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blindspot_triggered: Option<bool>,
}

impl AuditLogEntry {
    pub fn new(action: AuditAction) -> Self {
        Self {
            timestamp: timestamp::now(),
            action,
            details: None,
            query: None,
            relevance_score: None,
            experience_grade: None,
            blindspot_triggered: None,
        }
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn relevance(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    pub fn experience_grade(mut self, grade: impl Into<String>) -> Self {
        self.experience_grade = Some(grade.into());
        self
    }

    pub fn blindspot_triggered(mut self, triggered: bool) -> Self {
        self.blindspot_triggered = Some(triggered);
        self
    }

    /// Append this entry to the audit log.
    ///
    /// Failures are logged and swallowed; auditing never changes a tool result.
    pub async fn record(self, store: &dyn DocumentStore) {
        let action = self.action;
        let doc = match serde_json::to_value(&self) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(?action, error = %e, "Failed to serialize audit entry");
                return;
            }
        };
        if let Err(e) = store.index(Family::AuditLog, doc).await {
            tracing::warn!(?action, error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoreOp};

    #[tokio::test]
    async fn test_record_writes_entry() {
        let store = InMemoryStore::new();
        AuditLogEntry::new(AuditAction::Remember)
            .query("svc port")
            .relevance(0.9)
            .record(&store)
            .await;

        let docs = store.documents(Family::AuditLog).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["action"], "remember");
        assert_eq!(docs[0]["query"], "svc port");
        assert!(docs[0].get("details").is_none());
    }

    #[tokio::test]
    async fn test_record_failure_is_swallowed() {
        let store = InMemoryStore::new();
        store.fail_on(StoreOp::Index).await;
        AuditLogEntry::new(AuditAction::Export)
            .details("x")
            .record(&store)
            .await;
        assert!(store.documents(Family::AuditLog).await.is_empty());
    }
}
