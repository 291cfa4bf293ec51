//! Per-step results
//!
//! Multi-step tools report each sub-operation separately so a caller can
//! tell exactly which write landed and which did not.

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Outcome of one sub-operation inside a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum StepOutcome<T> {
    Ok(T),
    /// Carries only a non-leaking classification of the failure
    Failed(String),
    Skipped(String),
}

impl<T> StepOutcome<T> {
    /// Log a store failure with full detail and keep its classification.
    pub fn from_store(step: &str, result: Result<T, StoreError>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => {
                tracing::error!(step, error = %e, "Store call failed");
                Self::Failed(e.classification())
            }
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Ok(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_shape() {
        let ok: StepOutcome<u64> = StepOutcome::Ok(3);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"status": "ok", "value": 3})
        );

        let failed: StepOutcome<u64> = StepOutcome::from_store("mark", Err(StoreError::Timeout));
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"status": "failed", "value": "timeout"})
        );
    }

    #[test]
    fn test_failure_hides_detail() {
        let outcome: StepOutcome<String> = StepOutcome::from_store(
            "index",
            Err(StoreError::Transport("dial tcp 10.1.2.3:9200".to_string())),
        );
        assert!(!outcome.is_ok());
        assert_eq!(outcome, StepOutcome::Failed("transport error".to_string()));
        assert!(outcome.value().is_none());
    }
}
