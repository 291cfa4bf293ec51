//! Knowledge base facade
//!
//! [`KnowledgeBase`] is the tool surface shared by the CLI, the HTTP
//! gateway and the scheduler. It owns the store handle and exposes the six
//! agent-facing operations.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::memory::{
    normalize_name, parse_confidence, AuditAction, AuditLogEntry, DomainStagingRecord,
    EpisodicRecord, SemanticFact,
};
use crate::outcome::StepOutcome;
use crate::pipeline::{
    self, BlindspotReport, ConsolidationReport, ExportReport, ImportReport, SyncReport,
};
use crate::store::{DocumentStore, ElasticStore, Family, InMemoryStore};
use crate::validate;

/// Input of [`KnowledgeBase::remember`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RememberRequest {
    pub raw_text: String,
    pub entity: String,
    pub attribute: String,
    pub value: String,
    /// `high`/`medium`/`low` or a number in 0.0–1.0
    pub confidence: String,
    pub category: String,
    /// Comma-separated URLs
    #[serde(default)]
    pub external_refs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RememberReport {
    pub summary: String,
    pub episodic: StepOutcome<String>,
    pub semantic: StepOutcome<String>,
    pub domain: StepOutcome<String>,
}

/// Shared handle to the knowledge base.
#[derive(Clone)]
pub struct KnowledgeBase {
    store: Arc<dyn DocumentStore>,
}

impl KnowledgeBase {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Build the configured store backend.
    pub fn from_config(config: &StoreConfig) -> Self {
        let store: Arc<dyn DocumentStore> = match config.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; data is lost on exit");
                Arc::new(InMemoryStore::new())
            }
            StoreBackend::Elasticsearch => {
                let api_key = config.resolve_api_key();
                if api_key.is_none() {
                    tracing::warn!(env = %config.api_key_env, "No API key set; sending unauthenticated requests");
                }
                Arc::new(ElasticStore::new(
                    &config.url,
                    api_key,
                    config.timeout(),
                    config.bulk_timeout(),
                ))
            }
        };
        Self::new(store)
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Record one experience across the episodic, semantic and staging
    /// families. Each write is reported independently.
    pub async fn remember(&self, request: RememberRequest) -> Result<RememberReport> {
        let entity = normalize_name(&request.entity);
        let attribute = normalize_name(&request.attribute);
        let category = normalize_name(&request.category);
        let refs = validate::split_refs(&request.external_refs);

        validate::remember_input(
            &request.raw_text,
            &entity,
            &attribute,
            &request.value,
            &category,
            &refs,
        )?;

        let confidence = parse_confidence(&request.confidence);

        let episode = EpisodicRecord::new(request.raw_text, category.as_str(), confidence, refs.clone());
        let episodic = StepOutcome::from_store(
            "episodic_write",
            self.store
                .index(Family::Episodic, serde_json::to_value(&episode)?)
                .await,
        );

        let fact = SemanticFact::new(&entity, &attribute, request.value, confidence, &category, refs);
        let semantic = StepOutcome::from_store(
            "semantic_write",
            self.store
                .index(Family::Semantic, serde_json::to_value(&fact)?)
                .await,
        );

        let touch = DomainStagingRecord::touch(&category);
        let domain = StepOutcome::from_store(
            "staging_write",
            self.store
                .index(Family::DomainStaging, serde_json::to_value(&touch)?)
                .await,
        );

        let outcomes = [("episodic", &episodic), ("semantic", &semantic), ("domain", &domain)];
        let ok = outcomes.iter().filter(|(_, o)| o.is_ok()).count();
        let mut summary = format!("Saved successfully ({}/3 families)", ok);
        if ok < outcomes.len() {
            let failed: Vec<&str> = outcomes
                .iter()
                .filter(|(_, o)| !o.is_ok())
                .map(|(name, _)| *name)
                .collect();
            summary.push_str(&format!(", failed: {}", failed.join(", ")));
        }
        tracing::info!(%entity, %attribute, %category, ok, "Remembered");

        AuditLogEntry::new(AuditAction::Remember)
            .query(format!("{} {}", entity, attribute))
            .relevance(confidence)
            .experience_grade("NEW")
            .blindspot_triggered(false)
            .record(self.store())
            .await;

        Ok(RememberReport {
            summary,
            episodic,
            semantic,
            domain,
        })
    }

    pub async fn consolidate(&self) -> Result<ConsolidationReport> {
        pipeline::consolidate(self.store()).await
    }

    pub async fn blindspot_report(&self) -> BlindspotReport {
        pipeline::blindspot_report(self.store()).await
    }

    pub async fn export(&self) -> ExportReport {
        pipeline::export(self.store()).await
    }

    pub async fn import(&self, ndjson: &str) -> Result<ImportReport> {
        pipeline::import(self.store(), ndjson).await
    }

    pub async fn sync_domains(&self) -> Result<SyncReport> {
        pipeline::sync_domains(self.store()).await
    }
}
