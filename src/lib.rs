//! Hippocampus - long-term memory for operations agents
//!
//! Hippocampus stores what an agent experiences as raw episodes and
//! structured facts, periodically consolidates them into per-domain density
//! measurements, and reports the domains where knowledge is missing or
//! outdated.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │        CLI (main.rs)   │   HTTP gateway   │   Scheduler       │
//! └────────────┬───────────┴────────┬─────────┴────────┬──────────┘
//!              └────────────────────▼──────────────────┘
//!                         KnowledgeBase facade
//!   ┌──────────────┬──────────────┬──────────────┬──────────────┐
//!   │ consolidate  │  blindspot   │ sync_domains │ export/import│
//!   └──────┬───────┴──────┬───────┴──────┬───────┴──────┬───────┘
//!          └──────────────┴──────▼───────┴──────────────┘
//!                     DocumentStore trait
//!              ┌───────────────┴────────────────┐
//!              │ ElasticStore   │  InMemoryStore │
//!              └────────────────┴────────────────┘
//! ```
//!
//! ## Record families
//!
//! - episodic: raw experiences awaiting consolidation
//! - semantic: entity/attribute/value facts with confidence
//! - domain staging: append-only density measurements per category
//! - domain lookup: one current row per domain, rebuilt by sync
//! - audit log: one entry per tool call
//!
//! ## Modules
//!
//! - [`knowledge`]: the six tool operations
//! - [`pipeline`]: consolidation, blindspot report, domain sync, export/import
//! - [`store`]: document store abstraction and backends
//! - [`memory`]: typed records and scoring helpers
//! - [`scheduler`]: periodic pipeline runs
//! - [`gateway`]: HTTP tool surface
//! - [`config`]: configuration management

pub mod config;
pub mod error;
pub mod gateway;
pub mod knowledge;
pub mod memory;
pub mod outcome;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod validate;

pub use config::HippocampusConfig;
pub use error::{Error, Result};
pub use knowledge::KnowledgeBase;
