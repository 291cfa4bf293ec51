//! Hippocampus error types

use crate::store::StoreError;
use thiserror::Error;

/// Hippocampus error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before any write (size or length limit)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A document-store call that later steps depend on failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code used by the tool surface.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Message safe to hand back to a caller.
    ///
    /// Upstream failures are reduced to their classification so store
    /// endpoints and response bodies never leak through a tool result.
    pub fn public_message(&self) -> String {
        match self {
            Self::Upstream(e) => e.classification(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for Hippocampus operations
pub type Result<T> = std::result::Result<T, Error>;
