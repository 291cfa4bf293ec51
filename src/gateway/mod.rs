//! HTTP tool surface for Hippocampus
//!
//! Exposes the knowledge base operations as JSON-over-HTTP endpoints.

mod handler;
mod server;

pub use handler::{tools_router, ApiError};
pub use server::{Gateway, GatewayState};
