//! Meridian Library
//!
//! Core of the semantic analytics gateway: semantic query compilation,
//! row-level security enforcement, result caching with single-flight
//! deduplication, and adapter dispatch over the supported SQL engines.

use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use config::Config;
pub use services::{
    AdapterRegistry, CatalogProvider, QueryCache, QueryPipeline, RecordingStatsSink,
    SourceConfigProvider,
};
pub use utils::{ApiError, ApiResult};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI
/// container. Collaborators are trait objects wired once at startup; tests
/// inject in-memory fakes through the same seams.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogProvider>,
    pub sources: Arc<dyn SourceConfigProvider>,
    pub registry: Arc<AdapterRegistry>,
    pub cache: Arc<QueryCache>,
    pub stats: Arc<RecordingStatsSink>,
    pub pipeline: Arc<QueryPipeline>,
}
