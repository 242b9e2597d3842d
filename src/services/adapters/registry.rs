use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::services::catalog::SourceConfigProvider;
use crate::utils::ApiResult;

use super::{create_adapter, EngineAdapter};

/// Process-wide map from source id to live adapter.
///
/// Lookup is lock-free after first insertion; construction is serialized by
/// a single mutex so concurrent first requests build one adapter, not N.
pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn EngineAdapter>>,
    sources: Arc<dyn SourceConfigProvider>,
    build_lock: Mutex<()>,
}

impl AdapterRegistry {
    pub fn new(sources: Arc<dyn SourceConfigProvider>) -> Self {
        Self {
            adapters: DashMap::new(),
            sources,
            build_lock: Mutex::new(()),
        }
    }

    /// Get or lazily construct the adapter for a source.
    ///
    /// Fast path: lock-free read of an already-built adapter.
    /// Slow path: fetch the decrypted source config and build one.
    pub async fn get(&self, source_id: &str) -> ApiResult<Arc<dyn EngineAdapter>> {
        if let Some(adapter) = self.adapters.get(source_id) {
            return Ok(adapter.clone());
        }

        let _guard = self.build_lock.lock().await;
        // Another builder may have finished while we waited.
        if let Some(adapter) = self.adapters.get(source_id) {
            return Ok(adapter.clone());
        }

        let config = self.sources.get_source(source_id).await?;
        let adapter = create_adapter(&config)?;
        self.adapters.insert(source_id.to_string(), adapter.clone());
        tracing::info!(
            "Constructed {} adapter for source {}",
            config.engine,
            source_id
        );
        Ok(adapter)
    }

    /// Registers a pre-built adapter. Used at wiring time and by tests to
    /// inject fakes.
    pub fn insert(&self, source_id: impl Into<String>, adapter: Arc<dyn EngineAdapter>) {
        self.adapters.insert(source_id.into(), adapter);
    }

    /// Drops the adapter for a source after a flagged connection error; the
    /// next request reconstructs it.
    pub async fn evict(&self, source_id: &str) {
        if let Some((_, adapter)) = self.adapters.remove(source_id) {
            adapter.close().await;
            tracing::warn!("Evicted adapter for source {}", source_id);
        }
    }

    /// Explicit shutdown: closes every adapter.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.adapters.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, adapter)) = self.adapters.remove(&id) {
                adapter.close().await;
            }
        }
        tracing::info!("Closed all engine adapters");
    }

    pub fn count(&self) -> usize {
        self.adapters.len()
    }
}
