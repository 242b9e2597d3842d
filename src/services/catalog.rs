use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::models::{Dataset, ErdModel, SemanticModel};
use crate::services::adapters::SourceConfig;
use crate::utils::{ApiError, ApiResult};

/// Read-only catalog lookup. Catalog persistence and editing live outside
/// the core; this seam is all the pipeline sees.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn get_dataset(&self, id: &str) -> ApiResult<Dataset>;

    /// Relationship model for a dataset, when one is declared.
    async fn get_erd(&self, dataset_id: &str) -> ApiResult<Option<ErdModel>>;

    /// Explicit semantic model for a dataset. Absent means the model is
    /// derived from the dataset's declared fields.
    async fn get_semantic_model(&self, dataset_id: &str) -> ApiResult<Option<SemanticModel>>;

    /// Dataset ids, for listings and error hints.
    async fn list_datasets(&self) -> ApiResult<Vec<String>>;
}

/// Decrypted source-config lookup. Results are cached so re-invocation
/// stays cheap.
#[async_trait]
pub trait SourceConfigProvider: Send + Sync {
    async fn get_source(&self, source_id: &str) -> ApiResult<SourceConfig>;

    async fn list_sources(&self) -> ApiResult<Vec<String>>;
}

/// In-memory catalog, used as the backing store for the file catalog and
/// directly by tests.
#[derive(Default, Debug)]
pub struct MemoryCatalog {
    datasets: DashMap<String, Dataset>,
    erds: DashMap<String, ErdModel>,
    models: DashMap<String, SemanticModel>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_dataset(&self, dataset: Dataset) {
        self.datasets.insert(dataset.id.clone(), dataset);
    }

    pub fn insert_erd(&self, dataset_id: impl Into<String>, erd: ErdModel) {
        self.erds.insert(dataset_id.into(), erd);
    }

    pub fn insert_model(&self, dataset_id: impl Into<String>, model: SemanticModel) {
        self.models.insert(dataset_id.into(), model);
    }
}

#[async_trait]
impl CatalogProvider for MemoryCatalog {
    async fn get_dataset(&self, id: &str) -> ApiResult<Dataset> {
        self.datasets
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| ApiError::dataset_not_found(id))
    }

    async fn get_erd(&self, dataset_id: &str) -> ApiResult<Option<ErdModel>> {
        Ok(self.erds.get(dataset_id).map(|e| e.clone()))
    }

    async fn get_semantic_model(&self, dataset_id: &str) -> ApiResult<Option<SemanticModel>> {
        Ok(self.models.get(dataset_id).map(|m| m.clone()))
    }

    async fn list_datasets(&self) -> ApiResult<Vec<String>> {
        let mut ids: Vec<String> = self.datasets.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

/// In-memory source configs with the same seam as the catalog.
#[derive(Default, Debug)]
pub struct MemorySources {
    sources: DashMap<String, SourceConfig>,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, config: SourceConfig) {
        self.sources.insert(id.into(), config);
    }
}

#[async_trait]
impl SourceConfigProvider for MemorySources {
    async fn get_source(&self, source_id: &str) -> ApiResult<SourceConfig> {
        self.sources.get(source_id).map(|s| s.clone()).ok_or_else(|| {
            ApiError::config_error(format!("Source '{source_id}' not found"))
        })
    }

    async fn list_sources(&self) -> ApiResult<Vec<String>> {
        let mut ids: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// File-backed catalog (TOML), loaded once at startup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DatasetErdEntry {
    dataset: String,
    #[serde(flatten)]
    erd: ErdModel,
}

#[derive(Debug, Deserialize)]
struct DatasetModelEntry {
    dataset: String,
    #[serde(flatten)]
    model: SemanticModel,
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    id: String,
    engine: String,
    #[serde(default)]
    settings: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    datasets: Vec<Dataset>,
    #[serde(default)]
    erds: Vec<DatasetErdEntry>,
    #[serde(default)]
    models: Vec<DatasetModelEntry>,
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

/// Loads a TOML catalog file into memory-backed providers.
///
/// Returns (catalog, sources). Structural problems (an ERD edge naming a
/// missing node, RLS pointing at an unknown field) fail startup rather
/// than the first query.
pub fn load_catalog_file(
    path: &Path,
) -> anyhow::Result<(Arc<MemoryCatalog>, Arc<MemorySources>)> {
    let content = std::fs::read_to_string(path)?;
    let file: CatalogFile = toml::from_str(&content)?;

    let catalog = Arc::new(MemoryCatalog::new());
    let sources = Arc::new(MemorySources::new());

    for dataset in file.datasets {
        if dataset.rls.enabled {
            let column = dataset.rls.column.as_deref().unwrap_or_default();
            if column.is_empty() || !dataset.has_field(column) {
                anyhow::bail!(
                    "Dataset '{}' enables RLS on column '{}' which is not a declared field",
                    dataset.id,
                    column
                );
            }
        }
        catalog.insert_dataset(dataset);
    }

    for entry in file.erds {
        let problems = entry.erd.validate();
        if !problems.is_empty() {
            anyhow::bail!(
                "ERD for dataset '{}' is invalid: {}",
                entry.dataset,
                problems.join("; ")
            );
        }
        catalog.insert_erd(entry.dataset, entry.erd);
    }

    for entry in file.models {
        catalog.insert_model(entry.dataset, entry.model);
    }

    for entry in file.sources {
        sources.insert(
            entry.id.clone(),
            SourceConfig { engine: entry.engine, settings: entry.settings },
        );
    }

    tracing::info!(
        "Loaded catalog from {}: {} datasets, {} sources",
        path.display(),
        catalog.datasets.len(),
        sources.sources.len()
    );

    Ok((catalog, sources))
}
