// Common test utilities and helpers

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::models::{
    AggregationType, Cardinality, Dataset, DatasetField, Dimension, ErdModel, FieldKind,
    FieldType, JoinType, Measure, QueryRequest, RelationshipEdge, Role, RlsMode, RlsPolicy,
    SemanticModel, TableNode, TenantContext,
};
use crate::services::adapters::{AdapterResult, EngineAdapter};
use crate::services::cache::store::CacheStore;
use crate::services::cache::{CacheSettings, QueryCache};
use crate::services::catalog::{MemoryCatalog, MemorySources};
use crate::services::observability::RecordingStatsSink;
use crate::services::pipeline::{GuardLimits, QueryPipeline};
use crate::services::AdapterRegistry;
use crate::utils::{ApiError, ApiResult};

/// Adapter double: records calls, returns canned rows, optionally sleeps
/// to simulate a slow engine.
pub struct FakeAdapter {
    engine: String,
    delay: Duration,
    rows: Vec<IndexMap<String, Value>>,
    pub calls: AtomicUsize,
    pub last_sql: Mutex<Option<String>>,
    pub last_params: Mutex<Vec<Value>>,
}

impl FakeAdapter {
    pub fn new(engine: &str) -> Self {
        let mut row = IndexMap::new();
        row.insert("city".to_string(), json!("Pune"));
        row.insert("total_revenue".to_string(), json!(1250.5));
        Self {
            engine: engine.to_string(),
            delay: Duration::ZERO,
            rows: vec![row],
            calls: AtomicUsize::new(0),
            last_sql: Mutex::new(None),
            last_params: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_rows(mut self, rows: Vec<IndexMap<String, Value>>) -> Self {
        self.rows = rows;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineAdapter for FakeAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_sql.lock().await = Some(sql.to_string());
        *self.last_params.lock().await = params.to_vec();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(AdapterResult {
            columns: self
                .rows
                .first()
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default(),
            rows: self.rows.clone(),
            column_types: HashMap::new(),
            execution_ms: self.delay.as_millis() as u64,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

/// Cache store double whose every operation fails, for degradation tests.
pub struct FailingStore;

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &str) -> ApiResult<Option<Vec<u8>>> {
        Err(ApiError::cache_unavailable("store down"))
    }

    async fn set_with_ttl(&self, _key: &str, _value: &[u8], _ttl: Duration) -> ApiResult<()> {
        Err(ApiError::cache_unavailable("store down"))
    }

    async fn del(&self, _key: &str) -> ApiResult<()> {
        Err(ApiError::cache_unavailable("store down"))
    }

    async fn acquire_lock(&self, _key: &str, _owner: &str, _ttl: Duration) -> ApiResult<bool> {
        Err(ApiError::cache_unavailable("store down"))
    }

    async fn release_lock(&self, _key: &str, _owner: &str) -> ApiResult<()> {
        Err(ApiError::cache_unavailable("store down"))
    }
}

pub fn field(
    name: &str,
    column: &str,
    kind: FieldKind,
    field_type: FieldType,
    aggregation: Option<AggregationType>,
    expression: Option<&str>,
) -> DatasetField {
    DatasetField {
        name: name.to_string(),
        physical_column: column.to_string(),
        kind,
        field_type,
        aggregation,
        expression: expression.map(str::to_string),
    }
}

/// The `orders` dataset used throughout the scenario tests: city and
/// order_date dimensions, SUM(amount) measure, RLS on tenant_id.
pub fn orders_dataset(allow_admin_bypass: bool) -> Dataset {
    Dataset {
        id: "orders".to_string(),
        source_id: "warehouse".to_string(),
        engine: "postgres".to_string(),
        base_table: "orders".to_string(),
        fields: vec![
            field("city", "city", FieldKind::Dimension, FieldType::String, None, None),
            field("order_date", "order_date", FieldKind::Time, FieldType::Date, None, None),
            field("tenant_id", "tenant_id", FieldKind::Dimension, FieldType::String, None, None),
            field(
                "total_revenue",
                "amount",
                FieldKind::Measure,
                FieldType::Float,
                Some(AggregationType::Sum),
                Some("amount"),
            ),
        ],
        rls: RlsPolicy {
            enabled: true,
            column: Some("tenant_id".to_string()),
            mode: RlsMode::Equals,
            allow_admin_bypass,
        },
        cache_ttl_secs: None,
        query_timeout_secs: None,
        default_limit: None,
        allow_cross_joins: false,
    }
}

/// Star-schema dataset with an explicit semantic model and ERD:
/// orders -> customers -> regions.
pub fn sales_dataset() -> (Dataset, SemanticModel, ErdModel) {
    let dataset = Dataset {
        id: "sales".to_string(),
        source_id: "warehouse".to_string(),
        engine: "postgres".to_string(),
        base_table: "orders".to_string(),
        fields: vec![field(
            "tenant_id",
            "tenant_id",
            FieldKind::Dimension,
            FieldType::String,
            None,
            None,
        )],
        rls: RlsPolicy::default(),
        cache_ttl_secs: None,
        query_timeout_secs: None,
        default_limit: None,
        allow_cross_joins: false,
    };

    let model = SemanticModel {
        dimensions: vec![Dimension {
            name: "region_name".to_string(),
            source_table: "regions".to_string(),
            source_column: "name".to_string(),
        }],
        measures: vec![Measure {
            name: "total_amount".to_string(),
            source_table: Some("orders".to_string()),
            aggregation: AggregationType::Sum,
            expression: "amount".to_string(),
        }],
        calculated_fields: vec![],
    };

    let node = |id: &str, table: &str| TableNode {
        id: id.to_string(),
        schema: None,
        table: table.to_string(),
    };
    let erd = ErdModel {
        nodes: vec![node("n1", "orders"), node("n2", "customers"), node("n3", "regions")],
        edges: vec![
            RelationshipEdge {
                id: "e1".to_string(),
                source_node_id: "n1".to_string(),
                target_node_id: "n2".to_string(),
                source_column: "customer_id".to_string(),
                target_column: "id".to_string(),
                cardinality: Cardinality::ManyToOne,
                join_type: JoinType::Left,
                is_active: true,
            },
            RelationshipEdge {
                id: "e2".to_string(),
                source_node_id: "n2".to_string(),
                target_node_id: "n3".to_string(),
                source_column: "region_id".to_string(),
                target_column: "id".to_string(),
                cardinality: Cardinality::ManyToOne,
                join_type: JoinType::Left,
                is_active: true,
            },
        ],
    };

    (dataset, model, erd)
}

pub struct TestGateway {
    pub pipeline: Arc<QueryPipeline>,
    pub stats: Arc<RecordingStatsSink>,
    pub adapter: Arc<FakeAdapter>,
    pub catalog: Arc<MemoryCatalog>,
}

/// Wires a pipeline over in-memory collaborators and the given adapter.
pub fn build_gateway(
    datasets: Vec<Dataset>,
    adapter: FakeAdapter,
    store: Option<Arc<dyn CacheStore>>,
) -> TestGateway {
    build_gateway_with_settings(datasets, adapter, store, CacheSettings::default())
}

pub fn build_gateway_with_settings(
    datasets: Vec<Dataset>,
    adapter: FakeAdapter,
    store: Option<Arc<dyn CacheStore>>,
    settings: CacheSettings,
) -> TestGateway {
    let catalog = Arc::new(MemoryCatalog::new());
    for dataset in datasets {
        catalog.insert_dataset(dataset);
    }

    let sources = Arc::new(MemorySources::new());
    let registry = Arc::new(AdapterRegistry::new(sources));
    let adapter = Arc::new(adapter);
    registry.insert("warehouse", adapter.clone());

    let cache = Arc::new(QueryCache::new(store, settings));
    let stats = Arc::new(RecordingStatsSink::default());
    let pipeline = Arc::new(QueryPipeline::new(
        catalog.clone(),
        registry,
        cache,
        stats.clone(),
        GuardLimits::default(),
    ));

    TestGateway { pipeline, stats, adapter, catalog }
}

pub fn user_ctx(tenant: &str) -> TenantContext {
    TenantContext::new(tenant, Role::User, format!("key-{tenant}"))
}

pub fn admin_ctx(tenant: &str) -> TenantContext {
    TenantContext::new(tenant, Role::Admin, format!("key-{tenant}"))
}

pub fn basic_request(raw: Value) -> QueryRequest {
    serde_json::from_value(raw).expect("Failed to build request fixture")
}
