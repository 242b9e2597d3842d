// Engine adapters
// Purpose: uniform execute/health/close contract over the supported SQL
// engines, with per-engine placeholder rewriting and result normalization.
// Design: dynamic dispatch via trait object, one adapter instance per source.

mod bigquery;
mod clickhouse;
mod databricks;
mod duckdb_store;
mod mssql;
mod mysql;
mod oracle;
pub mod placeholder;
mod postgres;
pub mod registry;
mod snowflake;
mod sqlite;
mod trino;

pub use bigquery::BigQueryAdapter;
pub use clickhouse::ClickHouseAdapter;
pub use databricks::DatabricksAdapter;
pub use duckdb_store::DuckDbAdapter;
pub use mssql::MsSqlAdapter;
pub use mysql::MySqlAdapter;
pub use oracle::OracleAdapter;
pub use postgres::PostgresAdapter;
pub use registry::AdapterRegistry;
pub use snowflake::SnowflakeAdapter;
pub use sqlite::SqliteAdapter;
pub use trino::TrinoAdapter;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::utils::{ApiError, ApiResult};

/// Health checks must answer within this bound.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Decrypted connection settings for one source, handed through opaquely.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub engine: String,
    pub settings: HashMap<String, String>,
}

impl SourceConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> ApiResult<&str> {
        self.get(key).ok_or_else(|| {
            ApiError::config_error(format!(
                "Source config for engine '{}' is missing required field '{}'",
                self.engine, key
            ))
        })
    }
}

/// Normalized result of one adapter execution.
#[derive(Debug, Clone, Default)]
pub struct AdapterResult {
    /// Rows as insertion-order-preserving column -> value maps.
    pub rows: Vec<IndexMap<String, Value>>,
    pub columns: Vec<String>,
    /// Engine-native type names, passed through untouched.
    pub column_types: HashMap<String, String>,
    pub execution_ms: u64,
    pub metadata: HashMap<String, Value>,
}

impl AdapterResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Uniform capability contract every engine implements.
///
/// `execute` takes canonical `?` positional placeholders; each adapter
/// rewrites them to its native form, preserving parameter order. `close`
/// is idempotent.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Engine tag this adapter was constructed for.
    fn engine(&self) -> &str;

    /// Establishes (or verifies) connectivity. Pools may be created lazily;
    /// this forces the first connection so config errors surface early.
    async fn connect(&self) -> ApiResult<()>;

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult>;

    /// Trivial server round-trip, bounded by [`HEALTH_TIMEOUT`].
    async fn health_check(&self) -> bool;

    /// Releases held connections. Safe to call twice.
    async fn close(&self);
}

/// Builds the adapter for a source (factory method). Wire-compatible
/// engines share an implementation: the Postgres family differs only in
/// its engine tag, as does the MySQL family.
pub fn create_adapter(config: &SourceConfig) -> ApiResult<Arc<dyn EngineAdapter>> {
    let tag = config.engine.to_lowercase().replace(['_', '-'], "");
    let adapter: Arc<dyn EngineAdapter> = match tag.as_str() {
        "duckdb" | "embedded" => Arc::new(DuckDbAdapter::new(config)),
        "sqlite" => Arc::new(SqliteAdapter::new(config)),
        "postgres" | "postgresql" | "redshift" | "timescaledb" | "cockroachdb" => {
            Arc::new(PostgresAdapter::new(config)?)
        }
        "mysql" | "mariadb" | "starrocks" | "doris" => Arc::new(MySqlAdapter::new(config)?),
        "snowflake" => Arc::new(SnowflakeAdapter::new(config)?),
        "bigquery" => Arc::new(BigQueryAdapter::new(config)?),
        "databricks" | "spark" => Arc::new(DatabricksAdapter::new(config)?),
        "clickhouse" => Arc::new(ClickHouseAdapter::new(config)?),
        "trino" | "presto" => Arc::new(TrinoAdapter::new(config)?),
        "sqlserver" | "mssql" => Arc::new(MsSqlAdapter::new(config)?),
        "oracle" => Arc::new(OracleAdapter::new(config)?),
        other => {
            return Err(ApiError::config_error(format!(
                "Unsupported engine: {other}"
            )))
        }
    };
    Ok(adapter)
}
