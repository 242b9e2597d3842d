use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::sync::OnceCell;

use crate::utils::{ApiError, ApiResult};

use super::{AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Self-file SQLite adapter over an async pool. Placeholders stay in the
/// native `?` form.
pub struct SqliteAdapter {
    engine: String,
    url: String,
    pool: OnceCell<SqlitePool>,
}

impl SqliteAdapter {
    pub fn new(config: &SourceConfig) -> Self {
        let url = config
            .get("path")
            .map(|p| format!("sqlite://{p}"))
            .or_else(|| config.get("url").map(str::to_string))
            .unwrap_or_else(|| "sqlite::memory:".to_string());
        Self { engine: config.engine.clone(), url, pool: OnceCell::new() }
    }

    async fn pool(&self) -> ApiResult<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .acquire_timeout(Duration::from_secs(5))
                    .connect(&self.url)
                    .await
                    .map_err(|e| ApiError::connection_error(&self.engine, e))
            })
            .await
    }
}

fn row_value(row: &SqliteRow, idx: usize) -> Value {
    let type_name = match row.try_get_raw(idx) {
        Ok(raw) => {
            if raw.is_null() {
                return Value::Null;
            }
            raw.type_info().name().to_uppercase()
        }
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "BOOLEAN" => row.try_get::<bool, _>(idx).map(Value::from).unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(idx).map(Value::from).unwrap_or(Value::Null),
    }
}

#[async_trait]
impl EngineAdapter for SqliteAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        self.pool().await.map(|_| ())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let pool = self.pool().await?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::Null => query.bind(Option::<String>::None),
                Value::Bool(b) => query.bind(*b),
                Value::Number(n) if n.is_f64() => query.bind(n.as_f64().unwrap_or_default()),
                Value::Number(n) => query.bind(n.as_i64().unwrap_or_default()),
                Value::String(s) => query.bind(s.clone()),
                other => query.bind(other.to_string()),
            };
        }

        let start = Instant::now();
        let raw_rows = query
            .fetch_all(pool)
            .await
            .map_err(|e| ApiError::query_error(&self.engine, e))?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        let mut rows = Vec::with_capacity(raw_rows.len());

        for row in &raw_rows {
            if columns.is_empty() {
                for col in row.columns() {
                    columns.push(col.name().to_string());
                    column_types.insert(col.name().to_string(), col.type_info().name().to_string());
                }
            }
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), row_value(row, idx));
            }
            rows.push(map);
        }

        tracing::debug!("sqlite returned {} rows in {}ms", rows.len(), execution_ms);

        Ok(AdapterResult {
            rows,
            columns,
            column_types,
            execution_ms,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> bool {
        let probe = async {
            let pool = self.pool().await.ok()?;
            sqlx::query("SELECT 1").fetch_one(pool).await.ok()
        };
        tokio::time::timeout(HEALTH_TIMEOUT, probe)
            .await
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            if !pool.is_closed() {
                pool.close().await;
            }
        }
    }
}
