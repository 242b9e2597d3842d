use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use duckdb::types::ValueRef;
use duckdb::Connection;
use indexmap::IndexMap;
use serde_json::Value;

use crate::utils::{ApiError, ApiResult};

use super::{AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Embedded analytical file store backed by DuckDB.
///
/// The driver is synchronous, so every call runs on the blocking pool. The
/// connection lives behind a mutex; DuckDB handles are cheap to share this
/// way for a gateway-side store.
pub struct DuckDbAdapter {
    engine: String,
    path: Option<String>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl DuckDbAdapter {
    pub fn new(config: &SourceConfig) -> Self {
        Self {
            engine: config.engine.clone(),
            path: config.get("path").map(str::to_string),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn open(path: &Option<String>) -> duckdb::Result<Connection> {
        match path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
    }

    fn run_blocking(
        conn: &Arc<Mutex<Option<Connection>>>,
        path: &Option<String>,
        sql: &str,
        params: &[Value],
    ) -> Result<AdapterResult, String> {
        let mut guard = conn.lock().map_err(|_| "connection mutex poisoned".to_string())?;
        if guard.is_none() {
            *guard = Some(Self::open(path).map_err(|e| e.to_string())?);
        }
        let conn = guard.as_ref().expect("connection initialized above");

        let values: Vec<duckdb::types::Value> = params.iter().map(json_to_duckdb).collect();

        let start = Instant::now();
        let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
        let mut raw_rows = stmt
            .query(duckdb::params_from_iter(values))
            .map_err(|e| e.to_string())?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(|e| e.to_string())? {
            if columns.is_empty() {
                let stmt = row.as_ref();
                for idx in 0..stmt.column_count() {
                    columns.push(
                        stmt.column_name(idx)
                            .map(|name| name.to_string())
                            .unwrap_or_else(|_| format!("col{idx}")),
                    );
                }
            }
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map(value_ref_to_json)
                    .unwrap_or(Value::Null);
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }
        let execution_ms = start.elapsed().as_millis() as u64;

        Ok(AdapterResult {
            rows,
            columns,
            column_types: HashMap::new(),
            execution_ms,
            metadata: HashMap::new(),
        })
    }
}

fn json_to_duckdb(value: &Value) -> duckdb::types::Value {
    match value {
        Value::Null => duckdb::types::Value::Null,
        Value::Bool(b) => duckdb::types::Value::Boolean(*b),
        Value::Number(n) if n.is_f64() => {
            duckdb::types::Value::Double(n.as_f64().unwrap_or_default())
        }
        Value::Number(n) => duckdb::types::Value::BigInt(n.as_i64().unwrap_or_default()),
        Value::String(s) => duckdb::types::Value::Text(s.clone()),
        other => duckdb::types::Value::Text(other.to_string()),
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i as i64),
        ValueRef::SmallInt(i) => Value::from(i as i64),
        ValueRef::Int(i) => Value::from(i as i64),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::UTinyInt(i) => Value::from(i as u64),
        ValueRef::USmallInt(i) => Value::from(i as u64),
        ValueRef::UInt(i) => Value::from(i as u64),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => Value::from(f as f64),
        ValueRef::Double(f) => Value::from(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).to_string()),
        other => Value::String(format!("{other:?}")),
    }
}

#[async_trait]
impl EngineAdapter for DuckDbAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        let conn = self.conn.clone();
        let path = self.path.clone();
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| "connection mutex poisoned".to_string())?;
            if guard.is_none() {
                *guard = Some(Self::open(&path).map_err(|e| e.to_string())?);
            }
            Ok::<(), String>(())
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("blocking task failed: {e}")))?
        .map_err(|e| ApiError::connection_error(&engine, e))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let conn = self.conn.clone();
        let path = self.path.clone();
        let sql = sql.to_string();
        let params = params.to_vec();
        let engine = self.engine.clone();

        let result = tokio::task::spawn_blocking(move || {
            Self::run_blocking(&conn, &path, &sql, &params)
        })
        .await
        .map_err(|e| ApiError::internal_error(format!("blocking task failed: {e}")))?;

        result.map_err(|e| ApiError::query_error(&engine, e))
    }

    async fn health_check(&self) -> bool {
        let probe = self.execute("SELECT 1", &[]);
        tokio::time::timeout(HEALTH_TIMEOUT, probe)
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        let conn = self.conn.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = conn.lock() {
                // Dropping the handle closes the store; repeated calls are
                // no-ops on an already-empty slot.
                guard.take();
            }
        })
        .await;
    }
}
