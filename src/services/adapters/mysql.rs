use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Params, Pool, SslOpts};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::utils::{ApiError, ApiResult};

use super::{AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// MySQL wire-protocol family: MySQL, MariaDB and the wire-compatible
/// analytical stores (StarRocks, Doris). Placeholders stay `?` native.
pub struct MySqlAdapter {
    engine: String,
    opts: OptsBuilder,
    pool: Arc<Mutex<Option<Pool>>>,
}

impl MySqlAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.require("host")?)
            .tcp_port(
                config
                    .get("port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3306),
            )
            .user(Some(config.require("user")?))
            .pass(config.get("password").map(str::to_string))
            .db_name(config.get("database"))
            .prefer_socket(false)
            .ssl_opts(None::<SslOpts>)
            .tcp_keepalive(Some(30_000_u32))
            .tcp_nodelay(true)
            .pool_opts(
                mysql_async::PoolOpts::default()
                    .with_constraints(
                        mysql_async::PoolConstraints::new(1, 8).ok_or_else(|| {
                            ApiError::internal_error(
                                "Failed to create pool constraints: invalid min/max values",
                            )
                        })?,
                    )
                    .with_inactive_connection_ttl(std::time::Duration::from_secs(300)),
            );

        Ok(Self {
            engine: config.engine.clone(),
            opts,
            pool: Arc::new(Mutex::new(None)),
        })
    }

    async fn pool(&self) -> Pool {
        let mut guard = self.pool.lock().await;
        if guard.is_none() {
            *guard = Some(Pool::new(self.opts.clone()));
            tracing::info!("Created MySQL connection pool for {} source", self.engine);
        }
        guard.as_ref().expect("pool initialized above").clone()
    }
}

fn json_to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        Value::Number(n) if n.is_f64() => {
            mysql_async::Value::Double(n.as_f64().unwrap_or_default())
        }
        Value::Number(n) => mysql_async::Value::Int(n.as_i64().unwrap_or_default()),
        Value::String(s) => mysql_async::Value::Bytes(s.clone().into_bytes()),
        other => mysql_async::Value::Bytes(other.to_string().into_bytes()),
    }
}

fn mysql_to_json(value: &mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).to_string())
        }
        mysql_async::Value::Int(i) => Value::from(*i),
        mysql_async::Value::UInt(u) => Value::from(*u),
        mysql_async::Value::Float(f) => Value::from(*f as f64),
        mysql_async::Value::Double(d) => Value::from(*d),
        mysql_async::Value::Date(year, month, day, hour, minute, second, _micro) => {
            Value::String(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        }
        mysql_async::Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + u32::from(*hours);
            Value::String(format!("{total_hours}:{minutes:02}:{seconds:02}"))
        }
    }
}

#[async_trait]
impl EngineAdapter for MySqlAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        let pool = self.pool().await;
        pool.get_conn()
            .await
            .map(|_| ())
            .map_err(|e| ApiError::connection_error(&self.engine, e))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let pool = self.pool().await;
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;

        let bound: Vec<mysql_async::Value> = params.iter().map(json_to_mysql).collect();
        let mysql_params = if bound.is_empty() {
            Params::Empty
        } else {
            Params::Positional(bound)
        };

        let start = Instant::now();
        let raw_rows: Vec<mysql_async::Row> = conn
            .exec(sql, mysql_params)
            .await
            .map_err(|e| ApiError::query_error(&self.engine, e))?;
        let execution_ms = start.elapsed().as_millis() as u64;

        // Connection returns to the pool on drop.
        drop(conn);

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        let mut rows = Vec::with_capacity(raw_rows.len());

        for row in &raw_rows {
            if columns.is_empty() {
                for col in row.columns_ref() {
                    let name = col.name_str().to_string();
                    column_types.insert(name.clone(), format!("{:?}", col.column_type()));
                    columns.push(name);
                }
            }
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = row
                    .as_ref(idx)
                    .map(mysql_to_json)
                    .unwrap_or(Value::Null);
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }

        tracing::debug!(
            "{} returned {} rows in {}ms",
            self.engine,
            rows.len(),
            execution_ms
        );

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
            let pool = self.pool().await;
            let mut conn = pool.get_conn().await.ok()?;
            conn.query::<mysql_async::Row, _>("SELECT 1").await.ok()
        };
        tokio::time::timeout(HEALTH_TIMEOUT, probe)
            .await
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    async fn close(&self) {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.take() {
            if let Err(e) = pool.disconnect().await {
                tracing::warn!("Error disconnecting {} pool: {}", self.engine, e);
            }
        }
    }
}
