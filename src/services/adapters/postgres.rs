use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bytes::BytesMut;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row};

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Postgres wire-protocol family: Postgres, Redshift, TimescaleDB,
/// CockroachDB. Placeholders are rewritten `?` -> `$1..$n`.
pub struct PostgresAdapter {
    engine: String,
    pg_config: tokio_postgres::Config,
    pool: OnceCell<PgPool>,
}

impl PostgresAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(config.require("host")?)
            .port(
                config
                    .get("port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(5432),
            )
            .user(config.require("user")?)
            .dbname(config.require("database")?)
            .connect_timeout(Duration::from_secs(10));
        if let Some(password) = config.get("password") {
            pg_config.password(password);
        }
        Ok(Self {
            engine: config.engine.clone(),
            pg_config,
            pool: OnceCell::new(),
        })
    }

    async fn pool(&self) -> ApiResult<&PgPool> {
        self.pool
            .get_or_try_init(|| async {
                let manager =
                    PostgresConnectionManager::new(self.pg_config.clone(), NoTls);
                Pool::builder()
                    .max_size(8)
                    .connection_timeout(Duration::from_secs(10))
                    .build(manager)
                    .await
                    .map_err(|e| ApiError::connection_error(&self.engine, e))
            })
            .await
    }
}

/// Dynamic parameter bound by the type the server inferred for its slot.
#[derive(Debug)]
struct PgParam(Value);

impl ToSql for PgParam {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match &self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Number(n) => {
                if *ty == Type::INT2 {
                    (n.as_i64().unwrap_or_default() as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (n.as_i64().unwrap_or_default() as i32).to_sql(ty, out)
                } else if *ty == Type::INT8 {
                    n.as_i64().unwrap_or_default().to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (n.as_f64().unwrap_or_default() as f32).to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    n.as_f64().unwrap_or_default().to_sql(ty, out)
                } else {
                    n.to_string().to_sql(ty, out)
                }
            }
            Value::String(s) => s.to_sql(ty, out),
            other => other.to_string().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn row_value(row: &Row, idx: usize) -> Value {
    let ty = row.columns()[idx].type_().clone();
    let value = if ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Value::from)
    } else if ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
    } else if ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as i64))
    } else if ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::from)
    } else if ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::from(v as f64))
    } else if ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::from)
    } else if ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
    } else if ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_rfc3339()))
    } else if ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)
            .ok()
            .flatten()
            .map(|v| Value::String(v.to_string()))
    } else {
        row.try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(Value::String)
    };
    value.unwrap_or(Value::Null)
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        let pool = self.pool().await?;
        pool.get()
            .await
            .map(|_| ())
            .map_err(|e| ApiError::connection_error(&self.engine, e))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let pool = self.pool().await?;
        let conn = pool
            .get()
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;

        let native_sql = placeholder::numbered(sql, "$");
        let bound: Vec<PgParam> = params.iter().cloned().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let start = Instant::now();
        let raw_rows = conn
            .query(native_sql.as_str(), &refs)
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
                    column_types.insert(col.name().to_string(), col.type_().name().to_string());
                }
            }
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), row_value(row, idx));
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
            let pool = self.pool().await.ok()?;
            let conn = pool.get().await.ok()?;
            conn.query_one("SELECT 1", &[]).await.ok()
        };
        tokio::time::timeout(HEALTH_TIMEOUT, probe)
            .await
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    async fn close(&self) {
        // bb8 drops pooled connections when the pool itself is dropped at
        // registry eviction; nothing to tear down eagerly here.
    }
}
