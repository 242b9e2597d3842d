use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// ClickHouse over its HTTP interface.
///
/// Placeholders become `{p0:Type}` server-side parameters with inferred
/// type hints; values travel as `param_p0=...` query parameters so the
/// server binds them, never the gateway.
pub struct ClickHouseAdapter {
    engine: String,
    base_url: String,
    user: String,
    password: Option<String>,
    database: Option<String>,
    client: reqwest::Client,
}

impl ClickHouseAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let host = config.require("host")?;
        let port = config.get("port").unwrap_or("8123");
        let scheme = if config.get("ssl") == Some("true") { "https" } else { "http" };
        Ok(Self {
            engine: config.engine.clone(),
            base_url: format!("{scheme}://{host}:{port}"),
            user: config.get("user").unwrap_or("default").to_string(),
            password: config.get("password").map(str::to_string),
            database: config.get("database").map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    async fn post(&self, sql: String, params: Vec<(String, Value)>) -> ApiResult<Value> {
        let mut query: Vec<(String, String)> = Vec::new();
        if let Some(db) = &self.database {
            query.push(("database".to_string(), db.clone()));
        }
        for (name, value) in params {
            let rendered = match value {
                Value::String(s) => s,
                Value::Null => "\\N".to_string(),
                Value::Bool(b) => if b { "1" } else { "0" }.to_string(),
                other => other.to_string(),
            };
            query.push((format!("param_{name}"), rendered));
        }

        let response = self
            .client
            .post(&self.base_url)
            .query(&query)
            .basic_auth(&self.user, self.password.as_deref())
            .body(format!("{sql} FORMAT JSON"))
            .send()
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::query_error(&self.engine, e))?;
        if !status.is_success() {
            return Err(ApiError::query_error(&self.engine, body));
        }

        serde_json::from_str(&body).map_err(|e| ApiError::query_error(&self.engine, e))
    }
}

#[async_trait]
impl EngineAdapter for ClickHouseAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        self.post("SELECT 1".to_string(), Vec::new()).await.map(|_| ())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let (native_sql, pairs) = placeholder::clickhouse_named(sql, params)?;

        let start = Instant::now();
        let body = self.post(native_sql, pairs).await?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        for meta in body["meta"].as_array().into_iter().flatten() {
            let name = meta["name"].as_str().unwrap_or_default().to_string();
            let type_name = meta["type"].as_str().unwrap_or_default().to_string();
            column_types.insert(name.clone(), type_name);
            columns.push(name);
        }

        let mut rows = Vec::new();
        for item in body["data"].as_array().into_iter().flatten() {
            let mut map = IndexMap::with_capacity(columns.len());
            for name in &columns {
                map.insert(name.clone(), item.get(name).cloned().unwrap_or(Value::Null));
            }
            rows.push(map);
        }

        let mut metadata = HashMap::new();
        if let Some(stats) = body.get("statistics") {
            metadata.insert("statistics".to_string(), stats.clone());
        }

        Ok(AdapterResult { rows, columns, column_types, execution_ms, metadata })
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(HEALTH_TIMEOUT, self.post("SELECT 1".to_string(), Vec::new()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        // Stateless HTTP transport; nothing held open.
    }
}
