use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Oracle over the ORDS REST SQL endpoint.
///
/// Placeholders become `:1..:n` and the health check round-trips through
/// DUAL, as the engine expects.
pub struct OracleAdapter {
    engine: String,
    sql_url: String,
    user: String,
    password: String,
    client: reqwest::Client,
}

impl OracleAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let base = config.require("url")?.trim_end_matches('/').to_string();
        Ok(Self {
            engine: config.engine.clone(),
            sql_url: format!("{base}/_/sql"),
            user: config.require("user")?.to_string(),
            password: config.require("password")?.to_string(),
            client: reqwest::Client::new(),
        })
    }

    async fn submit(&self, sql: &str, params: &[Value]) -> ApiResult<Value> {
        let native_sql = placeholder::numbered(sql, ":");

        let binds: Vec<Value> = params
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let (data_type, rendered) = match value {
                    Value::Null => ("VARCHAR2", Value::Null),
                    Value::Bool(b) => ("NUMBER", Value::from(i64::from(*b))),
                    Value::Number(n) => ("NUMBER", Value::Number(n.clone())),
                    Value::String(s) => ("VARCHAR2", Value::String(s.clone())),
                    other => ("VARCHAR2", Value::String(other.to_string())),
                };
                json!({ "index": idx + 1, "data_type": data_type, "value": rendered })
            })
            .collect();

        let mut payload = json!({ "statementText": native_sql });
        if !binds.is_empty() {
            payload["binds"] = json!(binds);
        }

        let response = self
            .client
            .post(&self.sql_url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ApiError::query_error(&self.engine, e))?;
        if !status.is_success() {
            return Err(ApiError::query_error(&self.engine, body.to_string()));
        }

        // ORDS wraps per-statement results; surface the first statement's
        // error if it failed.
        if let Some(item) = body["items"].as_array().and_then(|items| items.first()) {
            if let Some(error) = item.get("errorDetails").and_then(Value::as_str) {
                return Err(ApiError::query_error(&self.engine, error));
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl EngineAdapter for OracleAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        self.submit("SELECT 1 FROM DUAL", &[]).await.map(|_| ())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let start = Instant::now();
        let body = self.submit(sql, params).await?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let empty = Value::Null;
        let result_set = body["items"]
            .as_array()
            .and_then(|items| items.first())
            .map(|item| &item["resultSet"])
            .unwrap_or(&empty);

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        for meta in result_set["metadata"].as_array().into_iter().flatten() {
            let name = meta["columnName"].as_str().unwrap_or_default().to_string();
            let type_name = meta["columnTypeName"].as_str().unwrap_or_default().to_string();
            column_types.insert(name.clone(), type_name);
            columns.push(name);
        }

        // Result items are objects keyed by the JSON column name
        // (lowercased); fall back to the declared name.
        let mut rows = Vec::new();
        for item in result_set["items"].as_array().into_iter().flatten() {
            let mut map = IndexMap::with_capacity(columns.len());
            for name in &columns {
                let value = item
                    .get(name)
                    .or_else(|| item.get(name.to_lowercase().as_str()))
                    .cloned()
                    .unwrap_or(Value::Null);
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }

        Ok(AdapterResult { rows, columns, column_types, execution_ms, metadata: HashMap::new() })
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(HEALTH_TIMEOUT, self.submit("SELECT 1 FROM DUAL", &[]))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        // Stateless HTTP transport; nothing held open.
    }
}
