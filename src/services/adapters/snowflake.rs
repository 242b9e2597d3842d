use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::utils::{ApiError, ApiResult};

use super::{AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Snowflake over the SQL API v2.
///
/// The API takes `?` positional placeholders natively; bindings travel as a
/// `"1".."n"` keyed map. Warehouse, role, database and schema come from the
/// source config.
pub struct SnowflakeAdapter {
    engine: String,
    statements_url: String,
    token: String,
    warehouse: Option<String>,
    role: Option<String>,
    database: Option<String>,
    schema: Option<String>,
    client: reqwest::Client,
}

impl SnowflakeAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        // Account identifiers use the <org>-<account> form on the API host.
        let account = config.require("account")?.replace('.', "-");
        Ok(Self {
            engine: config.engine.clone(),
            statements_url: format!(
                "https://{account}.snowflakecomputing.com/api/v2/statements"
            ),
            token: config.require("token")?.to_string(),
            warehouse: config.get("warehouse").map(str::to_string),
            role: config.get("role").map(str::to_string),
            database: config.get("database").map(str::to_string),
            schema: config.get("schema").map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    fn binding_type(value: &Value) -> &'static str {
        match value {
            Value::Bool(_) => "BOOLEAN",
            Value::Number(n) if n.is_f64() => "REAL",
            Value::Number(_) => "FIXED",
            _ => "TEXT",
        }
    }

    async fn submit(&self, sql: &str, params: &[Value]) -> ApiResult<Value> {
        let mut bindings = serde_json::Map::new();
        for (idx, param) in params.iter().enumerate() {
            let rendered = match param {
                Value::String(s) => Value::String(s.clone()),
                Value::Null => Value::Null,
                other => Value::String(other.to_string()),
            };
            bindings.insert(
                (idx + 1).to_string(),
                json!({ "type": Self::binding_type(param), "value": rendered }),
            );
        }

        let mut payload = json!({
            "statement": sql,
            "timeout": 60,
        });
        if !bindings.is_empty() {
            payload["bindings"] = Value::Object(bindings);
        }
        if let Some(warehouse) = &self.warehouse {
            payload["warehouse"] = json!(warehouse);
        }
        if let Some(role) = &self.role {
            payload["role"] = json!(role);
        }
        if let Some(database) = &self.database {
            payload["database"] = json!(database);
        }
        if let Some(schema) = &self.schema {
            payload["schema"] = json!(schema);
        }

        let response = self
            .client
            .post(&self.statements_url)
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", "OAUTH")
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
            let message = body["message"].as_str().unwrap_or("statement failed");
            return Err(ApiError::query_error(&self.engine, message));
        }
        Ok(body)
    }
}

#[async_trait]
impl EngineAdapter for SnowflakeAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        self.submit("SELECT 1", &[]).await.map(|_| ())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let start = Instant::now();
        let body = self.submit(sql, params).await?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        for col in body["resultSetMetaData"]["rowType"]
            .as_array()
            .into_iter()
            .flatten()
        {
            let name = col["name"].as_str().unwrap_or_default().to_string();
            let type_name = col["type"].as_str().unwrap_or_default().to_string();
            column_types.insert(name.clone(), type_name);
            columns.push(name);
        }

        // Data arrives as an array of string arrays in column order.
        let mut rows = Vec::new();
        for item in body["data"].as_array().into_iter().flatten() {
            let cells = item.as_array().cloned().unwrap_or_default();
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), cells.get(idx).cloned().unwrap_or(Value::Null));
            }
            rows.push(map);
        }

        let mut metadata = HashMap::new();
        if let Some(handle) = body.get("statementHandle") {
            metadata.insert("statementHandle".to_string(), handle.clone());
        }

        Ok(AdapterResult { rows, columns, column_types, execution_ms, metadata })
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(HEALTH_TIMEOUT, self.submit("SELECT 1", &[]))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        // Stateless HTTP transport; nothing held open.
    }
}
