use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Databricks (and Spark SQL warehouses) over the SQL Statement Execution
/// API. Placeholders become `:p0..:pN` named parameters.
pub struct DatabricksAdapter {
    engine: String,
    statements_url: String,
    token: String,
    warehouse_id: String,
    catalog: Option<String>,
    schema: Option<String>,
    client: reqwest::Client,
}

impl DatabricksAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let host = config.require("host")?.trim_end_matches('/').to_string();
        Ok(Self {
            engine: config.engine.clone(),
            statements_url: format!("https://{host}/api/2.0/sql/statements"),
            token: config.require("token")?.to_string(),
            warehouse_id: config.require("warehouse_id")?.to_string(),
            catalog: config.get("catalog").map(str::to_string),
            schema: config.get("schema").map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    async fn submit(&self, sql: &str, params: &[Value]) -> ApiResult<Value> {
        let (native_sql, names) = placeholder::named_colon(sql);

        let parameters: Vec<Value> = names
            .iter()
            .zip(params.iter())
            .map(|(name, value)| match value {
                Value::Null => json!({ "name": name, "value": Value::Null }),
                Value::String(s) => json!({ "name": name, "value": s }),
                other => json!({ "name": name, "value": other.to_string() }),
            })
            .collect();

        let mut payload = json!({
            "statement": native_sql,
            "warehouse_id": self.warehouse_id,
            "wait_timeout": "50s",
            "format": "JSON_ARRAY",
            "disposition": "INLINE",
        });
        if !parameters.is_empty() {
            payload["parameters"] = json!(parameters);
        }
        if let Some(catalog) = &self.catalog {
            payload["catalog"] = json!(catalog);
        }
        if let Some(schema) = &self.schema {
            payload["schema"] = json!(schema);
        }

        let response = self
            .client
            .post(&self.statements_url)
            .bearer_auth(&self.token)
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

        let state = body["status"]["state"].as_str().unwrap_or_default();
        if state == "FAILED" || state == "CANCELED" || state == "CLOSED" {
            let message = body["status"]["error"]["message"]
                .as_str()
                .unwrap_or("statement failed");
            return Err(ApiError::query_error(&self.engine, message));
        }
        Ok(body)
    }
}

#[async_trait]
impl EngineAdapter for DatabricksAdapter {
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
        for col in body["manifest"]["schema"]["columns"]
            .as_array()
            .into_iter()
            .flatten()
        {
            let name = col["name"].as_str().unwrap_or_default().to_string();
            let type_name = col["type_name"].as_str().unwrap_or_default().to_string();
            column_types.insert(name.clone(), type_name);
            columns.push(name);
        }

        let mut rows = Vec::new();
        for item in body["result"]["data_array"].as_array().into_iter().flatten() {
            let cells = item.as_array().cloned().unwrap_or_default();
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                map.insert(name.clone(), cells.get(idx).cloned().unwrap_or(Value::Null));
            }
            rows.push(map);
        }

        let mut metadata = HashMap::new();
        if let Some(id) = body.get("statement_id") {
            metadata.insert("statement_id".to_string(), id.clone());
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
