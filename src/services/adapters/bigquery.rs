use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// BigQuery over the REST `jobs.query` endpoint.
///
/// Placeholders become `@p0..@pN` named parameters; parameter types are
/// inferred from the values because the API requires explicit typing.
pub struct BigQueryAdapter {
    engine: String,
    query_url: String,
    access_token: String,
    location: Option<String>,
    client: reqwest::Client,
}

impl BigQueryAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let project = config.require("project")?;
        Ok(Self {
            engine: config.engine.clone(),
            query_url: format!(
                "https://bigquery.googleapis.com/bigquery/v2/projects/{project}/queries"
            ),
            access_token: config.require("access_token")?.to_string(),
            location: config.get("location").map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    fn bq_type(value: &Value) -> &'static str {
        match value {
            Value::Bool(_) => "BOOL",
            Value::Number(n) if n.is_f64() => "FLOAT64",
            Value::Number(_) => "INT64",
            // NULL defaults to STRING; dates and datetimes travel as strings.
            _ => "STRING",
        }
    }

    async fn submit(&self, sql: &str, params: &[Value]) -> ApiResult<Value> {
        let (native_sql, names) = placeholder::named_at(sql);

        let query_parameters: Vec<Value> = names
            .iter()
            .zip(params.iter())
            .map(|(name, value)| {
                let rendered = match value {
                    Value::Null => Value::Null,
                    Value::String(s) => Value::String(s.clone()),
                    other => Value::String(other.to_string()),
                };
                json!({
                    "name": name,
                    "parameterType": { "type": Self::bq_type(value) },
                    "parameterValue": { "value": rendered },
                })
            })
            .collect();

        let mut payload = json!({
            "query": native_sql,
            "useLegacySql": false,
        });
        if !query_parameters.is_empty() {
            payload["parameterMode"] = json!("NAMED");
            payload["queryParameters"] = json!(query_parameters);
        }
        if let Some(location) = &self.location {
            payload["location"] = json!(location);
        }

        let response = self
            .client
            .post(&self.query_url)
            .bearer_auth(&self.access_token)
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
            let message = body["error"]["message"].as_str().unwrap_or("query failed");
            return Err(ApiError::query_error(&self.engine, message));
        }
        Ok(body)
    }
}

#[async_trait]
impl EngineAdapter for BigQueryAdapter {
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
        for field in body["schema"]["fields"].as_array().into_iter().flatten() {
            let name = field["name"].as_str().unwrap_or_default().to_string();
            let type_name = field["type"].as_str().unwrap_or_default().to_string();
            column_types.insert(name.clone(), type_name);
            columns.push(name);
        }

        // Rows come in the f/v envelope: {"f": [{"v": ...}, ...]}.
        let mut rows = Vec::new();
        for item in body["rows"].as_array().into_iter().flatten() {
            let cells = item["f"].as_array().cloned().unwrap_or_default();
            let mut map = IndexMap::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = cells
                    .get(idx)
                    .map(|c| c["v"].clone())
                    .unwrap_or(Value::Null);
                map.insert(name.clone(), value);
            }
            rows.push(map);
        }

        let mut metadata = HashMap::new();
        if let Some(job) = body.get("jobReference") {
            metadata.insert("jobReference".to_string(), job.clone());
        }
        if let Some(total) = body.get("totalBytesProcessed") {
            metadata.insert("totalBytesProcessed".to_string(), total.clone());
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
