use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use crate::utils::{ApiError, ApiResult};

use super::{placeholder, AdapterResult, EngineAdapter, SourceConfig, HEALTH_TIMEOUT};

/// Trino/Presto over the REST statement protocol.
///
/// Parameter support is uneven across connectors, so simple values are
/// inlined (quote-doubled strings, NULL, uppercase booleans); anything
/// structured is rejected by the rewriter. Result pages are followed via
/// `nextUri` until the server is done.
pub struct TrinoAdapter {
    engine: String,
    statement_url: String,
    user: String,
    catalog: Option<String>,
    schema: Option<String>,
    client: reqwest::Client,
}

impl TrinoAdapter {
    pub fn new(config: &SourceConfig) -> ApiResult<Self> {
        let host = config.require("host")?;
        let port = config.get("port").unwrap_or("8080");
        let scheme = if config.get("ssl") == Some("true") { "https" } else { "http" };
        Ok(Self {
            engine: config.engine.clone(),
            statement_url: format!("{scheme}://{host}:{port}/v1/statement"),
            user: config.get("user").unwrap_or("gateway").to_string(),
            catalog: config.get("catalog").map(str::to_string),
            schema: config.get("schema").map(str::to_string),
            client: reqwest::Client::new(),
        })
    }

    fn header_name(&self, suffix: &str) -> String {
        // Presto deployments expect X-Presto-* headers.
        if self.engine.to_lowercase().starts_with("presto") {
            format!("X-Presto-{suffix}")
        } else {
            format!("X-Trino-{suffix}")
        }
    }

    async fn run(&self, sql: String) -> ApiResult<(Vec<String>, HashMap<String, String>, Vec<Vec<Value>>)> {
        let user_header = self.header_name("User");
        let mut request = self
            .client
            .post(&self.statement_url)
            .header(user_header.as_str(), &self.user)
            .body(sql);
        if let Some(catalog) = &self.catalog {
            request = request.header(self.header_name("Catalog").as_str(), catalog);
        }
        if let Some(schema) = &self.schema {
            request = request.header(self.header_name("Schema").as_str(), schema);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::connection_error(&self.engine, e))?;
        let mut page: Value = response
            .json()
            .await
            .map_err(|e| ApiError::query_error(&self.engine, e))?;

        let mut columns = Vec::new();
        let mut column_types = HashMap::new();
        let mut data: Vec<Vec<Value>> = Vec::new();

        loop {
            if let Some(error) = page.get("error") {
                let message = error["message"].as_str().unwrap_or("query failed");
                return Err(ApiError::query_error(&self.engine, message));
            }

            if columns.is_empty() {
                for col in page["columns"].as_array().into_iter().flatten() {
                    let name = col["name"].as_str().unwrap_or_default().to_string();
                    let type_name = col["type"].as_str().unwrap_or_default().to_string();
                    column_types.insert(name.clone(), type_name);
                    columns.push(name);
                }
            }

            for row in page["data"].as_array().into_iter().flatten() {
                data.push(row.as_array().cloned().unwrap_or_default());
            }

            let Some(next_uri) = page["nextUri"].as_str().map(str::to_string) else {
                break;
            };
            page = self
                .client
                .get(&next_uri)
                .header(user_header.as_str(), &self.user)
                .send()
                .await
                .map_err(|e| ApiError::connection_error(&self.engine, e))?
                .json()
                .await
                .map_err(|e| ApiError::query_error(&self.engine, e))?;
        }

        Ok((columns, column_types, data))
    }
}

#[async_trait]
impl EngineAdapter for TrinoAdapter {
    fn engine(&self) -> &str {
        &self.engine
    }

    async fn connect(&self) -> ApiResult<()> {
        self.run("SELECT 1".to_string()).await.map(|_| ())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<AdapterResult> {
        let inlined = placeholder::inline(sql, params)?;

        let start = Instant::now();
        let (columns, column_types, data) = self.run(inlined).await?;
        let execution_ms = start.elapsed().as_millis() as u64;

        let rows = data
            .into_iter()
            .map(|cells| {
                let mut map = IndexMap::with_capacity(columns.len());
                for (idx, name) in columns.iter().enumerate() {
                    map.insert(name.clone(), cells.get(idx).cloned().unwrap_or(Value::Null));
                }
                map
            })
            .collect();

        Ok(AdapterResult { rows, columns, column_types, execution_ms, metadata: HashMap::new() })
    }

    async fn health_check(&self) -> bool {
        tokio::time::timeout(HEALTH_TIMEOUT, self.run("SELECT 1".to_string()))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    async fn close(&self) {
        // Stateless HTTP transport; nothing held open.
    }
}
