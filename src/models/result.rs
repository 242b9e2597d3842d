use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::{Role, TenantContext};

/// A result column with its engine-native type name passed through.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ResultColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// RLS decision copied into every response for external audit verification.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryStats {
    pub tenant: String,
    pub role: Role,
    pub rls_applied: bool,
    pub rls_bypassed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rls_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rls_reason: Option<String>,
}

impl QueryStats {
    pub fn new(ctx: &TenantContext) -> Self {
        Self {
            tenant: ctx.tenant.clone(),
            role: ctx.role,
            rls_applied: false,
            rls_bypassed: false,
            rls_column: None,
            rls_reason: None,
        }
    }
}

/// Materialized tabular result returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
    /// Rows as insertion-order-preserving column -> value maps.
    #[schema(value_type = Vec<Object>)]
    pub rows: Vec<IndexMap<String, Value>>,
    pub row_count: usize,
    pub execution_ms: u64,
    pub cache_hit: bool,
    pub engine: String,
    /// Full hex fingerprint of the resolved logical query.
    pub fingerprint: String,
    pub stats: QueryStats,
}

/// Compile-only response for the explain endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResult {
    pub sql: String,
    #[schema(value_type = Vec<Object>)]
    pub params: Vec<Value>,
    pub tables_used: Vec<String>,
    pub join_steps: Vec<String>,
    pub fingerprint: String,
    pub stats: QueryStats,
}
