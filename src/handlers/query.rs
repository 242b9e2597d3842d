use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use validator::Validate;

use crate::models::{ExplainResult, QueryRequest, QueryResult, SqlQueryRequest, TenantContext};
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

// Execute a semantic query against a named dataset
#[utoipa::path(
    post,
    path = "/api/query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Query executed successfully", body = QueryResult),
        (status = 400, description = "Invalid request or plan failure"),
        (status = 404, description = "Dataset, dimension or measure not found"),
        (status = 504, description = "Execution deadline exceeded")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Queries"
)]
pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<QueryResult>> {
    request
        .validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let result = state.pipeline.execute(request, &ctx, None).await?;
    Ok(Json(result))
}

// Execute engine-native SQL against a dataset's source.
// The statement is validated (single SELECT, no comments) and the tenant
// predicate is injected before dispatch.
#[utoipa::path(
    post,
    path = "/api/query/sql",
    request_body = SqlQueryRequest,
    responses(
        (status = 200, description = "Statement executed successfully", body = QueryResult),
        (status = 400, description = "Rejected SQL (multi-statement, DDL/DML, comments)"),
        (status = 404, description = "Dataset not found")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Queries"
)]
pub async fn execute_sql(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(request): Json<SqlQueryRequest>,
) -> ApiResult<Json<QueryResult>> {
    request
        .validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let result = state.pipeline.execute_sql(request, &ctx, None).await?;
    Ok(Json(result))
}

// Compile a semantic query without executing it
#[utoipa::path(
    post,
    path = "/api/query/explain",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Compiled plan details", body = ExplainResult),
        (status = 400, description = "Invalid request or plan failure"),
        (status = 404, description = "Dataset, dimension or measure not found")
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Queries"
)]
pub async fn explain_query(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Json(request): Json<QueryRequest>,
) -> ApiResult<Json<ExplainResult>> {
    request
        .validate()
        .map_err(|e| ApiError::validation_error(e.to_string()))?;

    let result = state.pipeline.explain(request, &ctx).await?;
    Ok(Json(result))
}

// List dataset ids visible in the catalog
#[utoipa::path(
    get,
    path = "/api/datasets",
    responses(
        (status = 200, description = "Dataset ids", body = Vec<String>)
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Queries"
)]
pub async fn list_datasets(
    State(state): State<Arc<AppState>>,
    Extension(_ctx): Extension<TenantContext>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.catalog.list_datasets().await?))
}
