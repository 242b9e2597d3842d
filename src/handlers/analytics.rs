use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::TenantContext;
use crate::services::observability::{QueryStatsRecord, StatsSummary};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
}

// Recent query records. Non-admin callers only see their own tenant.
#[utoipa::path(
    get,
    path = "/api/analytics/recent",
    params(
        ("limit" = Option<usize>, Query, description = "Max records (default 20, cap 100)")
    ),
    responses(
        (status = 200, description = "Recent query records", body = Vec<QueryStatsRecord>)
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Analytics"
)]
pub async fn recent_queries(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<TenantContext>,
    Query(params): Query<RecentParams>,
) -> Json<Vec<QueryStatsRecord>> {
    let limit = params.limit.unwrap_or(20).min(100);
    let tenant_filter = if ctx.is_admin() { None } else { Some(ctx.tenant.as_str()) };
    Json(state.stats.recent(limit, tenant_filter))
}

// Aggregate query counters since startup
#[utoipa::path(
    get,
    path = "/api/analytics/summary",
    responses(
        (status = 200, description = "Aggregate stats", body = StatsSummary)
    ),
    security(
        ("api_key" = [])
    ),
    tag = "Analytics"
)]
pub async fn summary(
    State(state): State<Arc<AppState>>,
    Extension(_ctx): Extension<TenantContext>,
) -> Json<StatsSummary> {
    Json(state.stats.summary())
}
