use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;

use crate::models::{
    Dataset, ExplainResult, FilterNode, QueryRequest, QueryResult, QueryStats, ResultColumn,
    SemanticModel, SqlQueryRequest, TenantContext,
};
use crate::services::adapters::AdapterRegistry;
use crate::services::cache::{self, QueryCache};
use crate::services::catalog::CatalogProvider;
use crate::services::observability::{QueryStatsRecord, StatsSink};
use crate::services::rls;
use crate::services::semantic::{self, CompileInput};
use crate::services::sql::{self as sql_builder, SqlDialect};
use crate::utils::{ApiError, ApiResult, ErrorKind};

/// Request guard limits. Boundary rate limiting happens outside the core;
/// these catch clients that slipped through or asked for too much.
#[derive(Debug, Clone)]
pub struct GuardLimits {
    pub max_dimensions: usize,
    pub max_metrics: usize,
    pub max_filter_depth: usize,
    pub max_rows: u64,
    pub global_timeout: Duration,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_dimensions: 20,
            max_metrics: 50,
            max_filter_depth: 10,
            max_rows: 100_000,
            global_timeout: Duration::from_secs(30),
        }
    }
}

/// The request pipeline: guards, dataset resolve, RLS, compile, cache
/// lookup, adapter dispatch, stats emit.
pub struct QueryPipeline {
    catalog: Arc<dyn CatalogProvider>,
    registry: Arc<AdapterRegistry>,
    cache: Arc<QueryCache>,
    stats: Arc<dyn StatsSink>,
    guards: GuardLimits,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<dyn CatalogProvider>,
        registry: Arc<AdapterRegistry>,
        cache: Arc<QueryCache>,
        stats: Arc<dyn StatsSink>,
        guards: GuardLimits,
    ) -> Self {
        Self { catalog, registry, cache, stats, guards }
    }

    /// Runs a semantic query end to end. `deadline` is the caller-supplied
    /// budget; the effective execution timeout is the minimum of it, the
    /// dataset timeout, and the global ceiling.
    pub async fn execute(
        &self,
        request: QueryRequest,
        ctx: &TenantContext,
        deadline: Option<Duration>,
    ) -> ApiResult<QueryResult> {
        let started = Instant::now();
        let dataset_id = request.dataset.clone();
        let outcome = self.run_semantic(request, ctx, deadline).await;
        self.emit(ctx, &dataset_id, &outcome, started.elapsed());
        outcome
    }

    async fn run_semantic(
        &self,
        mut request: QueryRequest,
        ctx: &TenantContext,
        deadline: Option<Duration>,
    ) -> ApiResult<QueryResult> {
        self.apply_guards(&request)?;

        let dataset = self.catalog.get_dataset(&request.dataset).await?;
        if request.limit.is_none() {
            request.limit = dataset.default_limit;
        }

        let rls_outcome = rls::evaluate(&dataset, ctx)?;

        let model = match self.catalog.get_semantic_model(&dataset.id).await? {
            Some(model) => model,
            None => SemanticModel::from_dataset(&dataset),
        };
        let erd = self.catalog.get_erd(&dataset.id).await?;
        let dialect = SqlDialect::from_engine(&dataset.engine);

        let compiled = semantic::compile(
            &request,
            &rls_outcome,
            &CompileInput { dataset: &dataset, model: &model, erd: erd.as_ref() },
            dialect,
        )?;

        let fingerprint = cache::fingerprint(ctx, &request, &dataset);
        let mut stats = QueryStats::new(ctx);
        rls_outcome.stamp(&mut stats);

        self.dispatch_cached(
            &dataset,
            compiled.sql,
            compiled.params,
            fingerprint,
            stats,
            request.no_cache,
            deadline,
        )
        .await
    }

    /// Engine-native SQL path. RLS still applies: the statement is parsed,
    /// the tenant predicate is ANDed in at the AST level, and only then
    /// does anything reach an adapter.
    pub async fn execute_sql(
        &self,
        request: SqlQueryRequest,
        ctx: &TenantContext,
        deadline: Option<Duration>,
    ) -> ApiResult<QueryResult> {
        let started = Instant::now();
        let dataset_id = request.dataset.clone();
        let outcome = self.run_sql(request, ctx, deadline).await;
        self.emit(ctx, &dataset_id, &outcome, started.elapsed());
        outcome
    }

    async fn run_sql(
        &self,
        request: SqlQueryRequest,
        ctx: &TenantContext,
        deadline: Option<Duration>,
    ) -> ApiResult<QueryResult> {
        let dataset = self.catalog.get_dataset(&request.dataset).await?;
        let dialect = SqlDialect::from_engine(&dataset.engine);

        sql_builder::validate(&request.sql, dialect)?;

        let rls_outcome = rls::evaluate(&dataset, ctx)?;
        let (final_sql, params) = match &rls_outcome.predicate {
            Some(predicate) if rls_outcome.applied => {
                let physical = physical_predicate(predicate, &dataset)?;
                sql_builder::apply_rls(&request.sql, &physical, dialect)?
            }
            _ => (request.sql.clone(), Vec::new()),
        };

        let fingerprint = cache::fingerprint::fingerprint_sql(ctx, &final_sql, &dataset);
        let mut stats = QueryStats::new(ctx);
        rls_outcome.stamp(&mut stats);

        self.dispatch_cached(
            &dataset,
            final_sql,
            params,
            fingerprint,
            stats,
            request.no_cache,
            deadline,
        )
        .await
    }

    /// Compiles without executing: the SQL, parameters, join order and
    /// fingerprint a request would run with.
    pub async fn explain(
        &self,
        mut request: QueryRequest,
        ctx: &TenantContext,
    ) -> ApiResult<ExplainResult> {
        self.apply_guards(&request)?;

        let dataset = self.catalog.get_dataset(&request.dataset).await?;
        if request.limit.is_none() {
            request.limit = dataset.default_limit;
        }

        let rls_outcome = rls::evaluate(&dataset, ctx)?;
        let model = match self.catalog.get_semantic_model(&dataset.id).await? {
            Some(model) => model,
            None => SemanticModel::from_dataset(&dataset),
        };
        let erd = self.catalog.get_erd(&dataset.id).await?;
        let dialect = SqlDialect::from_engine(&dataset.engine);

        let compiled = semantic::compile(
            &request,
            &rls_outcome,
            &CompileInput { dataset: &dataset, model: &model, erd: erd.as_ref() },
            dialect,
        )?;

        let mut stats = QueryStats::new(ctx);
        rls_outcome.stamp(&mut stats);

        Ok(ExplainResult {
            tables_used: compiled.tables_used(),
            join_steps: compiled.join_descriptions(),
            sql: compiled.sql,
            params: compiled.params,
            fingerprint: cache::fingerprint(ctx, &request, &dataset),
            stats,
        })
    }

    fn apply_guards(&self, request: &QueryRequest) -> ApiResult<()> {
        let guards = &self.guards;
        if request.dimensions.len() > guards.max_dimensions {
            return Err(ApiError::validation_error(format!(
                "Too many dimensions: {} > {}",
                request.dimensions.len(),
                guards.max_dimensions
            )));
        }
        if request.metrics.len() > guards.max_metrics {
            return Err(ApiError::validation_error(format!(
                "Too many metrics: {} > {}",
                request.metrics.len(),
                guards.max_metrics
            )));
        }
        if let Some(filters) = &request.filters {
            let depth = filters.depth();
            if depth > guards.max_filter_depth {
                return Err(ApiError::validation_error(format!(
                    "Filter tree too deep: {} > {}",
                    depth, guards.max_filter_depth
                )));
            }
        }
        if let Some(limit) = request.limit {
            if limit > guards.max_rows {
                return Err(ApiError::validation_error(format!(
                    "Requested limit {} exceeds the row ceiling {}",
                    limit, guards.max_rows
                ))
                .with_hint("Lower the limit or paginate with offset"));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_cached(
        &self,
        dataset: &Dataset,
        sql: String,
        params: Vec<Value>,
        fingerprint: String,
        stats: QueryStats,
        no_cache: bool,
        deadline: Option<Duration>,
    ) -> ApiResult<QueryResult> {
        let ttl = dataset
            .cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.cache.settings().default_ttl);
        let timeout = self.effective_timeout(dataset, deadline);

        let registry = self.registry.clone();
        let dataset_clone = dataset.clone();
        let key = fingerprint.clone();

        let (mut result, cache_hit) = self
            .cache
            .get_or_execute(&fingerprint, ttl, no_cache, move || async move {
                dispatch(registry, dataset_clone, sql, params, key, stats, timeout).await
            })
            .await?;

        result.cache_hit = cache_hit;
        Ok(result)
    }

    fn effective_timeout(&self, dataset: &Dataset, deadline: Option<Duration>) -> Duration {
        let mut timeout = self.guards.global_timeout;
        if let Some(dataset_timeout) = dataset.query_timeout_secs.map(Duration::from_secs) {
            timeout = timeout.min(dataset_timeout);
        }
        if let Some(deadline) = deadline {
            timeout = timeout.min(deadline);
        }
        timeout
    }

    fn emit(
        &self,
        ctx: &TenantContext,
        dataset_id: &str,
        outcome: &ApiResult<QueryResult>,
        elapsed: Duration,
    ) {
        let record = match outcome {
            Ok(result) => QueryStatsRecord {
                request_id: uuid::Uuid::new_v4().to_string(),
                fingerprint_prefix: result.fingerprint.chars().take(12).collect(),
                tenant: ctx.tenant.clone(),
                dataset: dataset_id.to_string(),
                engine: result.engine.clone(),
                rows: result.row_count,
                duration_ms: elapsed.as_millis() as u64,
                cache_hit: result.cache_hit,
                rls_applied: result.stats.rls_applied,
                rls_bypassed: result.stats.rls_bypassed,
                success: true,
                error_code: None,
                timestamp: Utc::now(),
            },
            Err(err) => QueryStatsRecord {
                request_id: err.request_id.clone(),
                fingerprint_prefix: String::new(),
                tenant: ctx.tenant.clone(),
                dataset: dataset_id.to_string(),
                engine: String::new(),
                rows: 0,
                duration_ms: elapsed.as_millis() as u64,
                cache_hit: false,
                rls_applied: false,
                rls_bypassed: false,
                success: false,
                error_code: Some(err.code().to_string()),
                timestamp: Utc::now(),
            },
        };
        self.stats.emit(record);
    }
}

/// Rewrites the RLS predicate's field name to its physical column for the
/// native-SQL path, where the statement addresses physical tables.
fn physical_predicate(predicate: &FilterNode, dataset: &Dataset) -> ApiResult<FilterNode> {
    match predicate {
        FilterNode::Condition(cond) => {
            let field = dataset.field(&cond.field).ok_or_else(|| {
                ApiError::config_error(format!(
                    "RLS column '{}' not found in dataset '{}' fields",
                    cond.field, dataset.id
                ))
            })?;
            let mut rewritten = cond.clone();
            rewritten.field = field.physical_column.clone();
            Ok(FilterNode::Condition(rewritten))
        }
        other => Ok(other.clone()),
    }
}

/// One adapter dispatch under a deadline. Dropping the execute future on
/// timeout propagates cancellation into the driver; a flagged connection
/// error evicts the adapter so the next request reconstructs it.
async fn dispatch(
    registry: Arc<AdapterRegistry>,
    dataset: Dataset,
    sql: String,
    params: Vec<Value>,
    fingerprint: String,
    stats: QueryStats,
    timeout: Duration,
) -> ApiResult<QueryResult> {
    let adapter = registry.get(&dataset.source_id).await?;

    tracing::debug!(
        dataset = %dataset.id,
        engine = %dataset.engine,
        "dispatching: {}",
        sql
    );

    let adapter_result = match tokio::time::timeout(timeout, adapter.execute(&sql, &params)).await
    {
        Ok(Ok(result)) => result,
        Ok(Err(err)) => {
            if err.kind == ErrorKind::Connection {
                registry.evict(&dataset.source_id).await;
            }
            return Err(err);
        }
        Err(_) => {
            return Err(ApiError::timeout(format!(
                "Query exceeded the {}s execution deadline",
                timeout.as_secs()
            )))
        }
    };

    let columns = adapter_result
        .columns
        .iter()
        .map(|name| ResultColumn {
            name: name.clone(),
            column_type: adapter_result
                .column_types
                .get(name)
                .cloned()
                .unwrap_or_default(),
        })
        .collect();

    Ok(QueryResult {
        columns,
        row_count: adapter_result.rows.len(),
        rows: adapter_result.rows,
        execution_ms: adapter_result.execution_ms,
        cache_hit: false,
        engine: dataset.engine.clone(),
        fingerprint,
        stats,
    })
}
