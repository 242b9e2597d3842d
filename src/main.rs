use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use analytics_gateway::config::Config;
use analytics_gateway::models::{self, TenantContext};
use analytics_gateway::services::{
    catalog, AdapterRegistry, CacheStore, MemoryCacheStore, QueryCache, QueryPipeline,
    RecordingStatsSink, RedisCacheStore, StatsSink,
};
use analytics_gateway::{handlers, middleware, services, AppState};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::query::execute_query,
        handlers::query::execute_sql,
        handlers::query::explain_query,
        handlers::query::list_datasets,

        handlers::health::health,
        handlers::health::source_health,

        handlers::analytics::recent_queries,
        handlers::analytics::summary,
    ),
    components(
        schemas(
            models::QueryRequest,
            models::SqlQueryRequest,
            models::QueryResult,
            models::ExplainResult,
            models::ResultColumn,
            models::QueryStats,
            models::FilterCondition,
            models::FilterNode,
            models::FilterOp,
            models::OrderBy,
            models::SortDirection,
            models::IncrementalWindow,
            models::Role,
            services::QueryStatsRecord,
            services::StatsSummary,
        )
    ),
    tags(
        (name = "Queries", description = "Semantic and native query execution"),
        (name = "Health", description = "Gateway and source health"),
        (name = "Analytics", description = "Query observability"),
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "api_key",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::new("X-API-Key"),
                ),
            ),
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    let _guard;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("meridian.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _guard = guard;
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Meridian starting up");

    // Catalog and source configs are read once; editing them is the
    // catalog owner's concern.
    let (catalog, sources) =
        catalog::load_catalog_file(std::path::Path::new(&config.catalog.path))?;
    let catalog: Arc<dyn analytics_gateway::CatalogProvider> = catalog;
    let sources: Arc<dyn analytics_gateway::SourceConfigProvider> = sources;

    let adapter_registry = Arc::new(AdapterRegistry::new(sources.clone()));

    let cache_store: Option<Arc<dyn CacheStore>> = match config.cache.backend.as_str() {
        "redis" => {
            let url = config
                .cache
                .redis_url
                .as_deref()
                .expect("validated at config load");
            match RedisCacheStore::new(url) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    // The cache is an optimization; a broken backend must
                    // not block startup.
                    tracing::warn!("Redis cache unavailable, degrading: {}", e);
                    None
                }
            }
        }
        "memory" => Some(Arc::new(MemoryCacheStore::new())),
        _ => None,
    };
    let cache = Arc::new(QueryCache::new(cache_store, config.cache_settings()));

    let stats = Arc::new(RecordingStatsSink::default());
    let stats_sink: Arc<dyn StatsSink> = stats.clone();

    let pipeline = Arc::new(QueryPipeline::new(
        catalog.clone(),
        adapter_registry.clone(),
        cache.clone(),
        stats_sink,
        config.guard_limits(),
    ));

    let mut key_table = std::collections::HashMap::new();
    for entry in &config.auth.keys {
        let role = entry.role.parse().expect("validated at config load");
        let key_id = entry
            .key_id
            .clone()
            .unwrap_or_else(|| format!("key-{}", entry.tenant));
        key_table.insert(
            entry.key.clone(),
            TenantContext::new(entry.tenant.clone(), role, key_id),
        );
    }
    if key_table.is_empty() {
        tracing::warn!("No API keys configured; every query will be rejected");
    }
    let auth_state = middleware::AuthState::new(key_table);

    let app_state = Arc::new(AppState {
        catalog,
        sources,
        registry: adapter_registry.clone(),
        cache,
        stats,
        pipeline,
    });

    let public_routes = Router::new()
        .route("/api/health", get(handlers::health::health))
        .with_state(Arc::clone(&app_state));

    let protected_routes = Router::new()
        .route("/api/query", post(handlers::query::execute_query))
        .route("/api/query/sql", post(handlers::query::execute_sql))
        .route("/api/query/explain", post(handlers::query::explain_query))
        .route("/api/datasets", get(handlers::query::list_datasets))
        .route("/api/sources/:source_id/health", get(handlers::health::source_health))
        .route("/api/analytics/recent", get(handlers::analytics::recent_queries))
        .route("/api/analytics/summary", get(handlers::analytics::summary))
        .layer(axum_middleware::from_fn_with_state(
            auth_state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(Arc::clone(&app_state));

    let openapi_routes = Router::new().route(
        "/api/openapi.json",
        get(|| async { axum::Json(ApiDoc::openapi()) }),
    );

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(openapi_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Meridian listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(adapter_registry))
        .await?;

    Ok(())
}

async fn shutdown_signal(registry: Arc<AdapterRegistry>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received, closing adapters");
    registry.close_all().await;
}
