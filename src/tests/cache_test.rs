// Cache behavior: hits, noCache bypass, graceful degradation.

use std::sync::Arc;

use serde_json::json;

use crate::services::cache::MemoryCacheStore;
use crate::tests::common::{
    basic_request, build_gateway, orders_dataset, user_ctx, FailingStore, FakeAdapter,
};

fn request() -> crate::models::QueryRequest {
    basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }))
}

#[tokio::test]
async fn test_second_request_is_a_cache_hit() {
    let store = Arc::new(MemoryCacheStore::new());
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(store),
    );
    let ctx = user_ctx("tenant_a");

    let first = gateway
        .pipeline
        .execute(request(), &ctx, None)
        .await
        .expect("query failed");
    assert!(!first.cache_hit);

    let second = gateway
        .pipeline
        .execute(request(), &ctx, None)
        .await
        .expect("query failed");
    assert!(second.cache_hit);
    assert_eq!(second.rows, first.rows);
    assert_eq!(second.fingerprint, first.fingerprint);

    assert_eq!(gateway.adapter.call_count(), 1);
}

#[tokio::test]
async fn test_no_cache_bypasses_lookup_and_store() {
    let store = Arc::new(MemoryCacheStore::new());
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(store.clone()),
    );
    let ctx = user_ctx("tenant_a");

    let no_cache = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
        "noCache": true,
    }));

    for _ in 0..3 {
        let result = gateway
            .pipeline
            .execute(no_cache.clone(), &ctx, None)
            .await
            .expect("query failed");
        assert!(!result.cache_hit);
    }

    assert_eq!(gateway.adapter.call_count(), 3);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_unreachable_store_degrades_to_direct_execution() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(Arc::new(FailingStore)),
    );
    let ctx = user_ctx("tenant_a");

    // Both requests succeed exactly as if the cache were empty.
    let first = gateway
        .pipeline
        .execute(request(), &ctx, None)
        .await
        .expect("query failed");
    let second = gateway
        .pipeline
        .execute(request(), &ctx, None)
        .await
        .expect("query failed");

    assert!(!first.cache_hit);
    assert!(!second.cache_hit);
    assert_eq!(first.rows, second.rows);
    assert_eq!(gateway.adapter.call_count(), 2);
}

#[tokio::test]
async fn test_tenants_never_share_cache_entries() {
    let store = Arc::new(MemoryCacheStore::new());
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(store),
    );

    let a = gateway
        .pipeline
        .execute(request(), &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");
    // Same logical query from another tenant must not see A's entry.
    let b = gateway
        .pipeline
        .execute(request(), &user_ctx("tenant_b"), None)
        .await
        .expect("query failed");

    assert_ne!(a.fingerprint, b.fingerprint);
    assert!(!b.cache_hit);
    assert_eq!(gateway.adapter.call_count(), 2);

    let params = gateway.adapter.last_params.lock().await.clone();
    assert_eq!(params, vec![json!("tenant_b")]);
}

#[tokio::test]
async fn test_oversized_results_are_not_stored() {
    let mut settings = crate::services::CacheSettings::default();
    settings.value_max_bytes = 16;

    let store = Arc::new(MemoryCacheStore::new());
    let gateway = crate::tests::common::build_gateway_with_settings(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(store.clone()),
        settings,
    );
    let ctx = user_ctx("tenant_a");

    for _ in 0..2 {
        let result = gateway
            .pipeline
            .execute(request(), &ctx, None)
            .await
            .expect("query failed");
        assert!(!result.cache_hit);
    }

    assert!(store.is_empty());
    assert_eq!(gateway.adapter.call_count(), 2);
}

#[tokio::test]
async fn test_failed_execution_is_not_cached() {
    struct FailingAdapter;

    #[async_trait::async_trait]
    impl crate::services::EngineAdapter for FailingAdapter {
        fn engine(&self) -> &str {
            "postgres"
        }
        async fn connect(&self) -> crate::ApiResult<()> {
            Ok(())
        }
        async fn execute(
            &self,
            _sql: &str,
            _params: &[serde_json::Value],
        ) -> crate::ApiResult<crate::services::AdapterResult> {
            Err(crate::ApiError::query_error("postgres", "relation does not exist"))
        }
        async fn health_check(&self) -> bool {
            false
        }
        async fn close(&self) {}
    }

    let store = Arc::new(MemoryCacheStore::new());
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        Some(store.clone()),
    );
    // A second pipeline over the same catalog and store, with the failing
    // adapter behind the same source id.
    let registry = Arc::new(crate::services::AdapterRegistry::new(Arc::new(
        crate::services::MemorySources::new(),
    )));
    registry.insert("warehouse", Arc::new(FailingAdapter));
    let pipeline = Arc::new(crate::services::QueryPipeline::new(
        gateway.catalog.clone(),
        registry,
        Arc::new(crate::services::QueryCache::new(
            Some(store.clone()),
            crate::services::CacheSettings::default(),
        )),
        gateway.stats.clone(),
        crate::services::GuardLimits::default(),
    ));

    let err = pipeline
        .execute(request(), &user_ctx("tenant_a"), None)
        .await
        .expect_err("execution should fail");
    assert_eq!(err.code(), "ERR_QUERY");
    assert!(!err.message.contains("relation"), "raw engine text must be wrapped");

    // Only the short-lived error sentinel may exist; no result entry.
    let entries = store.len();
    assert!(entries <= 1);
}
