// End-to-end pipeline scenarios over the in-memory collaborators.

use serde_json::json;

use crate::tests::common::{
    admin_ctx, basic_request, build_gateway, orders_dataset, user_ctx, FakeAdapter,
};

#[tokio::test]
async fn test_basic_aggregation_shapes_sql_and_params() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let result = gateway
        .pipeline
        .execute(request, &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    assert_eq!(
        sql,
        "SELECT \"city\", SUM(\"amount\") AS \"total_revenue\" FROM orders \
         WHERE \"tenant_id\" = ? GROUP BY \"city\""
    );
    assert_eq!(*gateway.adapter.last_params.lock().await, vec![json!("tenant_a")]);

    assert!(result.stats.rls_applied);
    assert!(!result.stats.rls_bypassed);
    assert_eq!(result.row_count, 1);
    assert_eq!(result.engine, "postgres");
    assert_eq!(result.fingerprint.len(), 64);
}

#[tokio::test]
async fn test_admin_bypass_removes_predicate_and_flags_stats() {
    let gateway = build_gateway(
        vec![orders_dataset(true)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let result = gateway
        .pipeline
        .execute(request, &admin_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    assert!(!sql.contains("tenant_id"));
    assert!(gateway.adapter.last_params.lock().await.is_empty());

    assert!(!result.stats.rls_applied);
    assert!(result.stats.rls_bypassed);
}

#[tokio::test]
async fn test_admin_does_not_bypass_without_dataset_opt_in() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let result = gateway
        .pipeline
        .execute(request, &admin_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    assert!(sql.contains("tenant_id"));
    assert!(result.stats.rls_applied);
    assert!(!result.stats.rls_bypassed);
}

#[tokio::test]
async fn test_filter_tree_limit_and_rls_compose() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
        "filters": { "and": [
            {"field": "city", "op": "in", "values": ["X", "Y"]},
            {"field": "order_date", "op": "between", "from": "2024-01-01", "to": "2024-01-31"}
        ]},
        "limit": 10,
    }));

    gateway
        .pipeline
        .execute(request, &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    assert!(sql.contains("\"city\" IN (?, ?)"));
    assert!(sql.contains("\"order_date\" BETWEEN ? AND ?"));
    assert!(sql.contains("\"tenant_id\" = ?"));
    assert!(sql.ends_with("LIMIT 10"));

    let params = gateway.adapter.last_params.lock().await.clone();
    assert_eq!(
        params,
        vec![
            json!("X"),
            json!("Y"),
            json!("2024-01-01"),
            json!("2024-01-31"),
            json!("tenant_a"),
        ]
    );
}

#[tokio::test]
async fn test_guards_reject_oversized_requests() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );
    let ctx = user_ctx("tenant_a");

    let too_many_dims = basic_request(json!({
        "dataset": "orders",
        "dimensions": (0..25).map(|i| format!("d{i}")).collect::<Vec<_>>(),
        "metrics": ["total_revenue"],
    }));
    let err = gateway
        .pipeline
        .execute(too_many_dims, &ctx, None)
        .await
        .expect_err("dimension guard should trip");
    assert_eq!(err.code(), "ERR_VALIDATION");

    let oversized_limit = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
        "limit": 1_000_001,
    }));
    let err = gateway
        .pipeline
        .execute(oversized_limit, &ctx, None)
        .await
        .expect_err("row ceiling should trip");
    assert_eq!(err.code(), "ERR_VALIDATION");

    // Guard failures never reach the adapter.
    assert_eq!(gateway.adapter.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_dataset_and_fields_fail_precisely() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );
    let ctx = user_ctx("tenant_a");

    let missing_dataset = basic_request(json!({
        "dataset": "unknown",
        "dimensions": ["city"],
    }));
    let err = gateway
        .pipeline
        .execute(missing_dataset, &ctx, None)
        .await
        .expect_err("unknown dataset should fail");
    assert_eq!(err.code(), "ERR_DATASET_NOT_FOUND");

    let missing_dimension = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["cty"],
        "metrics": ["total_revenue"],
    }));
    let err = gateway
        .pipeline
        .execute(missing_dimension, &ctx, None)
        .await
        .expect_err("unknown dimension should fail");
    assert_eq!(err.code(), "ERR_DIMENSION_NOT_FOUND");

    let missing_measure = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["revenues"],
    }));
    let err = gateway
        .pipeline
        .execute(missing_measure, &ctx, None)
        .await
        .expect_err("unknown measure should fail");
    assert_eq!(err.code(), "ERR_MEASURE_NOT_FOUND");

    assert_eq!(gateway.adapter.call_count(), 0);
}

#[tokio::test]
async fn test_order_by_alias_and_dimension_rewrite() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
        "orderBy": [
            {"field": "total_revenue", "direction": "desc"},
            {"field": "order_date"}
        ],
    }));

    gateway
        .pipeline
        .execute(request, &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    // Projected metric by alias, unprojected dimension by physical column.
    assert!(sql.contains("ORDER BY \"total_revenue\" DESC, \"order_date\" ASC"));
}

#[tokio::test]
async fn test_incremental_window_joins_the_where_tree() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
        "incrementalWindow": {
            "column": "order_date",
            "from": "2024-02-01",
            "to": "2024-02-29"
        },
    }));

    let plain = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let windowed = gateway
        .pipeline
        .execute(request, &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");

    let sql = gateway
        .adapter
        .last_sql
        .lock()
        .await
        .clone()
        .expect("adapter saw no SQL");
    assert!(sql.contains("\"order_date\" BETWEEN ? AND ?"));

    let params = gateway.adapter.last_params.lock().await.clone();
    assert_eq!(
        params,
        vec![json!("tenant_a"), json!("2024-02-01"), json!("2024-02-29")]
    );

    // The window participates in the fingerprint.
    let baseline = gateway
        .pipeline
        .execute(plain, &user_ctx("tenant_a"), None)
        .await
        .expect("query failed");
    assert_ne!(windowed.fingerprint, baseline.fingerprint);
}

#[tokio::test]
async fn test_connection_error_evicts_the_adapter() {
    struct DeadAdapter;

    #[async_trait::async_trait]
    impl crate::services::EngineAdapter for DeadAdapter {
        fn engine(&self) -> &str {
            "postgres"
        }
        async fn connect(&self) -> crate::ApiResult<()> {
            Err(crate::ApiError::connection_error("postgres", "refused"))
        }
        async fn execute(
            &self,
            _sql: &str,
            _params: &[serde_json::Value],
        ) -> crate::ApiResult<crate::services::AdapterResult> {
            Err(crate::ApiError::connection_error("postgres", "refused"))
        }
        async fn health_check(&self) -> bool {
            false
        }
        async fn close(&self) {}
    }

    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );
    // Replace the pipeline's adapter with one that always refuses.
    let registry = std::sync::Arc::new(crate::services::AdapterRegistry::new(
        std::sync::Arc::new(crate::services::MemorySources::new()),
    ));
    registry.insert("warehouse", std::sync::Arc::new(DeadAdapter));
    let pipeline = crate::services::QueryPipeline::new(
        gateway.catalog.clone(),
        registry.clone(),
        std::sync::Arc::new(crate::services::QueryCache::new(
            None,
            crate::services::CacheSettings::default(),
        )),
        gateway.stats.clone(),
        crate::services::GuardLimits::default(),
    );
    let ctx = user_ctx("tenant_a");

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let err = pipeline
        .execute(request.clone(), &ctx, None)
        .await
        .expect_err("dead adapter should fail");
    assert_eq!(err.code(), "ERR_CONNECTION");

    // The flagged adapter was evicted; reconstruction needs a source
    // config, which the empty provider cannot supply.
    assert_eq!(registry.count(), 0);
    let err = pipeline
        .execute(request, &ctx, None)
        .await
        .expect_err("reconstruction should fail without a source config");
    assert_eq!(err.code(), "ERR_CONFIG");
}

#[tokio::test]
async fn test_stats_are_emitted_once_per_request() {
    let gateway = build_gateway(
        vec![orders_dataset(false)],
        FakeAdapter::new("postgres"),
        None,
    );
    let ctx = user_ctx("tenant_a");

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));
    gateway
        .pipeline
        .execute(request, &ctx, None)
        .await
        .expect("query failed");

    let bad = basic_request(json!({ "dataset": "nope", "dimensions": ["city"] }));
    let _ = gateway.pipeline.execute(bad, &ctx, None).await;

    let summary = gateway.stats.summary();
    assert_eq!(summary.total_queries, 2);
    assert_eq!(summary.total_errors, 1);

    let records = gateway.stats.recent(10, None);
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| !r.success));
}
