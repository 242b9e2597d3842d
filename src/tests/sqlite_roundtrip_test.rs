// Tenant isolation against a real engine: the SQLite adapter executes the
// compiled SQL and the tenant predicate actually filters rows.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::services::adapters::{EngineAdapter, SourceConfig, SqliteAdapter};
use crate::services::catalog::{MemoryCatalog, MemorySources};
use crate::services::observability::RecordingStatsSink;
use crate::services::pipeline::{GuardLimits, QueryPipeline};
use crate::services::{AdapterRegistry, CacheSettings, QueryCache};
use crate::tests::common::{basic_request, orders_dataset, user_ctx};

async fn seeded_sqlite() -> Arc<SqliteAdapter> {
    let path = std::env::temp_dir().join(format!("meridian-test-{}.db", uuid::Uuid::new_v4()));
    let mut settings = HashMap::new();
    settings.insert(
        "url".to_string(),
        format!("sqlite://{}?mode=rwc", path.display()),
    );
    let adapter = Arc::new(SqliteAdapter::new(&SourceConfig {
        engine: "sqlite".to_string(),
        settings,
    }));

    adapter
        .execute(
            "CREATE TABLE orders (city TEXT, order_date TEXT, tenant_id TEXT, amount REAL)",
            &[],
        )
        .await
        .expect("create table failed");

    for (city, date, tenant, amount) in [
        ("Pune", "2024-01-05", "tenant_a", 100.5),
        ("Pune", "2024-01-06", "tenant_a", 50.0),
        ("Mumbai", "2024-01-07", "tenant_b", 999.0),
    ] {
        adapter
            .execute(
                "INSERT INTO orders (city, order_date, tenant_id, amount) VALUES (?, ?, ?, ?)",
                &[json!(city), json!(date), json!(tenant), json!(amount)],
            )
            .await
            .expect("insert failed");
    }

    adapter
}

#[tokio::test]
async fn test_rows_of_other_tenants_never_appear() {
    let adapter = seeded_sqlite().await;

    let mut dataset = orders_dataset(false);
    dataset.engine = "sqlite".to_string();
    dataset.source_id = "local".to_string();

    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert_dataset(dataset);

    let registry = Arc::new(AdapterRegistry::new(Arc::new(MemorySources::new())));
    registry.insert("local", adapter.clone());

    let pipeline = QueryPipeline::new(
        catalog,
        registry,
        Arc::new(QueryCache::new(None, CacheSettings::default())),
        Arc::new(RecordingStatsSink::default()),
        GuardLimits::default(),
    );

    let request = basic_request(json!({
        "dataset": "orders",
        "dimensions": ["city"],
        "metrics": ["total_revenue"],
    }));

    let result_a = pipeline
        .execute(request.clone(), &user_ctx("tenant_a"), None)
        .await
        .expect("tenant_a query failed");
    assert_eq!(result_a.row_count, 1);
    let row = &result_a.rows[0];
    assert_eq!(row["city"], json!("Pune"));
    assert_eq!(row["total_revenue"], json!(150.5));
    assert!(!result_a
        .rows
        .iter()
        .any(|r| r.values().any(|v| v == &json!("Mumbai"))));

    let result_b = pipeline
        .execute(request, &user_ctx("tenant_b"), None)
        .await
        .expect("tenant_b query failed");
    assert_eq!(result_b.row_count, 1);
    assert_eq!(result_b.rows[0]["city"], json!("Mumbai"));
    assert_eq!(result_b.rows[0]["total_revenue"], json!(999.0));

    adapter.close().await;
    // Idempotent close.
    adapter.close().await;
}
