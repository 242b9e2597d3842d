// Catalog file loading: datasets, sources, and startup validation.

use std::path::PathBuf;

use crate::services::catalog::{load_catalog_file, CatalogProvider, SourceConfigProvider};

const CATALOG: &str = r#"
[[datasets]]
id = "orders"
sourceId = "warehouse"
engine = "postgres"
baseTable = "orders"

[[datasets.fields]]
name = "city"
physicalColumn = "city"
kind = "dimension"
type = "string"

[[datasets.fields]]
name = "tenant_id"
physicalColumn = "tenant_id"
kind = "dimension"
type = "string"

[[datasets.fields]]
name = "total_revenue"
physicalColumn = "amount"
kind = "measure"
type = "float"
aggregation = "SUM"
expression = "amount"

[datasets.rls]
enabled = true
column = "tenant_id"
mode = "equals"
allowAdminBypass = true

[[sources]]
id = "warehouse"
engine = "postgres"

[sources.settings]
host = "localhost"
port = "5432"
user = "meridian"
password = "secret"
database = "analytics"
"#;

fn write_catalog(content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("meridian-catalog-{}.toml", uuid::Uuid::new_v4()));
    std::fs::write(&path, content).expect("Failed to write catalog fixture");
    path
}

#[tokio::test]
async fn test_catalog_file_loads_datasets_and_sources() {
    let path = write_catalog(CATALOG);
    let (catalog, sources) = load_catalog_file(&path).expect("catalog load failed");

    let dataset = catalog.get_dataset("orders").await.expect("dataset missing");
    assert_eq!(dataset.source_id, "warehouse");
    assert_eq!(dataset.engine, "postgres");
    assert_eq!(dataset.fields.len(), 3);
    assert!(dataset.rls.enabled);
    assert!(dataset.rls.allow_admin_bypass);
    assert_eq!(dataset.rls.column.as_deref(), Some("tenant_id"));

    let source = sources.get_source("warehouse").await.expect("source missing");
    assert_eq!(source.engine, "postgres");
    assert_eq!(source.get("host"), Some("localhost"));
    assert_eq!(source.get("database"), Some("analytics"));

    assert_eq!(catalog.list_datasets().await.expect("list failed"), vec!["orders"]);

    let _ = std::fs::remove_file(path);
}

#[tokio::test]
async fn test_rls_on_undeclared_column_fails_startup() {
    let broken = CATALOG.replace("column = \"tenant_id\"", "column = \"org_id\"");
    let path = write_catalog(&broken);

    let err = load_catalog_file(&path).expect_err("invalid RLS column should fail");
    assert!(err.to_string().contains("org_id"));

    let _ = std::fs::remove_file(path);
}
