use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::models::{Dataset, FilterNode, QueryRequest, TenantContext};

/// Computes the cache key for a resolved query: SHA-256 over the canonical
/// JSON of the fingerprint inputs.
///
/// Tenant and role are part of the inputs, so tenants never share entries
/// and admin-bypass results are cached apart. Dimensions are sorted when
/// the query aggregates (GROUP BY makes their order irrelevant); orderBy
/// stays order-sensitive; AND/OR operands are sorted by child hash so
/// logically-equivalent trees key identically.
pub fn fingerprint(ctx: &TenantContext, request: &QueryRequest, dataset: &Dataset) -> String {
    let grouped = !request.metrics.is_empty();
    let mut dimensions = request.dimensions.clone();
    if grouped {
        dimensions.sort();
    }

    // serde_json maps are sorted by key, which makes the rendered object
    // canonical without extra work.
    let mut inputs = Map::new();
    inputs.insert("tenant".to_string(), json!(ctx.tenant));
    inputs.insert("role".to_string(), json!(ctx.role));
    inputs.insert("dataset".to_string(), json!(dataset.id));
    inputs.insert("sourceId".to_string(), json!(dataset.source_id));
    inputs.insert("engine".to_string(), json!(dataset.engine));
    inputs.insert("dimensions".to_string(), json!(dimensions));
    inputs.insert("metrics".to_string(), json!(request.metrics));
    inputs.insert(
        "filters".to_string(),
        request
            .filters
            .as_ref()
            .map(canonical_filter)
            .unwrap_or(Value::Null),
    );
    inputs.insert(
        "orderBy".to_string(),
        Value::Array(
            request
                .order_by
                .iter()
                .map(|o| json!({ "field": o.field, "direction": o.direction }))
                .collect(),
        ),
    );
    inputs.insert("limit".to_string(), json!(request.limit));
    inputs.insert("offset".to_string(), json!(request.offset));
    inputs.insert(
        "incrementalWindow".to_string(),
        request
            .incremental_window
            .as_ref()
            .map(|w| json!({ "column": w.column, "from": w.from, "to": w.to }))
            .unwrap_or(Value::Null),
    );

    let serialized =
        serde_json::to_string(&Value::Object(inputs)).expect("fingerprint inputs serialize");
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)
}

/// Cache key for the native-SQL path: the statement text replaces the
/// structured query fields, identity and dataset binding stay in.
pub fn fingerprint_sql(ctx: &TenantContext, sql: &str, dataset: &Dataset) -> String {
    let mut inputs = Map::new();
    inputs.insert("tenant".to_string(), json!(ctx.tenant));
    inputs.insert("role".to_string(), json!(ctx.role));
    inputs.insert("dataset".to_string(), json!(dataset.id));
    inputs.insert("sourceId".to_string(), json!(dataset.source_id));
    inputs.insert("engine".to_string(), json!(dataset.engine));
    inputs.insert("sql".to_string(), json!(sql));

    let serialized =
        serde_json::to_string(&Value::Object(inputs)).expect("fingerprint inputs serialize");
    hex::encode(Sha256::digest(serialized.as_bytes()))
}

/// Renders a filter tree deterministically: AND/OR children are sorted by
/// their canonical hash, NOT and leaf conditions keep their shape.
pub fn canonical_filter(node: &FilterNode) -> Value {
    match node {
        FilterNode::And { and } => json!({ "and": sorted_children(and) }),
        FilterNode::Or { or } => json!({ "or": sorted_children(or) }),
        FilterNode::Not { not } => json!({ "not": canonical_filter(not) }),
        FilterNode::Condition(cond) => json!({
            "field": cond.field,
            "op": cond.op,
            "value": cond.value,
            "values": cond.values,
            "from": cond.from,
            "to": cond.to,
        }),
    }
}

fn sorted_children(children: &[FilterNode]) -> Vec<Value> {
    let mut rendered: Vec<(String, Value)> = children
        .iter()
        .map(|child| {
            let canonical = canonical_filter(child);
            let hash = hex::encode(Sha256::digest(canonical.to_string().as_bytes()));
            (hash, canonical)
        })
        .collect();
    rendered.sort_by(|a, b| a.0.cmp(&b.0));
    rendered.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use serde_json::json;

    fn dataset() -> Dataset {
        serde_json::from_value(json!({
            "id": "orders",
            "sourceId": "warehouse",
            "engine": "postgres",
            "baseTable": "orders",
            "fields": [],
        }))
        .expect("dataset fixture")
    }

    fn request(raw: Value) -> QueryRequest {
        serde_json::from_value(raw).expect("request fixture")
    }

    fn ctx(tenant: &str) -> TenantContext {
        TenantContext::new(tenant, Role::User, "key-1")
    }

    #[test]
    fn test_tenants_never_share_keys() {
        let req = request(json!({ "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"] }));
        let a = fingerprint(&ctx("tenant_a"), &req, &dataset());
        let b = fingerprint(&ctx("tenant_b"), &req, &dataset());
        assert_ne!(a, b);
    }

    #[test]
    fn test_role_is_part_of_the_key() {
        let req = request(json!({ "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"] }));
        let user = fingerprint(&ctx("tenant_a"), &req, &dataset());
        let admin = fingerprint(
            &TenantContext::new("tenant_a", Role::Admin, "key-1"),
            &req,
            &dataset(),
        );
        assert_ne!(user, admin);
    }

    #[test]
    fn test_dimension_order_is_insensitive_when_grouped() {
        let a = request(json!({ "dataset": "orders", "dimensions": ["city", "region"], "metrics": ["total_revenue"] }));
        let b = request(json!({ "dataset": "orders", "dimensions": ["region", "city"], "metrics": ["total_revenue"] }));
        assert_eq!(
            fingerprint(&ctx("t"), &a, &dataset()),
            fingerprint(&ctx("t"), &b, &dataset())
        );
    }

    #[test]
    fn test_and_operand_order_is_insensitive() {
        let a = request(json!({
            "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"],
            "filters": { "and": [
                {"field": "city", "op": "eq", "value": "Pune"},
                {"field": "region", "op": "eq", "value": "west"}
            ]}
        }));
        let b = request(json!({
            "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"],
            "filters": { "and": [
                {"field": "region", "op": "eq", "value": "west"},
                {"field": "city", "op": "eq", "value": "Pune"}
            ]}
        }));
        assert_eq!(
            fingerprint(&ctx("t"), &a, &dataset()),
            fingerprint(&ctx("t"), &b, &dataset())
        );
    }

    #[test]
    fn test_order_by_stays_order_sensitive() {
        let a = request(json!({
            "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"],
            "orderBy": [{"field": "city"}, {"field": "total_revenue", "direction": "desc"}]
        }));
        let b = request(json!({
            "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"],
            "orderBy": [{"field": "total_revenue", "direction": "desc"}, {"field": "city"}]
        }));
        assert_ne!(
            fingerprint(&ctx("t"), &a, &dataset()),
            fingerprint(&ctx("t"), &b, &dataset())
        );
    }

    #[test]
    fn test_fingerprint_is_stable_across_runs() {
        let req = request(json!({ "dataset": "orders", "dimensions": ["city"], "metrics": ["total_revenue"], "limit": 10 }));
        let first = fingerprint(&ctx("t"), &req, &dataset());
        for _ in 0..5 {
            assert_eq!(first, fingerprint(&ctx("t"), &req, &dataset()));
        }
        assert_eq!(first.len(), 64);
    }
}
