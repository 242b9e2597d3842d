use serde_json::json;

use crate::models::{
    Dataset, FilterNode, FilterOp, QueryStats, RlsMode, RlsPolicy, TenantContext,
};
use crate::utils::{ApiError, ApiResult};

/// Outcome of RLS evaluation for one (dataset, caller) pair.
///
/// The predicate is produced before any client filter is touched and merged
/// under an outer AND by the compiler; no code path may drop it once
/// produced.
#[derive(Debug, Clone)]
pub struct RlsOutcome {
    pub applied: bool,
    pub predicate: Option<FilterNode>,
    pub column: Option<String>,
    pub bypassed: bool,
    pub reason: String,
}

impl RlsOutcome {
    fn not_applied(reason: impl Into<String>) -> Self {
        Self {
            applied: false,
            predicate: None,
            column: None,
            bypassed: false,
            reason: reason.into(),
        }
    }

    /// Copies the decision into the response stats for audit verification.
    pub fn stamp(&self, stats: &mut QueryStats) {
        stats.rls_applied = self.applied;
        stats.rls_bypassed = self.bypassed;
        stats.rls_column = self.column.clone();
        stats.rls_reason = Some(self.reason.clone());
    }
}

fn validate_policy(dataset: &Dataset, policy: &RlsPolicy) -> ApiResult<String> {
    let column = policy.column.clone().ok_or_else(|| {
        ApiError::config_error(format!(
            "Dataset '{}' enables RLS but specifies no column",
            dataset.id
        ))
    })?;

    if !dataset.has_field(&column) {
        return Err(ApiError::config_error(format!(
            "RLS column '{}' not found in dataset '{}' fields",
            column, dataset.id
        )));
    }

    Ok(column)
}

/// Derives the mandatory tenant predicate for a dataset.
///
/// A misconfigured policy fails the request with a config error — RLS is
/// never skipped silently. Admin bypass is a per-dataset setting, not a
/// caller privilege.
pub fn evaluate(dataset: &Dataset, ctx: &TenantContext) -> ApiResult<RlsOutcome> {
    let policy = &dataset.rls;

    if !policy.enabled {
        return Ok(RlsOutcome::not_applied("RLS not enabled for dataset"));
    }

    let column = validate_policy(dataset, policy)?;

    if policy.allow_admin_bypass && ctx.is_admin() {
        return Ok(RlsOutcome {
            applied: false,
            predicate: None,
            column: Some(column),
            bypassed: true,
            reason: "Admin bypass - caller has admin role".to_string(),
        });
    }

    // in_list is evaluated as equals until value-list sources land.
    let predicate = match policy.mode {
        RlsMode::Equals | RlsMode::InList => {
            FilterNode::condition(column.clone(), FilterOp::Eq, json!(ctx.tenant))
        }
    };

    Ok(RlsOutcome {
        applied: true,
        predicate: Some(predicate),
        column: Some(column.clone()),
        bypassed: false,
        reason: format!("RLS filter: {} = {}", column, ctx.tenant),
    })
}

/// Merges the tenant predicate with client filters as
/// `(client filters) AND (rls predicate)`.
pub fn merge_filters(client: Option<FilterNode>, outcome: &RlsOutcome) -> Option<FilterNode> {
    match &outcome.predicate {
        Some(predicate) if outcome.applied => {
            FilterNode::merge_and(client, Some(predicate.clone()))
        }
        _ => client,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AggregationType, DatasetField, FieldKind, FieldType, Role,
    };

    fn dataset_with_rls(enabled: bool, column: &str, allow_admin_bypass: bool) -> Dataset {
        Dataset {
            id: "orders".to_string(),
            source_id: "warehouse".to_string(),
            engine: "postgres".to_string(),
            base_table: "orders".to_string(),
            fields: vec![
                DatasetField {
                    name: "tenant_id".to_string(),
                    physical_column: "tenant_id".to_string(),
                    kind: FieldKind::Dimension,
                    field_type: FieldType::String,
                    aggregation: None,
                    expression: None,
                },
                DatasetField {
                    name: "total_revenue".to_string(),
                    physical_column: "amount".to_string(),
                    kind: FieldKind::Measure,
                    field_type: FieldType::Float,
                    aggregation: Some(AggregationType::Sum),
                    expression: Some("amount".to_string()),
                },
            ],
            rls: RlsPolicy {
                enabled,
                column: Some(column.to_string()),
                mode: RlsMode::Equals,
                allow_admin_bypass,
            },
            cache_ttl_secs: None,
            query_timeout_secs: None,
            default_limit: None,
            allow_cross_joins: false,
        }
    }

    fn user_ctx() -> TenantContext {
        TenantContext::new("tenant_a", Role::User, "key-1")
    }

    #[test]
    fn test_disabled_rls_produces_no_predicate() {
        let mut dataset = dataset_with_rls(false, "tenant_id", false);
        dataset.rls.enabled = false;
        let outcome = evaluate(&dataset, &user_ctx()).expect("evaluation failed");
        assert!(!outcome.applied);
        assert!(!outcome.bypassed);
        assert!(outcome.predicate.is_none());
    }

    #[test]
    fn test_missing_column_is_config_error() {
        let dataset = dataset_with_rls(true, "no_such_column", false);
        let err = evaluate(&dataset, &user_ctx()).expect_err("expected config error");
        assert_eq!(err.code(), "ERR_CONFIG");
    }

    #[test]
    fn test_admin_bypass_requires_dataset_opt_in() {
        let admin = TenantContext::new("tenant_a", Role::Admin, "key-admin");

        let strict = dataset_with_rls(true, "tenant_id", false);
        let outcome = evaluate(&strict, &admin).expect("evaluation failed");
        assert!(outcome.applied);
        assert!(!outcome.bypassed);

        let lenient = dataset_with_rls(true, "tenant_id", true);
        let outcome = evaluate(&lenient, &admin).expect("evaluation failed");
        assert!(!outcome.applied);
        assert!(outcome.bypassed);
    }

    #[test]
    fn test_predicate_targets_tenant() {
        let dataset = dataset_with_rls(true, "tenant_id", true);
        let outcome = evaluate(&dataset, &user_ctx()).expect("evaluation failed");
        assert!(outcome.applied);
        match outcome.predicate.as_ref().expect("predicate missing") {
            FilterNode::Condition(cond) => {
                assert_eq!(cond.field, "tenant_id");
                assert_eq!(cond.op, FilterOp::Eq);
                assert_eq!(cond.value, Some(json!("tenant_a")));
            }
            other => panic!("Expected condition, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_wraps_client_filters_under_and() {
        let dataset = dataset_with_rls(true, "tenant_id", false);
        let outcome = evaluate(&dataset, &user_ctx()).expect("evaluation failed");
        let client = FilterNode::condition("city", FilterOp::Eq, json!("Pune"));
        let merged = merge_filters(Some(client), &outcome).expect("merge dropped filters");
        match merged {
            FilterNode::And { and } => assert_eq!(and.len(), 2),
            other => panic!("Expected AND merge, got {other:?}"),
        }
    }
}
