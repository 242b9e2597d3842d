use std::collections::HashMap;

use serde_json::Value;

use crate::models::{
    CompiledPlan, Dataset, ErdModel, FilterCondition, FilterNode, FilterOp, OrderClause,
    Projection, QueryRequest, SemanticModel,
};
use crate::services::rls::{self, RlsOutcome};
use crate::services::sql::{self, SqlDialect};
use crate::utils::{ApiError, ApiResult};

use super::{planner, resolver};

/// Catalog material the compiler works against for one request.
pub struct CompileInput<'a> {
    pub dataset: &'a Dataset,
    pub model: &'a SemanticModel,
    pub erd: Option<&'a ErdModel>,
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub plan: CompiledPlan,
    pub sql: String,
    pub params: Vec<Value>,
}

impl CompiledQuery {
    pub fn tables_used(&self) -> Vec<String> {
        self.plan.source_tables.clone()
    }

    pub fn join_descriptions(&self) -> Vec<String> {
        self.plan.join_steps.iter().map(|s| s.describe()).collect()
    }
}

/// Compiles a semantic query into a dialect-specific SQL statement.
///
/// Steps run in order — resolve, plan, render — and a failure carries the
/// step it happened in. The RLS outcome is merged into the filter tree
/// before the dimension-to-column rewrite, so the tenant predicate goes
/// through the same physical mapping as client filters.
pub fn compile(
    request: &QueryRequest,
    rls_outcome: &RlsOutcome,
    input: &CompileInput<'_>,
    dialect: SqlDialect,
) -> ApiResult<CompiledQuery> {
    let model = input.model;

    // Resolve: classify every requested name and collect touched tables.
    let mut tables_needed: Vec<String> = Vec::new();

    for name in &request.dimensions {
        let dim = model
            .dimension(name)
            .ok_or_else(|| ApiError::dimension_not_found(name))?;
        push_unique(&mut tables_needed, &dim.source_table);
    }

    // Metric name -> is it a calculated field (true) or a plain measure.
    let mut metric_kinds: Vec<(String, bool)> = Vec::new();
    // All measures whose expression must be built: selected ones plus those
    // referenced by selected calculated fields.
    let mut measures_to_build: Vec<String> = Vec::new();

    for name in &request.metrics {
        if let Some(measure) = model.measure(name) {
            metric_kinds.push((name.clone(), false));
            push_unique(&mut measures_to_build, name);
            if let Some(table) = &measure.source_table {
                push_unique(&mut tables_needed, table);
            }
        } else if let Some(calc) = model.calculated_field(name) {
            metric_kinds.push((name.clone(), true));
            let references = if calc.referenced_fields.is_empty() {
                resolver::extract_references(&calc.expression)
            } else {
                calc.referenced_fields.clone()
            };
            for reference in references {
                if let Some(measure) = model.measure(&reference) {
                    push_unique(&mut measures_to_build, &reference);
                    if let Some(table) = &measure.source_table {
                        push_unique(&mut tables_needed, table);
                    }
                } else if let Some(dim) = model.dimension(&reference) {
                    push_unique(&mut tables_needed, &dim.source_table);
                }
            }
        } else {
            return Err(ApiError::measure_not_found(name));
        }
    }

    if request.dimensions.is_empty() && request.metrics.is_empty() {
        return Err(ApiError::plan_error(
            "resolve",
            "Query selects no dimensions and no metrics",
        ));
    }

    if tables_needed.is_empty() {
        push_unique(&mut tables_needed, &input.dataset.base_table);
    }

    // Single-table plans keep bare column references; joins force
    // table-qualified ones.
    let qualify = tables_needed.len() > 1;

    // Plan: anchor choice and join order are deterministic.
    let (source_tables, join_steps) = planner::plan_joins(
        &tables_needed,
        input.erd,
        input.dataset.allow_cross_joins,
    )?;

    // Render the SELECT list.
    let mut measure_expressions: HashMap<String, String> = HashMap::new();
    for name in &measures_to_build {
        let measure = model
            .measure(name)
            .ok_or_else(|| ApiError::measure_not_found(name))?;
        measure_expressions.insert(
            name.clone(),
            resolver::measure_expression(measure, dialect, qualify)?,
        );
    }

    let mut projections = Vec::new();
    let mut group_by = Vec::new();
    for name in &request.dimensions {
        let dim = model.dimension(name).expect("dimension resolved above");
        let expression = resolver::dimension_expression(dim, dialect, qualify);
        group_by.push(expression.clone());
        projections.push(Projection { alias: name.clone(), expression, aggregated: false });
    }

    for (name, is_calculated) in &metric_kinds {
        let expression = if *is_calculated {
            let calc = model.calculated_field(name).expect("calculated field resolved above");
            resolver::expand_calculated_field(
                calc,
                model,
                &measure_expressions,
                dialect,
                qualify,
                &mut Vec::new(),
            )?
        } else {
            measure_expressions
                .get(name)
                .cloned()
                .expect("measure expression built above")
        };
        projections.push(Projection { alias: name.clone(), expression, aggregated: true });
    }

    let has_aggregates = projections.iter().any(|p| p.aggregated);
    if !has_aggregates {
        group_by.clear();
    }

    // Filters: client tree AND rls predicate AND incremental window, then
    // the dimension-to-physical rewrite over the whole merged tree.
    let mut merged = rls::merge_filters(request.filters.clone(), rls_outcome);
    if let Some(window) = &request.incremental_window {
        let window_cond = FilterNode::Condition(FilterCondition {
            field: window.column.clone(),
            op: FilterOp::Between,
            value: None,
            values: None,
            from: Some(window.from.clone()),
            to: Some(window.to.clone()),
        });
        merged = FilterNode::merge_and(merged, Some(window_cond));
    }
    let where_tree = merged
        .map(|tree| rewrite_filter_fields(tree, input, qualify))
        .transpose()?;

    // Order by: projected aliases as-is, dimensions rewritten to columns.
    let mut order_by = Vec::new();
    for entry in &request.order_by {
        let expression = if projections.iter().any(|p| p.alias == entry.field) {
            dialect.quote(&entry.field)
        } else if let Some(dim) = model.dimension(&entry.field) {
            resolver::dimension_expression(dim, dialect, qualify)
        } else {
            return Err(ApiError::validation_error(format!(
                "orderBy references unknown field '{}'",
                entry.field
            )));
        };
        order_by.push(OrderClause { expression, direction: entry.direction });
    }

    let plan = CompiledPlan {
        projections,
        source_tables,
        join_steps,
        where_tree,
        group_by,
        order_by,
        limit: request.limit,
        offset: request.offset.filter(|o| *o > 0),
    };

    let (sql_text, params) = sql::build(&plan, dialect)?;

    Ok(CompiledQuery { plan, sql: sql_text, params })
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Rewrites semantic field names inside a filter tree to physical column
/// references, so the client never addresses physical columns directly.
fn rewrite_filter_fields(
    node: FilterNode,
    input: &CompileInput<'_>,
    qualify: bool,
) -> ApiResult<FilterNode> {
    match node {
        FilterNode::And { and } => Ok(FilterNode::And {
            and: and
                .into_iter()
                .map(|n| rewrite_filter_fields(n, input, qualify))
                .collect::<ApiResult<Vec<_>>>()?,
        }),
        FilterNode::Or { or } => Ok(FilterNode::Or {
            or: or
                .into_iter()
                .map(|n| rewrite_filter_fields(n, input, qualify))
                .collect::<ApiResult<Vec<_>>>()?,
        }),
        FilterNode::Not { not } => Ok(FilterNode::Not {
            not: Box::new(rewrite_filter_fields(*not, input, qualify)?),
        }),
        FilterNode::Condition(mut cond) => {
            cond.field = resolve_filter_field(&cond.field, input, qualify)?;
            Ok(FilterNode::Condition(cond))
        }
    }
}

fn resolve_filter_field(
    name: &str,
    input: &CompileInput<'_>,
    qualify: bool,
) -> ApiResult<String> {
    if let Some(dim) = input.model.dimension(name) {
        return Ok(if qualify {
            format!("{}.{}", dim.source_table, dim.source_column)
        } else {
            dim.source_column.clone()
        });
    }
    // Dataset fields not surfaced as model dimensions (e.g. the RLS column
    // on measure-only models) still resolve against the base table.
    if let Some(field) = input.dataset.field(name) {
        return Ok(if qualify {
            format!("{}.{}", input.dataset.base_table, field.physical_column)
        } else {
            field.physical_column.clone()
        });
    }
    Err(ApiError::dimension_not_found(name))
}
