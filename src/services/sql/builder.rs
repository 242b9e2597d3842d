use serde_json::Value;

use crate::models::{CompiledPlan, FilterCondition, FilterNode, FilterOp};
use crate::utils::{ApiError, ApiResult};

use super::SqlDialect;

/// Renders a compiled plan to a single SQL statement plus a positional
/// parameter vector. Placeholders are always the canonical `?`; the adapter
/// layer rewrites them to the engine-native form.
pub fn build(plan: &CompiledPlan, dialect: SqlDialect) -> ApiResult<(String, Vec<Value>)> {
    if plan.projections.is_empty() {
        return Err(ApiError::build_error("Plan has no projections"));
    }
    let anchor = plan
        .anchor()
        .ok_or_else(|| ApiError::build_error("Plan has no source tables"))?;

    let mut params = Vec::new();
    let mut sql = String::from("SELECT ");

    let select_list: Vec<String> = plan
        .projections
        .iter()
        .map(|p| {
            let alias = dialect.quote(&p.alias);
            // A bare column that already matches its alias needs no AS.
            if p.expression == alias {
                p.expression.clone()
            } else {
                format!("{} AS {}", p.expression, alias)
            }
        })
        .collect();
    sql.push_str(&select_list.join(", "));

    sql.push_str(&format!(" FROM {anchor}"));
    for step in &plan.join_steps {
        sql.push_str(&format!(
            " {} {} ON {} = {}",
            step.join_type.sql(),
            step.table,
            dialect.quote_qualified(&step.left),
            dialect.quote_qualified(&step.right),
        ));
    }

    if let Some(tree) = &plan.where_tree {
        let (where_sql, where_params) = render_filter(tree, dialect)?;
        if !where_sql.is_empty() {
            sql.push_str(&format!(" WHERE {where_sql}"));
            params.extend(where_params);
        }
    }

    if !plan.group_by.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", plan.group_by.join(", ")));
    }

    if !plan.order_by.is_empty() {
        let order_list: Vec<String> = plan
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.expression, o.direction.sql()))
            .collect();
        sql.push_str(&format!(" ORDER BY {}", order_list.join(", ")));
    }

    sql.push_str(&render_limit_offset(plan.limit, plan.offset, dialect));

    Ok((sql, params))
}

fn render_limit_offset(limit: Option<u64>, offset: Option<u64>, dialect: SqlDialect) -> String {
    match dialect {
        // OFFSET ... FETCH form; requires an ORDER BY on SQL Server, which
        // the caller is expected to supply for paginated queries.
        SqlDialect::MsSql | SqlDialect::Oracle => match (limit, offset) {
            (Some(limit), offset) => format!(
                " OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                offset.unwrap_or(0),
                limit
            ),
            (None, Some(offset)) => format!(" OFFSET {offset} ROWS"),
            (None, None) => String::new(),
        },
        _ => {
            let mut clause = String::new();
            if let Some(limit) = limit {
                clause.push_str(&format!(" LIMIT {limit}"));
            }
            if let Some(offset) = offset {
                if offset > 0 {
                    clause.push_str(&format!(" OFFSET {offset}"));
                }
            }
            clause
        }
    }
}

/// Renders a filter tree to a WHERE fragment with `?` placeholders.
///
/// Boolean combinators nest arbitrarily; each child is parenthesized so the
/// emitted precedence matches the tree shape exactly.
pub fn render_filter(node: &FilterNode, dialect: SqlDialect) -> ApiResult<(String, Vec<Value>)> {
    match node {
        FilterNode::And { and } => render_children(and, " AND ", dialect),
        FilterNode::Or { or } => render_children(or, " OR ", dialect),
        FilterNode::Not { not } => {
            let (inner, params) = render_filter(not, dialect)?;
            if inner.is_empty() {
                return Ok((String::new(), params));
            }
            Ok((format!("NOT ({inner})"), params))
        }
        FilterNode::Condition(cond) => render_condition(cond, dialect),
    }
}

fn render_children(
    children: &[FilterNode],
    joiner: &str,
    dialect: SqlDialect,
) -> ApiResult<(String, Vec<Value>)> {
    let mut parts = Vec::new();
    let mut params = Vec::new();
    for child in children {
        let (sql, child_params) = render_filter(child, dialect)?;
        if !sql.is_empty() {
            parts.push(format!("({sql})"));
            params.extend(child_params);
        }
    }
    Ok((parts.join(joiner), params))
}

fn render_condition(cond: &FilterCondition, dialect: SqlDialect) -> ApiResult<(String, Vec<Value>)> {
    let field = dialect.quote_qualified(&cond.field);
    let value = || cond.value.clone().unwrap_or(Value::Null);

    let like_param = |pattern: String| -> Value {
        Value::String(pattern)
    };

    let text_of = |v: &Value| -> String {
        match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    };

    match cond.op {
        FilterOp::Eq => Ok((format!("{field} = ?"), vec![value()])),
        FilterOp::Ne => Ok((format!("{field} <> ?"), vec![value()])),
        FilterOp::Gt => Ok((format!("{field} > ?"), vec![value()])),
        FilterOp::Gte => Ok((format!("{field} >= ?"), vec![value()])),
        FilterOp::Lt => Ok((format!("{field} < ?"), vec![value()])),
        FilterOp::Lte => Ok((format!("{field} <= ?"), vec![value()])),
        FilterOp::Between => {
            let (from, to) = match (&cond.from, &cond.to) {
                (Some(from), Some(to)) => (from.clone(), to.clone()),
                _ => {
                    return Err(ApiError::build_error(format!(
                        "Filter on '{}' uses 'between' without both bounds",
                        cond.field
                    )))
                }
            };
            Ok((format!("{field} BETWEEN ? AND ?"), vec![from, to]))
        }
        FilterOp::In | FilterOp::NotIn => {
            let values = cond.values.clone().unwrap_or_else(|| {
                cond.value.clone().map(|v| vec![v]).unwrap_or_default()
            });
            let keyword = if cond.op == FilterOp::In { "IN" } else { "NOT IN" };
            if values.is_empty() {
                // Empty list matches nothing; NULL membership is never true.
                return Ok((format!("{field} {keyword} (NULL)"), Vec::new()));
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            Ok((format!("{field} {keyword} ({placeholders})"), values))
        }
        FilterOp::Contains => Ok((
            format!("{field} LIKE ?"),
            vec![like_param(format!("%{}%", text_of(&value())))],
        )),
        FilterOp::StartsWith => Ok((
            format!("{field} LIKE ?"),
            vec![like_param(format!("{}%", text_of(&value())))],
        )),
        FilterOp::EndsWith => Ok((
            format!("{field} LIKE ?"),
            vec![like_param(format!("%{}", text_of(&value())))],
        )),
        FilterOp::IsNull => Ok((format!("{field} IS NULL"), Vec::new())),
        FilterOp::IsNotNull => Ok((format!("{field} IS NOT NULL"), Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_operators_render_placeholders() {
        let cond = FilterNode::condition("city", FilterOp::Eq, json!("Pune"));
        let (sql, params) = render_filter(&cond, SqlDialect::Postgres).expect("render failed");
        assert_eq!(sql, "\"city\" = ?");
        assert_eq!(params, vec![json!("Pune")]);
    }

    #[test]
    fn test_in_list_renders_one_placeholder_per_value() {
        let node: FilterNode = serde_json::from_value(json!({
            "field": "city", "op": "in", "values": ["X", "Y", "Z"]
        }))
        .expect("parse failed");
        let (sql, params) = render_filter(&node, SqlDialect::Postgres).expect("render failed");
        assert_eq!(sql, "\"city\" IN (?, ?, ?)");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_like_operators_wrap_pattern() {
        let node = FilterNode::condition("name", FilterOp::Contains, json!("acme"));
        let (sql, params) = render_filter(&node, SqlDialect::Postgres).expect("render failed");
        assert_eq!(sql, "\"name\" LIKE ?");
        assert_eq!(params, vec![json!("%acme%")]);

        let node = FilterNode::condition("name", FilterOp::StartsWith, json!("ac"));
        let (_, params) = render_filter(&node, SqlDialect::Postgres).expect("render failed");
        assert_eq!(params, vec![json!("ac%")]);
    }

    #[test]
    fn test_nested_tree_parenthesizes_children() {
        let node: FilterNode = serde_json::from_value(json!({
            "or": [
                {"field": "a", "op": "eq", "value": 1},
                {"and": [
                    {"field": "b", "op": "gt", "value": 2},
                    {"not": {"field": "c", "op": "is_null"}}
                ]}
            ]
        }))
        .expect("parse failed");
        let (sql, params) = render_filter(&node, SqlDialect::Postgres).expect("render failed");
        assert_eq!(
            sql,
            "(\"a\" = ?) OR ((\"b\" > ?) AND (NOT (\"c\" IS NULL)))"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_between_requires_bounds() {
        let node: FilterNode = serde_json::from_value(json!({
            "field": "order_date", "op": "between", "from": "2024-01-01"
        }))
        .expect("parse failed");
        let err = render_filter(&node, SqlDialect::Postgres).expect_err("expected build error");
        assert_eq!(err.code(), "ERR_BUILD");
    }

    #[test]
    fn test_qualified_field_quotes_column_only() {
        let node = FilterNode::condition("orders.tenant_id", FilterOp::Eq, json!("a"));
        let (sql, _) = render_filter(&node, SqlDialect::Postgres).expect("render failed");
        assert_eq!(sql, "orders.\"tenant_id\" = ?");
    }
}
