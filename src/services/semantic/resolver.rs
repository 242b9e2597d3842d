use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AggregationType, CalculatedField, Dimension, Measure, SemanticModel};
use crate::services::sql::SqlDialect;
use crate::utils::{ApiError, ApiResult};

/// SQL functions allowed inside measure and calculated-field bodies.
const ALLOWED_FUNCTIONS: &[&str] = &[
    // Aggregation
    "SUM", "COUNT", "AVG", "MIN", "MAX", "MEDIAN", "STDDEV", "VARIANCE", "FIRST", "LAST",
    // String
    "UPPER", "LOWER", "TRIM", "LTRIM", "RTRIM", "SUBSTRING", "CONCAT", "LENGTH", "REPLACE",
    // Math
    "ABS", "ROUND", "FLOOR", "CEIL", "CEILING", "POWER", "SQRT", "LOG", "LN", "EXP", "MOD",
    // Date
    "DATE", "YEAR", "MONTH", "DAY", "HOUR", "MINUTE", "SECOND", "DATEADD", "DATEDIFF",
    "DATE_TRUNC", "EXTRACT", "NOW", "CURRENT_DATE", "CURRENT_TIMESTAMP",
    // Conditional
    "CASE", "WHEN", "THEN", "ELSE", "END", "COALESCE", "NULLIF", "IIF", "IF",
    // Type conversion
    "CAST", "CONVERT", "TRY_CAST",
];

static BLOCKED_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bDROP\b",
        r"(?i)\bDELETE\b",
        r"(?i)\bINSERT\b",
        r"(?i)\bUPDATE\b",
        r"(?i)\bTRUNCATE\b",
        r"(?i)\bALTER\b",
        r"(?i)\bCREATE\b",
        r"(?i)\bGRANT\b",
        r"(?i)\bREVOKE\b",
        r"(?i)\bEXEC\b",
        r"(?i)\bEXECUTE\b",
        r"--",
        r"/\*",
        r";",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid blocked pattern"))
    .collect()
});

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Z_][A-Z0-9_]*)\s*\(").expect("invalid function regex"));

static BRACKET_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]").expect("invalid bracket regex"));

static AGG_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([A-Z_]+)\s*\(\s*(DISTINCT\s+)?(.+?)\s*\)$").expect("invalid agg regex")
});

static COUNT_DISTINCT_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)COUNT\s*\(\s*DISTINCT\s+(.+?)\s*\)").expect("invalid count-distinct regex")
});

/// Validates an expression body against the function whitelist and the
/// blocked-pattern list. Bracket references are checked separately against
/// the declared field names.
pub fn validate_expression(expression: &str) -> ApiResult<()> {
    for pattern in BLOCKED_PATTERNS.iter() {
        if pattern.is_match(expression) {
            return Err(ApiError::validation_error(format!(
                "Expression contains a blocked pattern: {}",
                pattern.as_str()
            )));
        }
    }

    let open = expression.matches('(').count();
    let close = expression.matches(')').count();
    if open != close {
        return Err(ApiError::validation_error(format!(
            "Unbalanced parentheses in expression: {open} open, {close} close"
        )));
    }

    // Bracket references are not function calls; strip them before the scan.
    let stripped = BRACKET_REF.replace_all(expression, "");
    for capture in FUNCTION_CALL.captures_iter(&stripped) {
        let func = capture[1].to_uppercase();
        if !ALLOWED_FUNCTIONS.contains(&func.as_str()) {
            return Err(ApiError::validation_error(format!(
                "Unknown or disallowed function: {func}"
            )));
        }
    }

    Ok(())
}

/// Extracts `[field]` references from a calculated-field expression.
pub fn extract_references(expression: &str) -> Vec<String> {
    BRACKET_REF
        .captures_iter(expression)
        .map(|c| c[1].to_string())
        .collect()
}

/// Substitutes each `[ref]` with the parenthesized SQL of its referent.
pub fn substitute_references(expression: &str, field_map: &HashMap<String, String>) -> String {
    let mut result = expression.to_string();
    for (name, sql) in field_map {
        result = result.replace(&format!("[{name}]"), &format!("({sql})"));
    }
    result
}

fn is_simple_column(expr: &str) -> bool {
    !expr.is_empty()
        && expr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Renders a dimension to its column reference. Qualification is applied
/// only for multi-table plans so single-table SQL stays flat.
pub fn dimension_expression(dim: &Dimension, dialect: SqlDialect, qualify: bool) -> String {
    if qualify {
        format!("{}.{}", dim.source_table, dialect.quote(&dim.source_column))
    } else {
        dialect.quote(&dim.source_column)
    }
}

/// Builds the SQL expression for a measure.
///
/// A bare column body gets quoted, optionally table-qualified, and wrapped
/// in the aggregation function. `COUNT_DISTINCT` always renders as
/// `COUNT(DISTINCT ...)`. Bodies that already carry a table reference or
/// parentheses pass through after validation.
pub fn measure_expression(
    measure: &Measure,
    dialect: SqlDialect,
    qualify: bool,
) -> ApiResult<String> {
    let expr = measure.expression.trim();
    if expr.is_empty() {
        return Err(ApiError::validation_error(format!(
            "Measure '{}' has an empty expression",
            measure.name
        )));
    }

    let table = measure.source_table.as_deref().filter(|_| qualify);
    let col_ref = |column: &str| -> String {
        match table {
            Some(t) => format!("{}.{}", t, dialect.quote(column)),
            None => dialect.quote(column),
        }
    };

    // Body already names the source table: pass through validated.
    if let Some(t) = measure.source_table.as_deref() {
        if expr.contains(t) && expr.contains('.') {
            validate_expression(expr)?;
            return Ok(expr.to_string());
        }
    }

    if measure.aggregation == AggregationType::CountDistinct {
        if is_simple_column(expr) {
            return Ok(format!("COUNT(DISTINCT {})", col_ref(expr)));
        }
        if let Some(capture) = COUNT_DISTINCT_CALL.captures(expr) {
            let inner = capture[1].trim();
            if is_simple_column(inner) {
                return Ok(format!("COUNT(DISTINCT {})", col_ref(inner)));
            }
            validate_expression(expr)?;
            return Ok(expr.to_string());
        }
        validate_expression(expr)?;
        return Ok(format!("COUNT(DISTINCT {expr})"));
    }

    if measure.aggregation == AggregationType::Count && expr.contains('*') {
        return Ok("COUNT(*)".to_string());
    }

    // AGG(column) / AGG(DISTINCT column): re-qualify the inner column.
    if let Some(capture) = AGG_CALL.captures(expr) {
        let func = capture[1].to_uppercase();
        let distinct = capture.get(2).map(|m| m.as_str()).unwrap_or("");
        let inner = capture[3].trim();
        if func == measure.aggregation.sql_name() && is_simple_column(inner) {
            return Ok(format!("{}({}{})", func, distinct, col_ref(inner)));
        }
    }

    if is_simple_column(expr) {
        return Ok(match measure.aggregation {
            AggregationType::None => col_ref(expr),
            agg => format!("{}({})", agg.sql_name(), col_ref(expr)),
        });
    }

    validate_expression(expr)?;
    Ok(expr.to_string())
}

/// Expands a calculated field by substituting each bracket reference with
/// its referent's SQL. Referenced measures reuse the expressions already
/// built for the query, so shared subexpressions aggregate once.
pub fn expand_calculated_field(
    calc: &CalculatedField,
    model: &SemanticModel,
    measure_expressions: &HashMap<String, String>,
    dialect: SqlDialect,
    qualify: bool,
    visiting: &mut Vec<String>,
) -> ApiResult<String> {
    if visiting.iter().any(|n| n == &calc.name) {
        return Err(ApiError::plan_error(
            "resolve",
            format!(
                "Calculated field reference cycle: {} -> {}",
                visiting.join(" -> "),
                calc.name
            ),
        ));
    }
    visiting.push(calc.name.clone());

    validate_expression(&calc.expression)?;

    let references = if calc.referenced_fields.is_empty() {
        extract_references(&calc.expression)
    } else {
        calc.referenced_fields.clone()
    };

    let mut field_map = HashMap::new();
    for reference in &references {
        if let Some(dim) = model.dimension(reference) {
            field_map.insert(
                reference.clone(),
                dimension_expression(dim, dialect, qualify),
            );
            continue;
        }
        if let Some(sql) = measure_expressions.get(reference) {
            field_map.insert(reference.clone(), sql.clone());
            continue;
        }
        if let Some(measure) = model.measure(reference) {
            field_map.insert(
                reference.clone(),
                measure_expression(measure, dialect, qualify)?,
            );
            continue;
        }
        if let Some(nested) = model.calculated_field(reference) {
            let expanded = expand_calculated_field(
                nested,
                model,
                measure_expressions,
                dialect,
                qualify,
                visiting,
            )?;
            field_map.insert(reference.clone(), expanded);
            continue;
        }
        visiting.pop();
        return Err(ApiError::plan_error(
            "resolve",
            format!(
                "Calculated field '{}' references unknown field '{}'",
                calc.name, reference
            ),
        ));
    }

    visiting.pop();
    Ok(substitute_references(&calc.expression, &field_map))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(name: &str, agg: AggregationType, expr: &str, table: Option<&str>) -> Measure {
        Measure {
            name: name.to_string(),
            source_table: table.map(str::to_string),
            aggregation: agg,
            expression: expr.to_string(),
        }
    }

    #[test]
    fn test_bare_column_measure_is_quoted_and_aggregated() {
        let m = measure("total_revenue", AggregationType::Sum, "amount", Some("orders"));
        let sql = measure_expression(&m, SqlDialect::Postgres, false).expect("build failed");
        assert_eq!(sql, "SUM(\"amount\")");

        let sql = measure_expression(&m, SqlDialect::Postgres, true).expect("build failed");
        assert_eq!(sql, "SUM(orders.\"amount\")");
    }

    #[test]
    fn test_count_distinct_renders_count_distinct() {
        let m = measure("buyers", AggregationType::CountDistinct, "customer_id", Some("orders"));
        let sql = measure_expression(&m, SqlDialect::Postgres, true).expect("build failed");
        assert_eq!(sql, "COUNT(DISTINCT orders.\"customer_id\")");
        assert!(!sql.contains("COUNT_DISTINCT"));
    }

    #[test]
    fn test_count_star_passes_through() {
        let m = measure("orders", AggregationType::Count, "COUNT(*)", Some("orders"));
        let sql = measure_expression(&m, SqlDialect::Postgres, true).expect("build failed");
        assert_eq!(sql, "COUNT(*)");
    }

    #[test]
    fn test_agg_wrapped_column_is_requalified() {
        let m = measure("total_revenue", AggregationType::Sum, "SUM(amount)", Some("orders"));
        let sql = measure_expression(&m, SqlDialect::Postgres, true).expect("build failed");
        assert_eq!(sql, "SUM(orders.\"amount\")");
    }

    #[test]
    fn test_blocked_pattern_is_rejected() {
        let m = measure(
            "evil",
            AggregationType::Sum,
            "SUM(amount); DROP TABLE orders",
            Some("orders"),
        );
        let err = measure_expression(&m, SqlDialect::Postgres, true)
            .expect_err("blocked pattern should fail");
        assert_eq!(err.code(), "ERR_VALIDATION");
    }

    #[test]
    fn test_unknown_function_is_rejected() {
        let err = validate_expression("SLEEP(10)").expect_err("SLEEP should be rejected");
        assert_eq!(err.code(), "ERR_VALIDATION");
        validate_expression("ROUND(SUM(amount) / 100, 2)").expect("whitelisted functions pass");
    }

    #[test]
    fn test_reference_extraction_and_substitution() {
        let refs = extract_references("[Revenue] / [Orders]");
        assert_eq!(refs, vec!["Revenue", "Orders"]);

        let mut map = HashMap::new();
        map.insert("Revenue".to_string(), "SUM(\"amount\")".to_string());
        map.insert("Orders".to_string(), "COUNT(*)".to_string());
        let out = substitute_references("[Revenue] / [Orders]", &map);
        assert_eq!(out, "(SUM(\"amount\")) / (COUNT(*))");
    }

    #[test]
    fn test_calculated_field_cycle_is_detected() {
        let model = SemanticModel {
            dimensions: vec![],
            measures: vec![],
            calculated_fields: vec![
                CalculatedField {
                    name: "A".to_string(),
                    expression: "[B] + 1".to_string(),
                    referenced_fields: vec!["B".to_string()],
                },
                CalculatedField {
                    name: "B".to_string(),
                    expression: "[A] + 1".to_string(),
                    referenced_fields: vec!["A".to_string()],
                },
            ],
        };
        let calc = model.calculated_field("A").expect("field missing");
        let err = expand_calculated_field(
            calc,
            &model,
            &HashMap::new(),
            SqlDialect::Postgres,
            false,
            &mut Vec::new(),
        )
        .expect_err("cycle should fail");
        assert!(err.message.contains("cycle"));
    }
}
