use serde_json::Value;
use sqlparser::ast::{BinaryOperator, Expr, SetExpr, Statement};
use sqlparser::dialect::{
    BigQueryDialect, ClickHouseDialect, DatabricksDialect, Dialect, DuckDbDialect, GenericDialect,
    MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use crate::models::FilterNode;
use crate::utils::{ApiError, ApiResult};

use super::{builder, SqlDialect};

fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        SqlDialect::Mysql => Box::new(MySqlDialect {}),
        SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
        SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
        SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
        SqlDialect::Databricks => Box::new(DatabricksDialect {}),
        SqlDialect::ClickHouse => Box::new(ClickHouseDialect {}),
        SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        // Trino and Oracle parse fine under the generic dialect.
        SqlDialect::Trino | SqlDialect::Oracle => Box::new(GenericDialect {}),
    }
}

/// Scans for comment tokens and statement separators outside string
/// literals. Comments are rejected on every user-supplied SQL path because
/// they are a classic smuggling vector for injection fragments.
fn scan_forbidden_tokens(sql: &str) -> Option<&'static str> {
    let mut in_single = false;
    let mut in_double = false;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => return Some("statement separator ';'"),
            '-' if !in_single && !in_double && bytes.get(i + 1) == Some(&b'-') => {
                return Some("line comment '--'")
            }
            '/' if !in_single && !in_double && bytes.get(i + 1) == Some(&b'*') => {
                return Some("block comment '/*'")
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Validates user-supplied SQL: exactly one statement, SELECT only, no
/// comment tokens. Everything else never reaches an adapter.
pub fn validate(sql: &str, dialect: SqlDialect) -> ApiResult<()> {
    if let Some(token) = scan_forbidden_tokens(sql) {
        return Err(ApiError::validation_error(format!(
            "SQL contains a forbidden {token}"
        )));
    }

    let parsed = Parser::parse_sql(&*parser_dialect(dialect), sql)
        .map_err(|e| ApiError::build_error(format!("SQL parse failed: {e}")))?;

    match parsed.len() {
        0 => Err(ApiError::validation_error("Empty SQL statement")),
        1 => match &parsed[0] {
            Statement::Query(_) => Ok(()),
            other => Err(ApiError::validation_error(format!(
                "Only SELECT statements are accepted, got {}",
                statement_keyword(other)
            ))),
        },
        n => Err(ApiError::validation_error(format!(
            "Multi-statement input rejected ({n} statements)"
        ))),
    }
}

fn statement_keyword(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Injects the RLS predicate into an existing SELECT by AST rewriting:
/// parses the statement, combines any existing WHERE with the predicate
/// under AND, and re-emits. A parse failure is a build error — the
/// predicate is never silently dropped.
///
/// Returns the rewritten SQL and the predicate's parameters (the caller's
/// SQL is raw BI-tool output and carries none of its own).
pub fn apply_rls(
    sql: &str,
    predicate: &FilterNode,
    dialect: SqlDialect,
) -> ApiResult<(String, Vec<Value>)> {
    validate(sql, dialect)?;

    let (pred_sql, params) = builder::render_filter(predicate, dialect)?;
    if pred_sql.is_empty() {
        return Ok((sql.to_string(), Vec::new()));
    }

    let dialect_impl = parser_dialect(dialect);
    let pred_expr = Parser::new(&*dialect_impl)
        .try_with_sql(&pred_sql)
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| ApiError::build_error(format!("RLS predicate parse failed: {e}")))?;

    let mut statements = Parser::parse_sql(&*dialect_impl, sql)
        .map_err(|e| ApiError::build_error(format!("SQL parse failed: {e}")))?;
    let statement = statements
        .pop()
        .ok_or_else(|| ApiError::build_error("Empty SQL statement"))?;

    let Statement::Query(mut query) = statement else {
        return Err(ApiError::build_error("RLS injection requires a SELECT"));
    };

    match query.body.as_mut() {
        SetExpr::Select(select) => {
            select.selection = Some(match select.selection.take() {
                Some(existing) => Expr::BinaryOp {
                    left: Box::new(Expr::Nested(Box::new(existing))),
                    op: BinaryOperator::And,
                    right: Box::new(Expr::Nested(Box::new(pred_expr))),
                },
                None => pred_expr,
            });
        }
        _ => {
            return Err(ApiError::build_error(
                "RLS injection requires a plain SELECT, not a set operation",
            ))
        }
    }

    Ok((Statement::Query(query).to_string(), params))
}

/// Re-emits a statement parsed under one dialect for another. The parse
/// normalizes dialect-specific syntax; emission uses the canonical AST
/// form.
pub fn transpile(sql: &str, read: SqlDialect, _write: SqlDialect) -> ApiResult<String> {
    let statements = Parser::parse_sql(&*parser_dialect(read), sql)
        .map_err(|e| ApiError::build_error(format!("SQL parse failed: {e}")))?;
    let statement = statements
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::build_error("Empty SQL statement"))?;
    Ok(statement.to_string())
}
