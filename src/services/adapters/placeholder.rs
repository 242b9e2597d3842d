//! Placeholder rewriting from the canonical `?` positional form to each
//! engine's native syntax. All rewriters preserve parameter order and skip
//! `?` characters inside string literals.

use serde_json::Value;

use crate::utils::{ApiError, ApiResult};

/// Walks the SQL and calls `emit` for every positional placeholder outside
/// string literals, copying everything else through.
fn rewrite<F>(sql: &str, mut emit: F) -> String
where
    F: FnMut(usize, &mut String),
{
    let mut out = String::with_capacity(sql.len() + 16);
    let mut in_single = false;
    let mut in_double = false;
    let mut index = 0;
    for c in sql.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                out.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                out.push(c);
            }
            '?' if !in_single && !in_double => {
                emit(index, &mut out);
                index += 1;
            }
            _ => out.push(c),
        }
    }
    out
}

/// Counts positional placeholders outside string literals.
pub fn count(sql: &str) -> usize {
    let mut n = 0;
    rewrite(sql, |_, _| n += 1);
    n
}

/// `?` -> `$1..$n` (Postgres wire family) / `:1..:n` (Oracle) /
/// `@P1..@Pn` (TDS), depending on the prefix. Numbering is 1-based.
pub fn numbered(sql: &str, prefix: &str) -> String {
    rewrite(sql, |i, out| {
        out.push_str(prefix);
        out.push_str(&(i + 1).to_string());
    })
}

/// `?` -> `@p0..@pN` named parameters (BigQuery). Returns the generated
/// names alongside the SQL so the caller can pair them with values.
pub fn named_at(sql: &str) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let rewritten = rewrite(sql, |i, out| {
        let name = format!("p{i}");
        out.push('@');
        out.push_str(&name);
        names.push(name);
    });
    (rewritten, names)
}

/// `?` -> `:p0..:pN` named parameters (Databricks SQL statements).
pub fn named_colon(sql: &str) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let rewritten = rewrite(sql, |i, out| {
        let name = format!("p{i}");
        out.push(':');
        out.push_str(&name);
        names.push(name);
    });
    (rewritten, names)
}

/// ClickHouse server-side parameter type for a JSON value.
pub fn clickhouse_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "Nullable(String)",
        Value::Bool(_) => "UInt8",
        Value::Number(n) if n.is_f64() => "Float64",
        Value::Number(_) => "Int64",
        _ => "String",
    }
}

/// `?` -> `{p0:Type}` named parameters with type hints (ClickHouse).
/// Returns the rewritten SQL and `(name, value)` pairs in order.
pub fn clickhouse_named(sql: &str, params: &[Value]) -> ApiResult<(String, Vec<(String, Value)>)> {
    let marker_count = count(sql);
    if marker_count != params.len() {
        return Err(ApiError::build_error(format!(
            "Placeholder count {} does not match parameter count {}",
            marker_count,
            params.len()
        )));
    }
    let mut pairs = Vec::with_capacity(params.len());
    let rewritten = rewrite(sql, |i, out| {
        let name = format!("p{i}");
        out.push('{');
        out.push_str(&name);
        out.push(':');
        out.push_str(clickhouse_type(&params[i]));
        out.push('}');
        pairs.push((name, params[i].clone()));
    });
    Ok((rewritten, pairs))
}

/// Inlines parameter values directly into the SQL (Trino/Presto path,
/// where parameter support is uneven across connectors).
///
/// Strings are single-quote-escaped by doubling, nulls become `NULL`,
/// booleans the uppercase literal, numbers verbatim. Any other type is
/// rejected rather than guessed at.
pub fn inline(sql: &str, params: &[Value]) -> ApiResult<String> {
    let marker_count = count(sql);
    if marker_count != params.len() {
        return Err(ApiError::build_error(format!(
            "Placeholder count {} does not match parameter count {}",
            marker_count,
            params.len()
        )));
    }

    let mut rendered = Vec::with_capacity(params.len());
    for param in params {
        rendered.push(match param {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string().to_uppercase(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => {
                return Err(ApiError::build_error(format!(
                    "Cannot inline parameter of type {} for this engine",
                    type_name(other)
                )))
            }
        });
    }

    let mut iter = rendered.into_iter();
    Ok(rewrite(sql, |_, out| {
        if let Some(value) = iter.next() {
            out.push_str(&value);
        }
    }))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
