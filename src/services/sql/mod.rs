pub mod builder;
pub mod rewrite;

pub use builder::{build, render_filter};
pub use rewrite::{apply_rls, transpile, validate};

/// Target SQL dialect, resolved from the dataset's engine tag.
///
/// Wire-compatible engines share a dialect: the Postgres family covers
/// Redshift, TimescaleDB and CockroachDB; the MySQL family covers MariaDB
/// and the MySQL-protocol analytical stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Mysql,
    Sqlite,
    DuckDb,
    Snowflake,
    BigQuery,
    Databricks,
    ClickHouse,
    Trino,
    MsSql,
    Oracle,
}

impl SqlDialect {
    pub fn from_engine(engine: &str) -> Self {
        let tag = engine.to_lowercase().replace(['_', '-'], "");
        match tag.as_str() {
            "mysql" | "mariadb" | "starrocks" | "doris" => SqlDialect::Mysql,
            "sqlite" => SqlDialect::Sqlite,
            "duckdb" | "embedded" => SqlDialect::DuckDb,
            "snowflake" => SqlDialect::Snowflake,
            "bigquery" => SqlDialect::BigQuery,
            "databricks" | "spark" => SqlDialect::Databricks,
            "clickhouse" => SqlDialect::ClickHouse,
            "trino" | "presto" => SqlDialect::Trino,
            "sqlserver" | "mssql" | "tsql" => SqlDialect::MsSql,
            "oracle" => SqlDialect::Oracle,
            // postgres, postgresql, redshift, timescaledb, cockroachdb
            _ => SqlDialect::Postgres,
        }
    }

    /// Quotes a single identifier in this dialect's form.
    pub fn quote(&self, ident: &str) -> String {
        match self {
            SqlDialect::Mysql
            | SqlDialect::BigQuery
            | SqlDialect::Databricks
            | SqlDialect::ClickHouse => format!("`{}`", ident.replace('`', "``")),
            SqlDialect::MsSql => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quotes the final segment of a possibly table-qualified reference,
    /// leaving the table prefix raw: `regions.name` -> `regions."name"`.
    pub fn quote_qualified(&self, reference: &str) -> String {
        match reference.rsplit_once('.') {
            Some((table, column)) => format!("{}.{}", table, self.quote(column)),
            None => self.quote(reference),
        }
    }
}
