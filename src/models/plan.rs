use serde::{Deserialize, Serialize};

use super::erd::JoinType;
use super::query::{FilterNode, SortDirection};

/// One SELECT-list entry. `expression` is already table-qualified; the SQL
/// builder handles identifier quoting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub alias: String,
    pub expression: String,
    /// Aggregated projections stay out of GROUP BY.
    pub aggregated: bool,
}

/// One ordered join step produced by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinStep {
    pub join_type: JoinType,
    pub table: String,
    /// Left side of the ON predicate, table-qualified.
    pub left: String,
    /// Right side of the ON predicate, table-qualified.
    pub right: String,
}

impl JoinStep {
    pub fn describe(&self) -> String {
        format!("{} {} ON {} = {}", self.join_type.sql(), self.table, self.left, self.right)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderClause {
    /// Projected alias or table-qualified column.
    pub expression: String,
    pub direction: SortDirection,
}

/// Intermediate representation between the semantic compiler and the SQL
/// builder. Field references inside `where_tree` are physical
/// (table-qualified) by the time the plan is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub projections: Vec<Projection>,
    pub source_tables: Vec<String>,
    pub join_steps: Vec<JoinStep>,
    pub where_tree: Option<FilterNode>,
    /// Table-qualified grouping expressions, in dimension order.
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderClause>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl CompiledPlan {
    /// Anchor table the FROM clause starts with.
    pub fn anchor(&self) -> Option<&str> {
        self.source_tables.first().map(String::as_str)
    }
}
