use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

/// Comparison and membership operators accepted in filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

/// A leaf filter condition.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    pub field: String,
    pub op: FilterOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
    /// Value list for `in` / `not_in`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub values: Option<Vec<Value>>,
    /// Range bounds for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub from: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub to: Option<Value>,
}

/// Arbitrarily nested filter tree.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(untagged)]
pub enum FilterNode {
    And {
        and: Vec<FilterNode>,
    },
    Or {
        or: Vec<FilterNode>,
    },
    Not {
        not: Box<FilterNode>,
    },
    Condition(FilterCondition),
}

impl FilterNode {
    pub fn condition(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        FilterNode::Condition(FilterCondition {
            field: field.into(),
            op,
            value: Some(value),
            values: None,
            from: None,
            to: None,
        })
    }

    /// Nesting depth, used by the request guards.
    pub fn depth(&self) -> usize {
        match self {
            FilterNode::And { and } => 1 + and.iter().map(FilterNode::depth).max().unwrap_or(0),
            FilterNode::Or { or } => 1 + or.iter().map(FilterNode::depth).max().unwrap_or(0),
            FilterNode::Not { not } => 1 + not.depth(),
            FilterNode::Condition(_) => 1,
        }
    }

    /// Joins two optional trees under an AND, preserving either side when
    /// the other is absent.
    pub fn merge_and(left: Option<FilterNode>, right: Option<FilterNode>) -> Option<FilterNode> {
        match (left, right) {
            (Some(l), Some(r)) => Some(FilterNode::And { and: vec![l, r] }),
            (Some(l), None) => Some(l),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Time window for incremental extraction. Rendered as
/// `column BETWEEN from AND to` and part of the cache fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalWindow {
    pub column: String,
    #[schema(value_type = Object)]
    pub from: Value,
    #[schema(value_type = Object)]
    pub to: Value,
}

/// A semantic query against a named dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 128))]
    pub dataset: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub filters: Option<FilterNode>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub incremental_window: Option<IncrementalWindow>,
    /// Bypass both cache lookup and cache store for this request.
    #[serde(default)]
    pub no_cache: bool,
}

/// Engine-native SQL submitted directly, bypassing the semantic compiler.
/// RLS is still enforced on this path via AST rewriting.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlQueryRequest {
    #[validate(length(min = 1, max = 128))]
    pub dataset: String,
    #[validate(length(min = 1, max = 262144))]
    pub sql: String,
    #[serde(default)]
    pub no_cache: bool,
}
