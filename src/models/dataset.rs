use serde::{Deserialize, Serialize};

/// Field classification inside a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Dimension,
    Measure,
    Time,
}

/// Logical field type, mapped from the catalog definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Decimal,
    Bool,
    Date,
    Datetime,
    Timestamp,
}

/// Aggregation applied by a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
    Median,
    Stddev,
    Variance,
    First,
    Last,
    None,
}

impl AggregationType {
    /// SQL function name. `COUNT_DISTINCT` has no function form of its own;
    /// the compiler renders it as `COUNT(DISTINCT ...)`.
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregationType::Sum => "SUM",
            AggregationType::Count | AggregationType::CountDistinct => "COUNT",
            AggregationType::Avg => "AVG",
            AggregationType::Min => "MIN",
            AggregationType::Max => "MAX",
            AggregationType::Median => "MEDIAN",
            AggregationType::Stddev => "STDDEV",
            AggregationType::Variance => "VARIANCE",
            AggregationType::First => "FIRST",
            AggregationType::Last => "LAST",
            AggregationType::None => "",
        }
    }
}

/// A declared field of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetField {
    pub name: String,
    pub physical_column: String,
    pub kind: FieldKind,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Aggregation tag, required for measure fields.
    #[serde(default)]
    pub aggregation: Option<AggregationType>,
    /// Measure body; a bare column name or a SQL expression.
    #[serde(default)]
    pub expression: Option<String>,
}

/// RLS predicate mode. `in_list` is accepted in catalogs but evaluated as
/// `equals` until value-list sources land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RlsMode {
    #[default]
    Equals,
    InList,
}

/// Row-level security policy for a dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RlsPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub mode: RlsMode,
    #[serde(default)]
    pub allow_admin_bypass: bool,
}

/// A named logical dataset from the catalog. Read-only in the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    pub source_id: String,
    /// Dialect tag (postgres, mysql, bigquery, ...).
    pub engine: String,
    pub base_table: String,
    #[serde(default)]
    pub fields: Vec<DatasetField>,
    #[serde(default)]
    pub rls: RlsPolicy,
    /// Cache TTL in seconds. Falls back to the gateway default (60 s).
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Per-dataset execution timeout in seconds.
    #[serde(default)]
    pub query_timeout_secs: Option<u64>,
    /// Row limit applied when the request leaves `limit` unset.
    #[serde(default)]
    pub default_limit: Option<u64>,
    /// Whether join planning may traverse CROSS edges.
    #[serde(default)]
    pub allow_cross_joins: bool,
}

impl Dataset {
    pub fn field(&self, name: &str) -> Option<&DatasetField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_deserializes_screaming_snake() {
        let agg: AggregationType = serde_json::from_str("\"COUNT_DISTINCT\"")
            .expect("Failed to parse aggregation tag");
        assert_eq!(agg, AggregationType::CountDistinct);
        assert_eq!(agg.sql_name(), "COUNT");
    }

    #[test]
    fn test_rls_policy_defaults_disabled() {
        let policy: RlsPolicy = serde_json::from_str("{}").expect("Failed to parse empty policy");
        assert!(!policy.enabled);
        assert!(!policy.allow_admin_bypass);
        assert_eq!(policy.mode, RlsMode::Equals);
    }
}
