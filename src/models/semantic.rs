use serde::{Deserialize, Serialize};

use super::dataset::{AggregationType, Dataset, FieldKind};

/// A groupable column exposed in the semantic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimension {
    pub name: String,
    pub source_table: String,
    pub source_column: String,
}

/// An aggregation expression exposed in the semantic layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub name: String,
    #[serde(default)]
    pub source_table: Option<String>,
    pub aggregation: AggregationType,
    /// A bare column name or a SQL expression body.
    pub expression: String,
}

/// A derived expression over other fields using `[name]` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatedField {
    pub name: String,
    pub expression: String,
    /// Names referenced in brackets; derived from the expression when the
    /// catalog leaves it empty.
    #[serde(default)]
    pub referenced_fields: Vec<String>,
}

/// Dimensions, measures and calculated fields for one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SemanticModel {
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub measures: Vec<Measure>,
    #[serde(default)]
    pub calculated_fields: Vec<CalculatedField>,
}

impl SemanticModel {
    /// Derives a single-table model from the dataset's declared fields.
    /// Used when the catalog carries no explicit semantic model.
    pub fn from_dataset(dataset: &Dataset) -> Self {
        let mut model = SemanticModel::default();
        for field in &dataset.fields {
            match field.kind {
                FieldKind::Dimension | FieldKind::Time => model.dimensions.push(Dimension {
                    name: field.name.clone(),
                    source_table: dataset.base_table.clone(),
                    source_column: field.physical_column.clone(),
                }),
                FieldKind::Measure => model.measures.push(Measure {
                    name: field.name.clone(),
                    source_table: Some(dataset.base_table.clone()),
                    aggregation: field.aggregation.unwrap_or(AggregationType::Sum),
                    expression: field
                        .expression
                        .clone()
                        .unwrap_or_else(|| field.physical_column.clone()),
                }),
            }
        }
        model
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn calculated_field(&self, name: &str) -> Option<&CalculatedField> {
        self.calculated_fields.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dataset::{DatasetField, FieldType, RlsPolicy};

    fn orders_dataset() -> Dataset {
        Dataset {
            id: "orders".to_string(),
            source_id: "warehouse".to_string(),
            engine: "postgres".to_string(),
            base_table: "orders".to_string(),
            fields: vec![
                DatasetField {
                    name: "city".to_string(),
                    physical_column: "city".to_string(),
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
            rls: RlsPolicy::default(),
            cache_ttl_secs: None,
            query_timeout_secs: None,
            default_limit: None,
            allow_cross_joins: false,
        }
    }

    #[test]
    fn test_model_derived_from_dataset_fields() {
        let model = SemanticModel::from_dataset(&orders_dataset());
        assert_eq!(model.dimensions.len(), 1);
        assert_eq!(model.measures.len(), 1);

        let revenue = model.measure("total_revenue").expect("measure missing");
        assert_eq!(revenue.aggregation, AggregationType::Sum);
        assert_eq!(revenue.expression, "amount");
        assert_eq!(revenue.source_table.as_deref(), Some("orders"));
    }
}
