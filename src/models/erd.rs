use serde::{Deserialize, Serialize};

/// Relationship cardinality between two tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
    #[serde(rename = "N:N")]
    ManyToMany,
}

impl Cardinality {
    /// Rank used by the join planner to break ties between equal-length
    /// paths: 1:1 beats 1:N/N:1 beats N:N.
    pub fn rank(&self) -> u8 {
        match self {
            Cardinality::OneToOne => 0,
            Cardinality::OneToMany | Cardinality::ManyToOne => 1,
            Cardinality::ManyToMany => 2,
        }
    }
}

/// SQL join type carried by an ERD edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

impl JoinType {
    pub fn sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
            JoinType::Cross => "CROSS JOIN",
        }
    }
}

/// A physical table node in the entity-relationship model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNode {
    pub id: String,
    #[serde(default)]
    pub schema: Option<String>,
    pub table: String,
}

impl TableNode {
    pub fn full_name(&self) -> String {
        match &self.schema {
            Some(schema) if !schema.is_empty() => format!("{}.{}", schema, self.table),
            _ => self.table.clone(),
        }
    }
}

/// A join edge between two table nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEdge {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub source_column: String,
    pub target_column: String,
    #[serde(default = "default_cardinality")]
    pub cardinality: Cardinality,
    #[serde(default = "default_join_type")]
    pub join_type: JoinType,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_cardinality() -> Cardinality {
    Cardinality::ManyToOne
}

fn default_join_type() -> JoinType {
    JoinType::Left
}

fn default_active() -> bool {
    true
}

/// Directed multigraph of physical tables and join edges.
///
/// The graph may be disconnected; the planner treats unreachable tables as a
/// planning failure, never as a cartesian product.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ErdModel {
    #[serde(default)]
    pub nodes: Vec<TableNode>,
    #[serde(default)]
    pub edges: Vec<RelationshipEdge>,
}

impl ErdModel {
    pub fn node(&self, node_id: &str) -> Option<&TableNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn node_by_table(&self, full_name: &str) -> Option<&TableNode> {
        self.nodes.iter().find(|n| n.full_name() == full_name)
    }

    /// Active edges touching the given node, in declaration order.
    pub fn active_edges_for(&self, node_id: &str) -> Vec<&RelationshipEdge> {
        self.edges
            .iter()
            .filter(|e| {
                e.is_active && (e.source_node_id == node_id || e.target_node_id == node_id)
            })
            .collect()
    }

    /// Structural validation: edges must reference existing nodes.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for edge in &self.edges {
            if self.node(&edge.source_node_id).is_none() {
                errors.push(format!(
                    "Edge {} references missing source node {}",
                    edge.id, edge.source_node_id
                ));
            }
            if self.node(&edge.target_node_id).is_none() {
                errors.push(format!(
                    "Edge {} references missing target node {}",
                    edge.id, edge.target_node_id
                ));
            }
        }
        errors
    }
}
