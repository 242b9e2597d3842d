use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::models::{ErdModel, JoinStep, JoinType, RelationshipEdge};
use crate::utils::{ApiError, ApiResult};

/// Composite path cost for deterministic tie-breaking: shorter paths win,
/// then smaller maximum cardinality along the path, then the lexicographic
/// sequence of traversed table names.
type PathCost = (usize, u8, Vec<String>);

struct JoinGraph<'a> {
    /// node id -> (neighbor node id, edge), in edge declaration order.
    adjacency: HashMap<&'a str, Vec<(&'a str, &'a RelationshipEdge)>>,
    node_by_table: HashMap<String, &'a str>,
    table_by_node: HashMap<&'a str, String>,
}

impl<'a> JoinGraph<'a> {
    fn new(erd: &'a ErdModel, include_cross: bool) -> Self {
        let mut adjacency: HashMap<&str, Vec<(&str, &RelationshipEdge)>> = HashMap::new();
        let mut node_by_table = HashMap::new();
        let mut table_by_node = HashMap::new();

        for node in &erd.nodes {
            adjacency.entry(node.id.as_str()).or_default();
            node_by_table.insert(node.full_name(), node.id.as_str());
            table_by_node.insert(node.id.as_str(), node.full_name());
        }

        for edge in &erd.edges {
            if !edge.is_active {
                continue;
            }
            if edge.join_type == JoinType::Cross && !include_cross {
                continue;
            }
            if let Some(list) = adjacency.get_mut(edge.source_node_id.as_str()) {
                list.push((edge.target_node_id.as_str(), edge));
            }
            if let Some(list) = adjacency.get_mut(edge.target_node_id.as_str()) {
                list.push((edge.source_node_id.as_str(), edge));
            }
        }

        Self { adjacency, node_by_table, table_by_node }
    }

    /// Shortest path between two nodes under the composite cost. Returns the
    /// edge sequence, or None when the target is unreachable.
    fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<&'a RelationshipEdge>> {
        if from == to {
            return Some(Vec::new());
        }

        let mut best: HashMap<&str, PathCost> = HashMap::new();
        let mut heap: BinaryHeap<Reverse<(PathCost, &str, Vec<usize>)>> = BinaryHeap::new();

        // Paths are tracked as indices into a flat visit log of edges.
        let mut edge_log: Vec<&RelationshipEdge> = Vec::new();

        heap.push(Reverse(((0, 0, vec![]), from, Vec::new())));
        while let Some(Reverse((cost, node, path))) = heap.pop() {
            if let Some(known) = best.get(node) {
                if *known <= cost {
                    continue;
                }
            }
            best.insert(node, cost.clone());

            if node == to {
                return Some(path.iter().map(|&i| edge_log[i]).collect());
            }

            for &(neighbor, edge) in self.adjacency.get(node).into_iter().flatten() {
                let neighbor_table = self
                    .table_by_node
                    .get(neighbor)
                    .cloned()
                    .unwrap_or_else(|| neighbor.to_string());
                let mut tables = cost.2.clone();
                tables.push(neighbor_table);
                let next_cost = (
                    cost.0 + 1,
                    cost.1.max(edge.cardinality.rank()),
                    tables,
                );
                if best.get(neighbor).map_or(true, |known| next_cost < *known) {
                    let mut next_path = path.clone();
                    edge_log.push(edge);
                    next_path.push(edge_log.len() - 1);
                    heap.push(Reverse((next_cost, neighbor, next_path)));
                }
            }
        }

        None
    }
}

/// Plans the join order for a set of required tables.
///
/// The anchor is the lexicographically first table; every other table is
/// reached by the best path over active edges. Returns the ordered source
/// tables (anchor first) and the join steps.
pub fn plan_joins(
    required_tables: &[String],
    erd: Option<&ErdModel>,
    allow_cross_joins: bool,
) -> ApiResult<(Vec<String>, Vec<JoinStep>)> {
    let mut tables: Vec<String> = required_tables.to_vec();
    tables.sort();
    tables.dedup();

    if tables.is_empty() {
        return Err(ApiError::plan_error("plan", "No source tables resolved"));
    }
    if tables.len() == 1 {
        return Ok((tables, Vec::new()));
    }

    let erd = erd.ok_or_else(|| {
        ApiError::plan_error(
            "plan",
            format!(
                "Query touches {} tables but the dataset has no relationship model",
                tables.len()
            ),
        )
    })?;

    let graph = JoinGraph::new(erd, allow_cross_joins);
    let anchor = tables[0].clone();
    let anchor_node = *graph.node_by_table.get(&anchor).ok_or_else(|| {
        ApiError::plan_error("plan", format!("Table '{anchor}' not present in the relationship model"))
    })?;

    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(anchor.clone());
    let mut ordered_tables = vec![anchor.clone()];
    let mut steps: Vec<JoinStep> = Vec::new();

    for target in tables.iter().skip(1) {
        if visited.contains(target) {
            continue;
        }
        let target_node = *graph.node_by_table.get(target).ok_or_else(|| {
            ApiError::plan_error(
                "plan",
                format!("Table '{target}' not present in the relationship model"),
            )
        })?;

        let path = graph.shortest_path(anchor_node, target_node).ok_or_else(|| {
            // Distinguish a genuinely disconnected table from one gated
            // behind a CROSS edge the dataset does not allow.
            if !allow_cross_joins {
                let with_cross = JoinGraph::new(erd, true);
                if with_cross.shortest_path(anchor_node, target_node).is_some() {
                    return ApiError::plan_error(
                        "plan",
                        format!(
                            "Joining '{target}' requires a CROSS join, which dataset policy disallows"
                        ),
                    );
                }
            }
            ApiError::plan_error(
                "plan",
                format!("Tables unreachable from '{anchor}': [{target}]"),
            )
        })?;

        for edge in path {
            let source_table = graph
                .table_by_node
                .get(edge.source_node_id.as_str())
                .cloned()
                .unwrap_or_default();
            let target_table = graph
                .table_by_node
                .get(edge.target_node_id.as_str())
                .cloned()
                .unwrap_or_default();

            let (base, base_col, joined, joined_col) =
                if visited.contains(&source_table) && !visited.contains(&target_table) {
                    (&source_table, &edge.source_column, &target_table, &edge.target_column)
                } else if visited.contains(&target_table) && !visited.contains(&source_table) {
                    (&target_table, &edge.target_column, &source_table, &edge.source_column)
                } else {
                    continue;
                };

            steps.push(JoinStep {
                join_type: edge.join_type,
                table: joined.clone(),
                left: format!("{base}.{base_col}"),
                right: format!("{joined}.{joined_col}"),
            });
            visited.insert(joined.clone());
            ordered_tables.push(joined.clone());
        }
    }

    Ok((ordered_tables, steps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cardinality, TableNode};

    fn edge(
        id: &str,
        source: &str,
        target: &str,
        source_col: &str,
        target_col: &str,
        cardinality: Cardinality,
        join_type: JoinType,
        active: bool,
    ) -> RelationshipEdge {
        RelationshipEdge {
            id: id.to_string(),
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            source_column: source_col.to_string(),
            target_column: target_col.to_string(),
            cardinality,
            join_type,
            is_active: active,
        }
    }

    fn node(id: &str, table: &str) -> TableNode {
        TableNode { id: id.to_string(), schema: None, table: table.to_string() }
    }

    /// orders -> customers -> regions chain from the star-schema fixtures.
    fn chain_erd() -> ErdModel {
        ErdModel {
            nodes: vec![node("n1", "orders"), node("n2", "customers"), node("n3", "regions")],
            edges: vec![
                edge("e1", "n1", "n2", "customer_id", "id", Cardinality::ManyToOne, JoinType::Left, true),
                edge("e2", "n2", "n3", "region_id", "id", Cardinality::ManyToOne, JoinType::Left, true),
            ],
        }
    }

    #[test]
    fn test_single_table_needs_no_joins() {
        let (tables, steps) =
            plan_joins(&["orders".to_string()], None, false).expect("plan failed");
        assert_eq!(tables, vec!["orders"]);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_chain_joins_in_path_order() {
        let erd = chain_erd();
        let (tables, steps) = plan_joins(
            &["regions".to_string(), "orders".to_string()],
            Some(&erd),
            false,
        )
        .expect("plan failed");

        assert_eq!(tables[0], "orders");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].table, "customers");
        assert_eq!(steps[0].left, "orders.customer_id");
        assert_eq!(steps[0].right, "customers.id");
        assert_eq!(steps[1].table, "regions");
        assert_eq!(steps[1].left, "customers.region_id");
        assert_eq!(steps[1].right, "regions.id");
    }

    #[test]
    fn test_inactive_edges_are_unusable() {
        let mut erd = chain_erd();
        erd.edges[1].is_active = false;
        let err = plan_joins(
            &["regions".to_string(), "orders".to_string()],
            Some(&erd),
            false,
        )
        .expect_err("inactive edge should break the path");
        assert_eq!(err.code(), "ERR_PLAN");
        assert!(err.message.contains("unreachable"));
    }

    #[test]
    fn test_cross_join_requires_dataset_opt_in() {
        let mut erd = chain_erd();
        erd.edges[1].join_type = JoinType::Cross;

        let err = plan_joins(
            &["regions".to_string(), "orders".to_string()],
            Some(&erd),
            false,
        )
        .expect_err("cross join should be refused");
        assert!(err.message.contains("CROSS"));

        let (_, steps) = plan_joins(
            &["regions".to_string(), "orders".to_string()],
            Some(&erd),
            true,
        )
        .expect("cross join allowed by dataset");
        assert_eq!(steps[1].join_type, JoinType::Cross);
    }

    #[test]
    fn test_tie_break_prefers_smaller_cardinality() {
        // Two equal-length routes from a to c: via b (N:N) and via d (N:1).
        let erd = ErdModel {
            nodes: vec![node("a", "a"), node("b", "b"), node("c", "c"), node("d", "d")],
            edges: vec![
                edge("e1", "a", "b", "x", "x", Cardinality::ManyToMany, JoinType::Inner, true),
                edge("e2", "b", "c", "x", "x", Cardinality::ManyToMany, JoinType::Inner, true),
                edge("e3", "a", "d", "x", "x", Cardinality::ManyToOne, JoinType::Inner, true),
                edge("e4", "d", "c", "x", "x", Cardinality::ManyToOne, JoinType::Inner, true),
            ],
        };
        let (_, steps) =
            plan_joins(&["a".to_string(), "c".to_string()], Some(&erd), false).expect("plan failed");
        assert_eq!(steps[0].table, "d");
    }

    #[test]
    fn test_planning_is_deterministic() {
        let erd = chain_erd();
        let tables = vec!["regions".to_string(), "customers".to_string(), "orders".to_string()];
        let first = plan_joins(&tables, Some(&erd), false).expect("plan failed");
        for _ in 0..10 {
            let again = plan_joins(&tables, Some(&erd), false).expect("plan failed");
            assert_eq!(
                first.1.iter().map(JoinStep::describe).collect::<Vec<_>>(),
                again.1.iter().map(JoinStep::describe).collect::<Vec<_>>(),
            );
        }
    }
}
