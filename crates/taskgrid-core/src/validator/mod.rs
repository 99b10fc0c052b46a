//! Workflow Validator (C7): pure structural validation of a `Workflow`
//! before it is ever scheduled. Generalizes the teacher's
//! `resolve_order`-style DFS/topological-sort machinery from fixed-level
//! dispatch into a standalone validation pass: edge reference checks,
//! cycle detection restricted to non-`Loop` edges (I5), single-entry/
//! reachability/orphan checks, input-mapping existence checks, conditional-
//! edge severance checks, and `ComplexityMetrics`.

use std::collections::{HashMap, HashSet};

use crate::domain::workflow::{EdgeType, Workflow};
use crate::ids::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    DanglingEdgeReference { edge_id: String, missing_node: NodeId },
    Cycle { nodes: Vec<NodeId> },
    NoEntryNode,
    MultipleEntryNodes { node_ids: Vec<NodeId> },
    NoTerminalNode,
    UnreachableNode { node_id: NodeId },
    MissingInputSource { node_id: NodeId, target_input_name: String },
    ConditionalEdgeOrphansAlternative { edge_id: String, alternative: NodeId },
}

#[derive(Debug, Clone, Default)]
pub struct ComplexityMetrics {
    /// Longest path length through the DAG (edges traversed), 0 for a
    /// single-node workflow.
    pub depth: usize,
    /// Largest number of nodes reachable at the same topological level.
    pub width: usize,
    /// `edges - nodes + 2`, the standard cyclomatic-complexity formula for
    /// a single-entry/single-exit control-flow graph.
    pub cyclomatic: i64,
    /// Count of nodes with more than one outgoing non-disabled edge.
    pub parallel_branches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowValidationResult {
    pub issues: Vec<ValidationIssue>,
    pub metrics: ComplexityMetrics,
}

impl WorkflowValidationResult {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct WorkflowValidator;

impl WorkflowValidator {
    pub fn validate(workflow: &Workflow) -> WorkflowValidationResult {
        let mut issues = Vec::new();

        let node_ids: HashSet<NodeId> = workflow.nodes.iter().map(|n| n.id).collect();

        for edge in &workflow.edges {
            if !node_ids.contains(&edge.source_node_id) {
                issues.push(ValidationIssue::DanglingEdgeReference {
                    edge_id: edge.id.clone(),
                    missing_node: edge.source_node_id,
                });
            }
            if !node_ids.contains(&edge.target_node_id) {
                issues.push(ValidationIssue::DanglingEdgeReference {
                    edge_id: edge.id.clone(),
                    missing_node: edge.target_node_id,
                });
            }
        }

        if let Some(cycle) = detect_cycle(workflow) {
            issues.push(ValidationIssue::Cycle { nodes: cycle });
        }

        // An entry node has no inbound edge other than Control; Control
        // edges signal sequencing, not data dependency, so they don't
        // disqualify a node from being the DAG's single starting point.
        let entries: Vec<NodeId> = workflow
            .nodes
            .iter()
            .filter(|n| workflow.edges_into(n.id).all(|e| e.edge_type == EdgeType::Control))
            .map(|n| n.id)
            .collect();
        if !workflow.nodes.is_empty() {
            match entries.len() {
                0 => issues.push(ValidationIssue::NoEntryNode),
                1 => {}
                _ => issues.push(ValidationIssue::MultipleEntryNodes { node_ids: entries.clone() }),
            }
        }

        if !workflow.nodes.is_empty() && !workflow.nodes.iter().any(|n| workflow.edges_from(n.id).next().is_none()) {
            issues.push(ValidationIssue::NoTerminalNode);
        }

        let reachable = reachable_from(workflow, &entries);
        for node in &workflow.nodes {
            if !reachable.contains(&node.id) {
                issues.push(ValidationIssue::UnreachableNode { node_id: node.id });
            }
        }

        for node in &workflow.nodes {
            for mapping in &node.input_configuration.mappings {
                if !mapping.required {
                    continue;
                }
                let has_static_or_user = node.input_configuration.static_inputs.contains_key(&mapping.target_input_name)
                    || node.input_configuration.user_inputs.contains_key(&mapping.target_input_name);
                let has_edge_source = mapping.source_node_id.is_some() && mapping.source_output_name.is_some();
                if !has_static_or_user && !has_edge_source {
                    issues.push(ValidationIssue::MissingInputSource {
                        node_id: node.id,
                        target_input_name: mapping.target_input_name.clone(),
                    });
                }
            }
        }

        for node in &workflow.nodes {
            if let Some(cond) = &node.conditional_execution {
                if let Some(alt) = cond.alternative_node_id {
                    if !node_ids.contains(&alt) {
                        issues.push(ValidationIssue::ConditionalEdgeOrphansAlternative {
                            edge_id: node.id.to_string(),
                            alternative: alt,
                        });
                    }
                }
            }
        }

        let metrics = compute_metrics(workflow, &entries);

        WorkflowValidationResult { issues, metrics }
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Color {
    White,
    Gray,
    Black,
}

/// Coloring DFS over non-`Loop` edges only, so a genuine cycle can be
/// reported with its participating nodes (Kahn's algorithm alone can
/// detect that a cycle exists but not which nodes form it).
fn detect_cycle(workflow: &Workflow) -> Option<Vec<NodeId>> {
    let mut color: HashMap<NodeId, Color> = workflow.nodes.iter().map(|n| (n.id, Color::White)).collect();
    let mut stack: Vec<NodeId> = Vec::new();

    for node in &workflow.nodes {
        if color.get(&node.id).copied() == Some(Color::White) {
            if let Some(cycle) = visit(workflow, node.id, &mut color, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

fn visit(workflow: &Workflow, node_id: NodeId, color: &mut HashMap<NodeId, Color>, stack: &mut Vec<NodeId>) -> Option<Vec<NodeId>> {
    color.insert(node_id, Color::Gray);
    stack.push(node_id);

    for edge in workflow.edges_from(node_id) {
        if !edge.edge_type.participates_in_cycle_check() {
            continue;
        }
        match color.get(&edge.target_node_id).copied() {
            Some(Color::White) => {
                if let Some(cycle) = visit(workflow, edge.target_node_id, color, stack) {
                    return Some(cycle);
                }
            }
            Some(Color::Gray) => {
                let start = stack.iter().position(|&n| n == edge.target_node_id).unwrap_or(0);
                return Some(stack[start..].to_vec());
            }
            _ => {}
        }
    }

    stack.pop();
    color.insert(node_id, Color::Black);
    None
}

fn reachable_from(workflow: &Workflow, entries: &[NodeId]) -> HashSet<NodeId> {
    let mut seen: HashSet<NodeId> = HashSet::new();
    let mut queue: Vec<NodeId> = entries.to_vec();
    while let Some(node_id) = queue.pop() {
        if !seen.insert(node_id) {
            continue;
        }
        for edge in workflow.edges_from(node_id) {
            queue.push(edge.target_node_id);
        }
    }
    seen
}

fn compute_metrics(workflow: &Workflow, entries: &[NodeId]) -> ComplexityMetrics {
    let node_count = workflow.nodes.len() as i64;
    let edge_count = workflow.edges.iter().filter(|e| !e.disabled).count() as i64;

    let mut depth_by_node: HashMap<NodeId, usize> = HashMap::new();
    let mut levels: HashMap<usize, usize> = HashMap::new();
    let mut queue: Vec<(NodeId, usize)> = entries.iter().map(|&n| (n, 0)).collect();
    let mut visited_with_depth: HashSet<NodeId> = HashSet::new();

    while let Some((node_id, depth)) = queue.pop() {
        let entry = depth_by_node.entry(node_id).or_insert(depth);
        if depth > *entry {
            *entry = depth;
        }
        if visited_with_depth.insert(node_id) {
            *levels.entry(depth).or_insert(0) += 1;
        }
        for edge in workflow.edges_from(node_id) {
            queue.push((edge.target_node_id, depth + 1));
        }
    }

    let depth = depth_by_node.values().copied().max().unwrap_or(0);
    let width = levels.values().copied().max().unwrap_or(0);
    let cyclomatic = edge_count - node_count + 2;
    let parallel_branches = workflow.nodes.iter().filter(|n| workflow.edges_from(n.id).count() > 1).count();

    ComplexityMetrics {
        depth,
        width,
        cyclomatic,
        parallel_branches,
    }
}
