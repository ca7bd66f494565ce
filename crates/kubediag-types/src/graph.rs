/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/graph.rs
*
* The pure Graph Builder algorithm (spec.md §4.1/§8/§9): DAG validation and
* deterministic root-to-sink path enumeration over the index-keyed
* `AdjacencyNode` arena. Kept free of any `kube` types so
* kubediag-master/src/controllers/graph_builder.rs can unit test it directly
* and wrap it with the object-store read/status-write/requeue plumbing.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::operation_set::AdjacencyNode;
use std::collections::VecDeque;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("adjacency list is empty")]
    EmptyGraph,
    #[error("node 0 must be the empty-operation start sentinel with no predecessors")]
    InvalidStart,
    #[error("node {0} is unreachable from node 0")]
    Unreachable(usize),
    #[error("adjacency list contains a cycle")]
    Cycle,
}

/// Validates the adjacency list and enumerates every path from node 0 to
/// every sink, sentinel stripped, in deterministic BFS-discovery order
/// (spec.md §4.1 steps 2-4).
pub fn build_paths(nodes: &[AdjacencyNode]) -> Result<Vec<Vec<usize>>, GraphError> {
    let n = nodes.len();
    if n == 0 {
        return Err(GraphError::EmptyGraph);
    }

    let mut indegree = vec![0u32; n];
    let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (p, node) in nodes.iter().enumerate() {
        for &to in &node.to {
            if to >= n {
                // An out-of-range edge can never be satisfied; treat its
                // target as permanently unreachable rather than panicking
                // on the out-of-bounds index.
                return Err(GraphError::Unreachable(to));
            }
            indegree[to] += 1;
            predecessors[to].push(p);
        }
    }

    if nodes[0].operation.is_some() || indegree[0] != 0 {
        return Err(GraphError::InvalidStart);
    }
    for i in 1..n {
        if indegree[i] == 0 {
            return Err(GraphError::Unreachable(i));
        }
    }

    let topo = topological_order(nodes, &indegree)?;

    let mut paths_to: Vec<Vec<Vec<usize>>> = vec![Vec::new(); n];
    paths_to[0].push(Vec::new());
    for &node in topo.iter().skip(1) {
        for &p in &predecessors[node] {
            for path in &paths_to[p] {
                let mut extended = path.clone();
                extended.push(node);
                paths_to[node].push(extended);
            }
        }
    }

    let mut paths = Vec::new();
    for i in 1..n {
        if nodes[i].to.is_empty() {
            paths.extend(paths_to[i].iter().cloned());
        }
    }
    Ok(paths)
}

/// Kahn's algorithm seeded from node 0, processing each node's successors in
/// adjacency-list order so the resulting order — and therefore path
/// enumeration order — is a deterministic function of the input.
fn topological_order(nodes: &[AdjacencyNode], indegree: &[u32]) -> Result<Vec<usize>, GraphError> {
    let n = nodes.len();
    let mut remaining = indegree.to_vec();
    let mut queue = VecDeque::new();
    queue.push_back(0usize);
    let mut order = Vec::with_capacity(n);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &to in &nodes[node].to {
            remaining[to] -= 1;
            if remaining[to] == 0 {
                queue.push_back(to);
            }
        }
    }

    if order.len() != n {
        return Err(GraphError::Cycle);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(op: Option<&str>, to: &[usize]) -> AdjacencyNode {
        AdjacencyNode { operation: op.map(str::to_string), to: to.to_vec() }
    }

    #[test]
    fn single_path_success() {
        // n0 -> n1
        let nodes = vec![n(None, &[1]), n(Some("op"), &[])];
        let paths = build_paths(&nodes).unwrap();
        assert_eq!(paths, vec![vec![1]]);
    }

    #[test]
    fn two_path_fallback_shape() {
        // n0 -> {A, B}, A and B are independent sinks
        let nodes = vec![n(None, &[1, 2]), n(Some("A"), &[]), n(Some("B"), &[])];
        let paths = build_paths(&nodes).unwrap();
        assert_eq!(paths, vec![vec![1], vec![2]]);
    }

    #[test]
    fn rejects_cycle() {
        // n0 -> n1 -> n2 -> n1 (cycle among 1,2)
        let nodes = vec![n(None, &[1]), n(Some("A"), &[2]), n(Some("B"), &[1])];
        assert_eq!(build_paths(&nodes).unwrap_err(), GraphError::Cycle);
    }

    #[test]
    fn rejects_unreachable_node() {
        let nodes = vec![n(None, &[1]), n(Some("A"), &[]), n(Some("B"), &[])];
        assert_eq!(build_paths(&nodes).unwrap_err(), GraphError::Unreachable(2));
    }

    #[test]
    fn rejects_start_with_operation() {
        let nodes = vec![n(Some("bad"), &[1]), n(Some("A"), &[])];
        assert_eq!(build_paths(&nodes).unwrap_err(), GraphError::InvalidStart);
    }

    #[test]
    fn rejects_start_with_predecessor() {
        // n1 points back to n0
        let nodes = vec![n(None, &[1]), n(Some("A"), &[0])];
        assert_eq!(build_paths(&nodes).unwrap_err(), GraphError::InvalidStart);
    }

    #[test]
    fn diamond_enumerates_every_simple_path_to_the_sink() {
        // n0 -> {1, 2}; 1 -> 3; 2 -> 3; 3 is the sole sink.
        let nodes = vec![
            n(None, &[1, 2]),
            n(Some("left"), &[3]),
            n(Some("right"), &[3]),
            n(Some("join"), &[]),
        ];
        let paths = build_paths(&nodes).unwrap();
        assert_eq!(paths, vec![vec![1, 3], vec![2, 3]]);
    }

    #[test]
    fn every_path_is_simple_and_ends_at_a_sink() {
        let nodes = vec![
            n(None, &[1, 2]),
            n(Some("left"), &[3]),
            n(Some("right"), &[3]),
            n(Some("join"), &[]),
        ];
        let paths = build_paths(&nodes).unwrap();
        for path in &paths {
            let mut seen = std::collections::HashSet::new();
            assert!(path.iter().all(|idx| seen.insert(*idx)), "path must be simple");
            let last = *path.last().unwrap();
            assert!(nodes[last].to.is_empty(), "path must end at a sink");
        }
    }
}
