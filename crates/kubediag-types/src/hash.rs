/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/hash.rs
*
* Computes the `adjacency-list-hash` label (spec.md §3) from the structural
* content of an OperationSet's adjacency list: node operation names and edge
* sets only, never field ordering or incidental whitespace (spec.md §8,
* "Hash stability"). We serialize a normalized projection (edges sorted) to
* a canonical string and hash it with a fixed, dependency-free FNV-1a rather
* than pulling in a crate for this one line — the teacher has no "content
* hash" precedent to imitate, and FNV-1a is the standard low-ceremony choice
* for a stable, non-cryptographic content digest.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::operation_set::AdjacencyNode;

pub fn adjacency_list_hash(nodes: &[AdjacencyNode]) -> String {
    let mut buf = String::new();
    for (i, node) in nodes.iter().enumerate() {
        buf.push_str(&i.to_string());
        buf.push(':');
        buf.push_str(node.operation.as_deref().unwrap_or(""));
        buf.push('>');
        let mut to = node.to.clone();
        to.sort_unstable();
        for (j, t) in to.iter().enumerate() {
            if j > 0 {
                buf.push(',');
            }
            buf.push_str(&t.to_string());
        }
        buf.push(';');
    }
    format!("{:016x}", fnv1a(buf.as_bytes()))
}

pub fn fnv1a_u64(bytes: &[u8]) -> u64 {
    fnv1a(bytes)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

pub const ADJACENCY_LIST_HASH_LABEL: &str = "adjacency-list-hash";

#[cfg(test)]
mod tests {
    use super::*;

    fn node(op: Option<&str>, to: &[usize]) -> AdjacencyNode {
        AdjacencyNode { operation: op.map(str::to_string), to: to.to_vec() }
    }

    #[test]
    fn hash_is_stable_across_edge_reordering() {
        let a = vec![node(None, &[1, 2]), node(Some("x"), &[]), node(Some("y"), &[])];
        let b = vec![node(None, &[2, 1]), node(Some("x"), &[]), node(Some("y"), &[])];
        assert_eq!(adjacency_list_hash(&a), adjacency_list_hash(&b));
    }

    #[test]
    fn hash_changes_with_structural_content() {
        let a = vec![node(None, &[1]), node(Some("x"), &[])];
        let b = vec![node(None, &[1]), node(Some("z"), &[])];
        assert_ne!(adjacency_list_hash(&a), adjacency_list_hash(&b));
    }
}
