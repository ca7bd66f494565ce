/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/selector.rs
*
* Pure target-resolution helpers shared by the master's target resolution
* (spec.md §4.2) and the agent's task-claim check (spec.md §4.3, "or the
* task's pod reference resolves to localNode"). Kept free of any live
* `kube::Api` so the precedence/dedup rules are unit-testable in isolation.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::diagnosis::{PodReference, TargetSelector};
use k8s_openapi::api::core::v1::Pod;

/// The host a Pod is scheduled on, or `None` if it hasn't been scheduled
/// (spec.md §4.2: "Pods with an empty host contribute nothing").
pub fn pod_host(pod: &Pod) -> Option<String> {
    pod.spec.as_ref().and_then(|s| s.node_name.clone())
}

/// Deduplicates while preserving first-seen order (spec.md §4.2 "Tie-break
/// and policies" / §8 "Target dedup").
pub fn dedup_preserve_order(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if seen.insert(name.clone()) {
            out.push(name);
        }
    }
    out
}

/// Which form of `TargetSelector` is populated, in spec.md §4.2's fixed
/// precedence order: node selector → explicit node names → pod label
/// selector → pod references. The first *non-empty* form wins.
pub enum ResolvedForm<'a> {
    NodeSelector(&'a std::collections::BTreeMap<String, String>),
    NodeNames(&'a [String]),
    PodSelector(&'a std::collections::BTreeMap<String, String>),
    PodReferences(&'a [PodReference]),
    None,
}

pub fn resolved_form(selector: &TargetSelector) -> ResolvedForm<'_> {
    if let Some(ns) = selector.node_selector.as_ref().filter(|m| !m.is_empty()) {
        return ResolvedForm::NodeSelector(ns);
    }
    if let Some(names) = selector.node_names.as_ref().filter(|v| !v.is_empty()) {
        return ResolvedForm::NodeNames(names);
    }
    if let Some(ps) = selector.pod_selector.as_ref().filter(|m| !m.is_empty()) {
        return ResolvedForm::PodSelector(ps);
    }
    if let Some(refs) = selector.pod_references.as_ref().filter(|v| !v.is_empty()) {
        return ResolvedForm::PodReferences(refs);
    }
    ResolvedForm::None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let names = vec!["b".to_string(), "a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(dedup_preserve_order(names), vec!["b", "a", "c"]);
    }
}
