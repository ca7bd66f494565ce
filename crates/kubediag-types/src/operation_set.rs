/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/operation_set.rs
*
* The `OperationSet` custom resource (spec.md §3/§4.1): a DAG of Operation
* references. `status.paths`/`status.ready` are written by the Graph Builder
* in kubediag-master. Modeled after crds.rs's split of a CR into
* `...Spec`/`...Status` structs with a `Vec<StatusCondition>`-style condition
* list (here, the shared `Condition` type).
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kubediag.io",
    version = "v1",
    kind = "OperationSet",
    scope = "Cluster",
    status = "OperationSetStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "opset"
)]
#[serde(rename_all = "camelCase")]
pub struct OperationSetSpec {
    pub adjacency_list: Vec<AdjacencyNode>,
}

/// A single node of the adjacency list arena. Node 0 is the virtual start
/// sentinel (`operation: None`) per spec.md §3. All edges are plain `usize`
/// indices into the same `Vec` — spec.md §9 "Graph as arena": avoid pointer
/// cycles.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AdjacencyNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<usize>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationSetStatus {
    #[serde(default)]
    pub ready: bool,
    /// Enumerated start-to-sink paths, sentinel stripped (spec.md §3).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<crate::Condition>,
}

impl OperationSetSpec {
    /// The operation name at `paths[path_index][node_index]`, or `None` if
    /// out of bounds (spec.md §4.2 step 2: "Bounds errors are fatal
    /// programming errors" — callers treat `None` here as just that).
    pub fn operation_at<'a>(&self, paths: &'a [Vec<usize>], path_index: usize, node_index: usize) -> Option<&'a usize> {
        paths.get(path_index).and_then(|p| p.get(node_index))
    }
}
