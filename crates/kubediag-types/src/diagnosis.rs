/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/diagnosis.rs
*
* The `Diagnosis` custom resource (spec.md §3/§4.2): one execution of an
* OperationSet against a resolved target set, driven by the Master
* Reconciler through `phase`/`checkpoint` to a terminal state. Namespaced,
* per crds.rs's `phPreview`/`phRelease` pattern (`namespaced` kube attribute).
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kubediag.io",
    version = "v1",
    kind = "Diagnosis",
    namespaced,
    status = "DiagnosisStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"OperationSet", "type":"string", "jsonPath":".spec.operationSet"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "diag"
)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisSpec {
    pub operation_set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<TargetSelector>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

/// Exactly one of these four forms is populated; spec.md §4.2 "Target
/// resolution" defines a strict precedence order among them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_references: Option<Vec<PodReference>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PodReference {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum DiagnosisPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisStatus {
    /// `None` represents spec.md's "empty" phase — no status subresource
    /// write has happened yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DiagnosisPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded_path: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_paths: Vec<Vec<usize>>,
    #[serde(default)]
    pub context: DiagnosisContext,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<crate::Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisContext {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    /// Keyed by `"<pathIndex>.<nodeIndex>.<operation>"` → task name → the
    /// task's result map (spec.md §3).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operations: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
}

/// The per-Diagnosis cursor (spec.md §3/§4.2). `synchronized_tasks` gates
/// exactly-once accounting (spec.md §7): a task name is added to it the
/// moment its terminal phase is absorbed into `succeeded`/`failed`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub path_index: usize,
    pub node_index: usize,
    pub desired: u32,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synchronized_tasks: Vec<String>,
}

pub fn operations_key(path_index: usize, node_index: usize, operation: &str) -> String {
    format!("{path_index}.{node_index}.{operation}")
}
