/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/task.rs
*
* The `Task` custom resource (spec.md §3/§4.3): one (node × operation) step
* of a Diagnosis, created by the master and claimed by the agent on the
* matching node. Owned via owner reference by its Diagnosis (cascade
* deletion), the same ownership idiom `execute_runbook_action` uses when it
* sets `rule.controller_owner_ref(&())` on the Jobs it creates.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::diagnosis::PodReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kubediag.io",
    version = "v1",
    kind = "Task",
    namespaced,
    status = "TaskStatus",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Operation", "type":"string", "jsonPath":".spec.operation"}"#,
    shortname = "kdt"
)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_reference: Option<PodReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum TaskPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl TaskPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskPhase::Succeeded | TaskPhase::Failed)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<TaskPhase>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub results: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<crate::Condition>,
}

/// Deterministic Task name (spec.md §3):
/// `"<diagnosis>.<uid8>.<node>.<pathIdx>.<nodeIdx>.<operation>"`. Determinism
/// here is what makes task creation idempotent (spec.md §4.2 step 4,
/// "create any missing tasks") and re-processing safe (spec.md §4.3
/// "Idempotence").
pub fn task_name(
    diagnosis_name: &str,
    diagnosis_uid: &str,
    node_name: &str,
    path_index: usize,
    node_index: usize,
    operation: &str,
) -> String {
    let uid8: String = diagnosis_uid.chars().filter(|c| *c != '-').take(8).collect();
    format!("{diagnosis_name}.{uid8}.{node_name}.{path_index}.{node_index}.{operation}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_is_deterministic() {
        let a = task_name("diag-a", "1234-5678-90ab", "node-1", 0, 2, "collect-logs");
        let b = task_name("diag-a", "1234-5678-90ab", "node-1", 0, 2, "collect-logs");
        assert_eq!(a, b);
        assert_eq!(a, "diag-a.12345678.node-1.0.2.collect-logs");
    }
}
