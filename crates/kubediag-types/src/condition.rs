/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/condition.rs
*
* A shared status-condition type, generalized from the `StatusCondition`
* struct in crds.rs (teacher: k8s/operators/ph_operator/src/crds.rs) to carry
* the extra fields (`status`, `reason`, `last_transition_time`) the pipeline
* engine's error taxonomy (spec.md §7) needs to distinguish, e.g.,
* `OperationSetNotFound` from `OperationSetChanged` at a glance.
*
* SPDX-License-Identifier: Apache-2.0
*/

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Condition {
    pub fn new(type_: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: ConditionStatus::True,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn at(mut self, timestamp: impl Into<String>) -> Self {
        self.last_transition_time = Some(timestamp.into());
        self
    }
}

/// The well-known condition reasons named throughout spec.md §4.2/§7.
pub mod reasons {
    pub const OPERATION_SET_NOT_FOUND: &str = "OperationSetNotFound";
    pub const OPERATION_SET_NOT_READY: &str = "OperationSetNotReady";
    pub const OPERATION_SET_CHANGED: &str = "OperationSetChanged";
    pub const DIAGNOSIS_COMPLETE: &str = "DiagnosisComplete";
    pub const OPERATION_NOT_FOUND: &str = "OperationNotFound";
    pub const PROCESSOR_ERROR: &str = "ProcessorError";
    pub const TASK_TIMEOUT: &str = "TaskTimeout";
    pub const MISSING_TARGET_SELECTOR: &str = "MissingTargetSelector";
}
