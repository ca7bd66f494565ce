/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/operation.rs
*
* The `Operation` custom resource (spec.md §3): a cluster-scoped, immutable
* description of how to execute one processor — either an HTTP processor or
* a script runner, never both, never neither. Modeled the way crds.rs models
* `phRelease`'s `ReleaseStrategy` (a struct holding two `Option<...>` variant
* payloads alongside a discriminant), generalized here to a validated
* accessor instead of a bare discriminant field since spec.md §9 requires
* admission to "reject objects that set zero or two variants".
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
    kind = "Operation",
    scope = "Cluster",
    status = "OperationStatus",
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "op"
)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<ProcessorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_server: Option<HttpProcessorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_runner: Option<ScriptRunnerSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpProcessorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScriptRunnerSpec {
    pub script: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arg_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_result_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub host_path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<crate::Condition>,
}

pub const DEFAULT_TIMEOUT_SECONDS: u32 = 30;
pub const MIN_TIMEOUT_SECONDS: u32 = 1;

/// Exactly one processor variant, resolved from the raw spec. Construction
/// (not an admission webhook, which is out of scope per spec.md §1) is the
/// one enforcement point the core has; both master and agent call this
/// before trusting an Operation.
#[derive(Debug, Clone)]
pub enum Processor<'a> {
    Http(&'a HttpProcessorSpec),
    Script(&'a ScriptRunnerSpec),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Operation processor must set exactly one of httpServer/scriptRunner, found none")]
    NoProcessorVariant,
    #[error("Operation processor must set exactly one of httpServer/scriptRunner, found both")]
    MultipleProcessorVariants,
}

impl OperationSpec {
    pub fn processor_variant(&self) -> Result<Processor<'_>, ValidationError> {
        let Some(processor) = &self.processor else {
            return Err(ValidationError::NoProcessorVariant);
        };
        match (&processor.http_server, &processor.script_runner) {
            (Some(h), None) => Ok(Processor::Http(h)),
            (None, Some(s)) => Ok(Processor::Script(s)),
            (None, None) => Err(ValidationError::NoProcessorVariant),
            (Some(_), Some(_)) => Err(ValidationError::MultipleProcessorVariants),
        }
    }
}

impl HttpProcessorSpec {
    pub fn effective_timeout_seconds(&self) -> u32 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(MIN_TIMEOUT_SECONDS)
    }

    pub fn effective_scheme(&self) -> &str {
        self.scheme.as_deref().unwrap_or("http")
    }

    pub fn effective_path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

impl ScriptRunnerSpec {
    pub fn effective_timeout_seconds(&self) -> u32 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS).max(MIN_TIMEOUT_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_variants() {
        let spec = OperationSpec { processor: None, storage: None };
        assert_eq!(spec.processor_variant().unwrap_err(), ValidationError::NoProcessorVariant);
    }

    #[test]
    fn rejects_both_variants() {
        let spec = OperationSpec {
            processor: Some(ProcessorSpec {
                http_server: Some(HttpProcessorSpec {
                    address: None,
                    port: None,
                    path: None,
                    scheme: None,
                    timeout_seconds: None,
                }),
                script_runner: Some(ScriptRunnerSpec {
                    script: "echo hi".into(),
                    arg_keys: vec![],
                    operation_result_key: None,
                    timeout_seconds: None,
                }),
            }),
            storage: None,
        };
        assert_eq!(spec.processor_variant().unwrap_err(), ValidationError::MultipleProcessorVariants);
    }

    #[test]
    fn default_timeout_is_thirty_seconds_minimum_one() {
        let http = HttpProcessorSpec { address: None, port: None, path: None, scheme: None, timeout_seconds: None };
        assert_eq!(http.effective_timeout_seconds(), 30);
        let zero = HttpProcessorSpec { timeout_seconds: Some(0), ..http };
        assert_eq!(zero.effective_timeout_seconds(), 1);
    }
}
