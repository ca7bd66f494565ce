/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/trigger.rs
*
* The `Trigger` custom resource (spec.md §3/§4.4) plus the pure matching
* engine used by kubediag-master's Trigger Matcher. The matcher itself is
* kept free of any `kube`/HTTP types here so it's unit-testable against
* plain signal structs — the same separation spec.md §9 asks for when it
* treats processor/source-template variants as "closed tagged unions...
* reject objects that set zero or two variants at admission".
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kubediag.io",
    version = "v1",
    kind = "Trigger",
    scope = "Cluster",
    printcolumn = r#"{"name":"OperationSet", "type":"string", "jsonPath":".spec.operationSet"}"#,
    shortname = "trig"
)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSpec {
    pub operation_set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus_alert_template: Option<PrometheusAlertTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_event_template: Option<KubernetesEventTemplate>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Trigger must set exactly one of prometheusAlertTemplate/kubernetesEventTemplate, found none")]
    NoSourceVariant,
    #[error("Trigger must set exactly one of prometheusAlertTemplate/kubernetesEventTemplate, found both")]
    MultipleSourceVariants,
}

pub enum SourceTemplate<'a> {
    PrometheusAlert(&'a PrometheusAlertTemplate),
    KubernetesEvent(&'a KubernetesEventTemplate),
}

impl TriggerSpec {
    pub fn source_variant(&self) -> Result<SourceTemplate<'_>, ValidationError> {
        match (&self.prometheus_alert_template, &self.kubernetes_event_template) {
            (Some(p), None) => Ok(SourceTemplate::PrometheusAlert(p)),
            (None, Some(e)) => Ok(SourceTemplate::KubernetesEvent(e)),
            (None, None) => Err(ValidationError::NoSourceVariant),
            (Some(_), Some(_)) => Err(ValidationError::MultipleSourceVariants),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusAlertTemplate {
    #[serde(default)]
    pub regexp: AlertRegexpFields,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Label names whose values populate `Diagnosis.spec.targetSelector`
    /// and `spec.parameters` (spec.md §4.4 "Diagnosis materialisation").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_container_label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameter_labels: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertRegexpFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesEventTemplate {
    #[serde(default)]
    pub regexp: EventRegexpFields,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventRegexpFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_host: Option<String>,
}

// --- Signal shapes the matcher operates on. These are deliberately not the
// wire/k8s types themselves so the matcher stays pure and unit-testable. ---

#[derive(Debug, Clone, Default)]
pub struct AlertSignal {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: String,
    pub ends_at: String,
    pub generator_url: String,
    pub resolved: bool,
}

impl AlertSignal {
    pub fn alert_name(&self) -> &str {
        self.labels.get("alertname").map(String::as_str).unwrap_or("")
    }

    /// Prometheus's stable fingerprint is a content hash of the identifying
    /// labels; spec.md leaves the exact digest unspecified beyond "uint64" —
    /// we hash the sorted label set with the same FNV-1a used for the
    /// adjacency-list hash (see DESIGN.md Open Question resolution).
    pub fn fingerprint(&self) -> u64 {
        let mut buf = String::new();
        for (k, v) in &self.labels {
            buf.push_str(k);
            buf.push('=');
            buf.push_str(v);
            buf.push(';');
        }
        crate::hash::fnv1a_u64(buf.as_bytes())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventSignal {
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub message: String,
    pub source_component: String,
    pub source_host: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum MatchError {
    #[error("malformed regular expression '{pattern}': {source}")]
    InvalidPattern { pattern: String, #[source] source: regex::Error },
}

fn matches_field(pattern: &Option<String>, value: &str) -> Result<bool, MatchError> {
    match pattern {
        None => Ok(true),
        Some(p) if p.is_empty() => Ok(true),
        Some(p) => {
            let re = Regex::new(&anchor(p)).map_err(|source| MatchError::InvalidPattern { pattern: p.clone(), source })?;
            Ok(re.is_match(value))
        }
    }
}

fn anchor(pattern: &str) -> String {
    let has_start = pattern.starts_with('^');
    let has_end = pattern.ends_with('$');
    match (has_start, has_end) {
        (true, true) => pattern.to_string(),
        (true, false) => format!("{pattern}$"),
        (false, true) => format!("^{pattern}"),
        (false, false) => format!("^{pattern}$"),
    }
}

fn matches_structured(template: &BTreeMap<String, String>, signal: &BTreeMap<String, String>) -> Result<bool, MatchError> {
    for (key, pattern) in template {
        match signal.get(key) {
            None => return Ok(false),
            Some(value) => {
                if !matches_field(&Some(pattern.clone()), value)? {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

pub fn alert_matches(template: &PrometheusAlertTemplate, signal: &AlertSignal) -> Result<bool, MatchError> {
    Ok(matches_field(&template.regexp.alert_name, signal.alert_name())?
        && matches_field(&template.regexp.starts_at, &signal.starts_at)?
        && matches_field(&template.regexp.ends_at, &signal.ends_at)?
        && matches_field(&template.regexp.generator_url, &signal.generator_url)?
        && matches_structured(&template.labels, &signal.labels)?
        && matches_structured(&template.annotations, &signal.annotations)?)
}

pub fn event_matches(template: &KubernetesEventTemplate, signal: &EventSignal) -> Result<bool, MatchError> {
    Ok(matches_field(&template.regexp.name, &signal.name)?
        && matches_field(&template.regexp.namespace, &signal.namespace)?
        && matches_field(&template.regexp.reason, &signal.reason)?
        && matches_field(&template.regexp.message, &signal.message)?
        && matches_field(&template.regexp.source_component, &signal.source_component)?
        && matches_field(&template.regexp.source_host, &signal.source_host)?
        && matches_structured(&template.labels, &signal.labels)?
        && matches_structured(&template.annotations, &signal.annotations)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(alertname: &str) -> AlertSignal {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), alertname.to_string());
        AlertSignal { labels, ..Default::default() }
    }

    #[test]
    fn empty_pattern_matches_anything() {
        let template = PrometheusAlertTemplate::default();
        assert!(alert_matches(&template, &signal("HighMemory")).unwrap());
    }

    #[test]
    fn anchored_full_match_required() {
        let template = PrometheusAlertTemplate {
            regexp: AlertRegexpFields { alert_name: Some("High.*".to_string()), ..Default::default() },
            ..Default::default()
        };
        assert!(alert_matches(&template, &signal("HighMemory")).unwrap());
        assert!(!alert_matches(&template, &signal("xHighMemory")).unwrap());
    }

    #[test]
    fn structured_label_must_be_present_and_match() {
        let mut labels = BTreeMap::new();
        labels.insert("severity".to_string(), "critical".to_string());
        let template = PrometheusAlertTemplate { labels, ..Default::default() };
        assert!(!alert_matches(&template, &signal("X")).unwrap());
    }

    #[test]
    fn malformed_pattern_is_an_error_not_a_panic() {
        let template = PrometheusAlertTemplate {
            regexp: AlertRegexpFields { alert_name: Some("(unclosed".to_string()), ..Default::default() },
            ..Default::default()
        };
        assert!(alert_matches(&template, &signal("X")).is_err());
    }

    #[test]
    fn fingerprint_is_stable_for_same_labels() {
        assert_eq!(signal("X").fingerprint(), signal("X").fingerprint());
        assert_ne!(signal("X").fingerprint(), signal("Y").fingerprint());
    }
}
