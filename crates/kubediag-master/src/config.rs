/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/config.rs
*
* Operator knobs (spec.md §6), read from environment variables at startup
* the way main.rs reads `PROMETHEUS_ENDPOINT` — no CLI parser, since the
* teacher's operator binary never pulls one in either.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Default namespace Triggers materialise Diagnoses into.
    pub default_namespace: String,
    /// Whether the Alertmanager webhook route is mounted.
    pub alertmanager_enabled: bool,
    /// Repeat-suppression window for the fingerprint cache.
    pub repeat_interval: Duration,
    /// Port the `/metrics` endpoint listens on.
    pub metrics_port: u16,
    /// Port the `/api/v1/alerts` webhook listens on.
    pub webhook_port: u16,
    /// TTL surfaced for the external, out-of-scope GC collaborator (spec.md
    /// §1/§6) that reaps finished Diagnoses; the core never reads this
    /// itself, it only exposes the configured value (e.g. for annotating
    /// created Diagnoses) so that collaborator has a single source of truth.
    pub diagnosis_ttl: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let repeat_interval_seconds: u64 = env_or("KUBEDIAG_REPEAT_INTERVAL_SECONDS", "300")
            .parse()
            .unwrap_or(300);
        let metrics_port: u16 = env_or("KUBEDIAG_METRICS_PORT", "9090").parse().unwrap_or(9090);
        let webhook_port: u16 = env_or("KUBEDIAG_WEBHOOK_PORT", "8080").parse().unwrap_or(8080);
        let alertmanager_enabled = env_or("KUBEDIAG_ALERTMANAGER_ENABLED", "true") != "false";
        let diagnosis_ttl_seconds: u64 = env_or("KUBEDIAG_DIAGNOSIS_TTL_SECONDS", "86400").parse().unwrap_or(86400);

        Config {
            default_namespace: env_or("KUBEDIAG_DEFAULT_NAMESPACE", "default"),
            alertmanager_enabled,
            repeat_interval: Duration::from_secs(repeat_interval_seconds),
            metrics_port,
            webhook_port,
            diagnosis_ttl: Duration::from_secs(diagnosis_ttl_seconds),
        }
    }
}
