/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/metrics.rs
*
* Operator-internal Prometheus metrics (SPEC_FULL.md §1/§3), the same
* lazy_static + prometheus registry pattern as the teacher's metrics.rs,
* renamed from PhgitPreview/Rollout counters to the pipeline engine's own
* subsystems (Graph Builder outcomes, reconcile latency, webhook counters).
*
* SPDX-License-Identifier: Apache-2.0
*/

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_counter_vec, Histogram,
    IntCounter, IntCounterVec, Registry,
};

lazy_static! {
    /// Graph Builder outcomes, one increment per OperationSet sync (spec.md
    /// §4.1: "Each sync increments success/skip/error counters").
    pub static ref GRAPH_BUILDER_RESULTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kubediag_graph_builder_results_total",
        "Total number of Graph Builder syncs, labeled by outcome.",
        &["outcome"]
    )
    .unwrap();

    /// Master Reconciler latency per Diagnosis reconcile call.
    pub static ref RECONCILE_LATENCY_SECONDS: Histogram = register_histogram!(
        "kubediag_master_reconcile_latency_seconds",
        "Latency of a single Diagnosis reconcile invocation.",
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .unwrap();

    /// Diagnoses transitioned to a terminal phase, labeled by phase.
    pub static ref DIAGNOSES_TERMINAL_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kubediag_diagnoses_terminal_total",
        "Total number of Diagnoses that reached a terminal phase.",
        &["phase"]
    )
    .unwrap();

    /// Alerts received by the webhook, before fingerprint suppression.
    pub static ref ALERTS_RECEIVED_TOTAL: IntCounter = register_int_counter!(opts!(
        "kubediag_trigger_alerts_received_total",
        "Total number of alerts received on the Alertmanager webhook."
    ))
    .unwrap();

    /// Alerts suppressed by the fingerprint repeat-interval cache.
    pub static ref ALERTS_SUPPRESSED_TOTAL: IntCounter = register_int_counter!(opts!(
        "kubediag_trigger_alerts_suppressed_total",
        "Total number of alerts suppressed by the repeat-interval cache."
    ))
    .unwrap();

    /// Diagnoses materialised by the Trigger Matcher, labeled by source.
    pub static ref DIAGNOSES_MATERIALISED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kubediag_trigger_diagnoses_materialised_total",
        "Total number of Diagnoses created by the Trigger Matcher.",
        &["source"]
    )
    .unwrap();
}

/// Creates a new Prometheus registry and registers all master metrics.
/// Intended to be called once at startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(GRAPH_BUILDER_RESULTS_TOTAL.clone()))?;
    r.register(Box::new(RECONCILE_LATENCY_SECONDS.clone()))?;
    r.register(Box::new(DIAGNOSES_TERMINAL_TOTAL.clone()))?;
    r.register(Box::new(ALERTS_RECEIVED_TOTAL.clone()))?;
    r.register(Box::new(ALERTS_SUPPRESSED_TOTAL.clone()))?;
    r.register(Box::new(DIAGNOSES_MATERIALISED_TOTAL.clone()))?;
    Ok(r)
}
