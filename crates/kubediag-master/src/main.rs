/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/main.rs
*
* Entry point for the KubeDiag master binary: the cluster-singleton
* controller hosting the Graph Builder, Master Reconciler, Task
* result-absorption controller, and Trigger Matcher, plus a Prometheus
* `/metrics` endpoint. Structured the same way the teacher's operator
* `main.rs` is: initialize telemetry, build a client, run every subsystem
* concurrently with `tokio::join!`.
*
* SPDX-License-Identifier: Apache-2.0
*/

mod config;
mod controllers;
mod metrics;

use kube::Client;
use opentelemetry::global;
use opentelemetry_jaeger::Uninstall;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use warp::Filter;

/// Initializes the OpenTelemetry pipeline for Jaeger, the same pattern the
/// teacher's operator uses for distributed-tracing correlation across
/// reconcile spans.
fn init_telemetry() -> Result<Uninstall, Box<dyn std::error::Error>> {
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("kubediag-master")
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry().with(filter).with(telemetry).with(fmt_layer).try_init()?;

    Ok(global::shutdown_tracer_provider)
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer).expect("failed to encode metrics");
    let response = String::from_utf8(buffer).expect("metrics output is always valid utf8");
    Ok(warp::reply::with_header(response, "Content-Type", encoder.format_type()))
}

async fn run_metrics_server(registry: Arc<Registry>, port: u16) {
    let route = warp::path("metrics").and(warp::get()).and(warp::any().map(move || Arc::clone(&registry))).and_then(metrics_handler);
    info!("Starting metrics server on 0.0.0.0:{port}");
    warp::serve(route).run(([0, 0, 0, 0], port)).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let shutdown_tracer = init_telemetry()?;
    info!("Telemetry initialized.");

    let client = Client::try_default().await?;
    let config = config::Config::from_env();

    let registry = Arc::new(metrics::create_and_register_metrics()?);
    info!("Custom metrics registered.");

    info!("kubediag-master starting...");

    tokio::join!(
        run_metrics_server(registry.clone(), config.metrics_port),
        controllers::graph_builder::run(client.clone()),
        controllers::master_reconciler::run(client.clone()),
        controllers::task_sync_controller::run(client.clone()),
        controllers::trigger_matcher::run(client.clone(), config.clone()),
    );

    info!("kubediag-master shutting down.");
    let _ = shutdown_tracer;
    global::shutdown_tracer_provider();

    Ok(())
}
