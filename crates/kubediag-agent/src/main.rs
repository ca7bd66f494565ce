/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/main.rs
*
* Entry point for the KubeDiag agent binary: the per-node singleton hosting
* the Task claim/execution loop and the Operation script-mirroring
* lifecycle, run concurrently the same way the master binary joins its
* subsystems.
*
* SPDX-License-Identifier: Apache-2.0
*/

mod config;
mod executor;
mod processors;
mod script_store;

use kube::Client;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_telemetry() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry();

    let client = Client::try_default().await?;
    let config = config::Config::from_env();

    info!(node = %config.node_name, "kubediag-agent starting...");

    tokio::join!(executor::run(client.clone(), config.clone()), script_store::run(client, config.scripts_dir()),);

    info!("kubediag-agent shutting down.");
    Ok(())
}
