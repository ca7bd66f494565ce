/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/controllers/graph_builder.rs
*
* Wraps `kubediag_types::graph::build_paths` with the object-store
* read/status-write/requeue plumbing (spec.md §4.1). A thin `Controller`
* watch over `OperationSet` enqueues unready sets onto a bounded channel;
* a single consumer task drains it and performs one build per set, mirroring
* autoheal_controller's split between the `Controller` reconcile and the
* long-lived task it spawns alongside it.
*
* SPDX-License-Identifier: Apache-2.0
*/

use futures::stream::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, ResourceExt,
};
use kubediag_types::condition::{reasons, Condition};
use kubediag_types::graph::{build_paths, GraphError};
use kubediag_types::{OperationSet, OperationSetStatus};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{error, field, info, instrument, warn, Span};

use crate::metrics::GRAPH_BUILDER_RESULTS_TOTAL;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("OperationSet {0} has no name")]
    MissingName(String),
}

struct Context {
    client: Client,
}

/// The channel capacity for unready sets awaiting a build (spec.md §4.1
/// "single-goroutine consumer reading a buffered channel"). A full channel
/// never drops a sender; the reconciler requeues instead (spec.md §5).
const UNREADY_SET_CHANNEL_CAPACITY: usize = 256;

/// Runs the OperationSet watch (enqueues unready sets) and the Graph
/// Builder consumer concurrently, the same `tokio::select!` pairing
/// `autoheal_controller::run` uses for its reconciler and webhook server.
pub async fn run(client: Client) {
    let (tx, rx) = mpsc::channel::<OperationSet>(UNREADY_SET_CHANNEL_CAPACITY);
    let sets: Api<OperationSet> = Api::all(client.clone());

    let consumer = build_consumer(client.clone(), rx);

    let controller = Controller::new(sets, watcher::Config::default())
        .run(reconcile, error_policy, Arc::new((Context { client }, tx)))
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled OperationSet: {:?}", o),
                Err(e) => warn!("OperationSet reconcile error: {}", e),
            }
        });

    tokio::select! {
        _ = consumer => warn!("Graph Builder consumer task has unexpectedly exited."),
        _ = controller => warn!("OperationSet controller has unexpectedly exited."),
    }
}

/// Enqueues any OperationSet observed with `status.ready == false`. This is
/// the only job of the watch-side reconciler; the actual build happens in
/// the consumer task so a slow build never blocks the watch.
#[instrument(skip(set, ctx), fields(name = field::Empty))]
async fn reconcile(set: Arc<OperationSet>, ctx: Arc<(Context, mpsc::Sender<OperationSet>)>) -> Result<Action, Error> {
    let name = set.name_any();
    Span::current().record("name", &name);

    let ready = set.status.as_ref().map(|s| s.ready).unwrap_or(false);
    if ready {
        return Ok(Action::await_change());
    }

    let (_, tx) = &*ctx;
    if tx.try_send((*set).clone()).is_err() {
        // Channel full: never drop, requeue shortly instead (spec.md §5).
        warn!(name = %name, "unready-set channel full, requeueing");
        return Ok(Action::requeue(Duration::from_secs(2)));
    }

    Ok(Action::await_change())
}

fn error_policy(_set: Arc<OperationSet>, error: &Error, _ctx: Arc<(Context, mpsc::Sender<OperationSet>)>) -> Action {
    warn!("OperationSet reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(15))
}

async fn build_consumer(client: Client, mut rx: mpsc::Receiver<OperationSet>) {
    let api: Api<OperationSet> = Api::all(client);
    while let Some(set) = rx.recv().await {
        if let Err(e) = build_one(&api, &set).await {
            error!(error = %e, "failed to write Graph Builder status");
        }
    }
}

#[instrument(skip(api, set), fields(name = field::Empty))]
async fn build_one(api: &Api<OperationSet>, set: &OperationSet) -> Result<(), Error> {
    let name = set.name_any();
    Span::current().record("name", &name);

    match build_paths(&set.spec.adjacency_list) {
        Ok(paths) => {
            GRAPH_BUILDER_RESULTS_TOTAL.with_label_values(&["success"]).inc();
            let status = OperationSetStatus { ready: true, paths, conditions: vec![] };
            patch_status(api, &name, status).await?;
            info!(name = %name, "OperationSet graph built");
        }
        Err(err) => {
            GRAPH_BUILDER_RESULTS_TOTAL.with_label_values(&["error"]).inc();
            let condition = Condition::new("Ready", reason_for(&err), err.to_string());
            let status = OperationSetStatus { ready: false, paths: vec![], conditions: vec![condition] };
            patch_status(api, &name, status).await?;
            warn!(name = %name, error = %err, "OperationSet graph invalid");
        }
    }
    Ok(())
}

fn reason_for(err: &GraphError) -> &'static str {
    match err {
        GraphError::EmptyGraph => "EmptyAdjacencyList",
        GraphError::InvalidStart => "InvalidStartNode",
        GraphError::Unreachable(_) => "UnreachableNode",
        GraphError::Cycle => "CyclicGraph",
    }
}

async fn patch_status(api: &Api<OperationSet>, name: &str, status: OperationSetStatus) -> Result<(), Error> {
    let patch = serde_json::json!({
        "apiVersion": "kubediag.io/v1",
        "kind": "OperationSet",
        "status": status,
    });
    let ps = PatchParams::apply("kubediag-graph-builder").force();
    api.patch_status(name, &ps, &Patch::Apply(patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_for_every_graph_error_is_a_distinct_string() {
        assert_eq!(reason_for(&GraphError::EmptyGraph), "EmptyAdjacencyList");
        assert_eq!(reason_for(&GraphError::InvalidStart), "InvalidStartNode");
        assert_eq!(reason_for(&GraphError::Unreachable(3)), "UnreachableNode");
        assert_eq!(reason_for(&GraphError::Cycle), "CyclicGraph");
    }
}
