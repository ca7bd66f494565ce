/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/controllers/master_reconciler.rs
*
* The Master Reconciler (spec.md §4.2): the authoritative lifecycle owner of
* a Diagnosis. Target resolution, the hash guard and the checkpoint walk are
* pure functions (`kubediag_types::checkpoint`/`selector`/`hash`); this file
* drives them against the live `Api<Diagnosis>`/`Api<OperationSet>`/
* `Api<Task>`, the same split `autoheal_controller::reconcile` makes between
* its finalizer closure and the pure-ish action-execution helpers it calls.
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::Utc;
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::{
    api::{Api, ListParams, Patch, PatchParams, PostParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher,
    },
    Client, Resource, ResourceExt,
};
use kubediag_types::checkpoint::{self, CheckpointAction};
use kubediag_types::condition::{reasons, Condition};
use kubediag_types::diagnosis::operations_key;
use kubediag_types::selector::{dedup_preserve_order, pod_host, resolved_form, ResolvedForm};
use kubediag_types::task::task_name;
use kubediag_types::{Diagnosis, DiagnosisPhase, DiagnosisStatus, OperationSet, Task, TaskPhase, TaskSpec, TaskStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

use crate::metrics::{DIAGNOSES_TERMINAL_TOTAL, RECONCILE_LATENCY_SECONDS};

pub const FINALIZER_NAME: &str = "diagnoses.kubediag.io/task-cleanup";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Diagnosis {0} has no namespace")]
    MissingNamespace(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] kubediag_types::checkpoint::CheckpointError),
}

pub struct Context {
    pub client: Client,
}

pub async fn run(client: Client) {
    let diagnoses: Api<Diagnosis> = Api::all(client.clone());
    let ctx = Arc::new(Context { client });

    Controller::new(diagnoses, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled Diagnosis: {:?}", o),
                Err(e) => warn!("Diagnosis reconcile error: {}", e),
            }
        })
        .await;
}

#[instrument(skip(diag, ctx), fields(name = field::Empty, namespace = field::Empty))]
async fn reconcile(diag: Arc<Diagnosis>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = diag.namespace().ok_or_else(|| Error::MissingNamespace(diag.name_any()))?;
    let name = diag.name_any();
    Span::current().record("name", &name).record("namespace", &ns);

    let timer = RECONCILE_LATENCY_SECONDS.start_timer();
    let api: Api<Diagnosis> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&api, FINALIZER_NAME, diag, |event| async {
        match event {
            FinalizerEvent::Apply(diag) => reconcile_diagnosis(&diag, &ctx, &ns).await,
            FinalizerEvent::Cleanup(diag) => cleanup(&diag, &ctx, &ns).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(e.into()));

    timer.observe_duration();
    result
}

fn error_policy(_diag: Arc<Diagnosis>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Diagnosis reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(10))
}

/// Task objects cascade-delete via owner references; this finalizer exists
/// to give a clean hook for any future master-local per-Diagnosis state,
/// mirroring `autoheal_controller`'s cache-cleanup finalizer even though
/// today it has nothing extra to remove.
async fn cleanup(_diag: &Diagnosis, _ctx: &Context, _ns: &str) -> Result<Action, Error> {
    Ok(Action::await_change())
}

async fn reconcile_diagnosis(diag: &Diagnosis, ctx: &Context, ns: &str) -> Result<Action, Error> {
    let api: Api<Diagnosis> = Api::namespaced(ctx.client.clone(), ns);
    let name = diag.name_any();
    let status = diag.status.clone().unwrap_or_default();

    match status.phase {
        None => transition_from_empty(&api, diag, &name).await,
        Some(DiagnosisPhase::Pending) => transition_from_pending(&api, ctx, diag, &name, ns).await,
        Some(DiagnosisPhase::Running) => transition_from_running(&api, ctx, diag, &name, ns).await,
        Some(DiagnosisPhase::Succeeded) | Some(DiagnosisPhase::Failed) => Ok(Action::await_change()),
    }
}

/// `empty -> Failed | Pending` (spec.md §4.2 state table).
async fn transition_from_empty(api: &Api<Diagnosis>, diag: &Diagnosis, name: &str) -> Result<Action, Error> {
    let mut status = DiagnosisStatus::default();
    status.start_time = Some(Utc::now().to_rfc3339());

    if diag.spec.target_selector.is_none() {
        status.phase = Some(DiagnosisPhase::Failed);
        status.conditions.push(Condition::new("Ready", reasons::MISSING_TARGET_SELECTOR, "spec.targetSelector is absent"));
        DIAGNOSES_TERMINAL_TOTAL.with_label_values(&["Failed"]).inc();
    } else {
        status.phase = Some(DiagnosisPhase::Pending);
    }

    patch_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_secs(1)))
}

/// `Pending -> Running`: resolve target nodes, copy parameters into context
/// (spec.md §4.2). The master is authoritative for this edge (spec.md §9
/// Open Question (a), resolved: master marks Running, not the agent).
async fn transition_from_pending(
    api: &Api<Diagnosis>,
    ctx: &Context,
    diag: &Diagnosis,
    name: &str,
    ns: &str,
) -> Result<Action, Error> {
    let mut status = diag.status.clone().unwrap_or_default();
    let node_names = resolve_targets(ctx, diag, ns).await?;

    status.node_names = node_names;
    status.context.parameters = diag.spec.parameters.clone();
    status.phase = Some(DiagnosisPhase::Running);

    patch_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_secs(1)))
}

/// `Running -> Running | Succeeded | Failed`: the hash guard plus the
/// checkpoint walk (spec.md §4.2).
async fn transition_from_running(
    api: &Api<Diagnosis>,
    ctx: &Context,
    diag: &Diagnosis,
    name: &str,
    ns: &str,
) -> Result<Action, Error> {
    let sets: Api<OperationSet> = Api::all(ctx.client.clone());
    let Ok(set) = sets.get(&diag.spec.operation_set).await else {
        return fail(api, diag, name, reasons::OPERATION_SET_NOT_FOUND, "referenced OperationSet not found").await;
    };

    let set_status = match set.status.as_ref() {
        Some(s) if s.ready => s,
        _ => return fail(api, diag, name, reasons::OPERATION_SET_NOT_READY, "referenced OperationSet is not ready").await,
    };

    let current_hash = kubediag_types::hash::adjacency_list_hash(&set.spec.adjacency_list);
    let mut status = diag.status.clone().unwrap_or_default();
    let labels = diag.labels();
    match labels.get(kubediag_types::hash::ADJACENCY_LIST_HASH_LABEL) {
        None => {
            // First Running reconcile: copy the hash (spec.md §4.2 "Hash guard").
            set_hash_label(api, name, &current_hash).await?;
            return Ok(Action::requeue(Duration::from_secs(1)));
        }
        Some(stored) if stored != &current_hash => {
            return fail(api, diag, name, reasons::OPERATION_SET_CHANGED, "OperationSet adjacency list changed mid-run").await;
        }
        Some(_) => {}
    }

    let action = checkpoint::decide(&status, &set_status.paths, status.node_names.len())?;
    match action {
        CheckpointAction::Initialize => {
            status.checkpoint = Some(checkpoint::initialize_checkpoint());
            patch_status(api, name, status).await?;
        }
        CheckpointAction::SetDesired { desired } => {
            let mut cp = status.checkpoint.clone().unwrap_or_else(checkpoint::initialize_checkpoint);
            cp.desired = desired;
            status.checkpoint = Some(cp);
            patch_status(api, name, status).await?;
        }
        CheckpointAction::CreateTasks { path_index, node_index, operation } => {
            create_missing_tasks(ctx, diag, &mut status, ns, path_index, node_index, operation, &set).await?;
            patch_status(api, name, status).await?;
        }
        CheckpointAction::AdvanceOnNodeSuccess => {
            match checkpoint::advance_on_success(&mut status, &set_status.paths) {
                kubediag_types::checkpoint::NodeOutcome::DiagnosisSucceeded => {
                    status.phase = Some(DiagnosisPhase::Succeeded);
                    status.conditions.push(Condition::new("Complete", reasons::DIAGNOSIS_COMPLETE, "diagnosis completed successfully"));
                    DIAGNOSES_TERMINAL_TOTAL.with_label_values(&["Succeeded"]).inc();
                }
                kubediag_types::checkpoint::NodeOutcome::AdvancedToNextNode => {}
            }
            patch_status(api, name, status).await?;
        }
        CheckpointAction::AdvanceOnNodeFailure => {
            match checkpoint::advance_on_failure(&mut status, &set_status.paths) {
                kubediag_types::checkpoint::PathOutcome::DiagnosisFailed => {
                    status.phase = Some(DiagnosisPhase::Failed);
                    DIAGNOSES_TERMINAL_TOTAL.with_label_values(&["Failed"]).inc();
                }
                kubediag_types::checkpoint::PathOutcome::AdvancedToNextPath => {}
            }
            patch_status(api, name, status).await?;
        }
        CheckpointAction::Wait => {
            return Ok(Action::requeue(Duration::from_secs(5)));
        }
    }

    Ok(Action::requeue(Duration::from_secs(1)))
}

async fn fail(api: &Api<Diagnosis>, diag: &Diagnosis, name: &str, reason: &str, message: &str) -> Result<Action, Error> {
    let mut status = diag.status.clone().unwrap_or_default();
    status.phase = Some(DiagnosisPhase::Failed);
    status.conditions.push(Condition::new("Ready", reason, message));
    DIAGNOSES_TERMINAL_TOTAL.with_label_values(&["Failed"]).inc();
    patch_status(api, name, status).await?;
    Ok(Action::requeue(Duration::from_secs(1)))
}

/// Target resolution (spec.md §4.2): first non-empty form wins, in order
/// node selector → explicit node names → pod selector → pod references.
async fn resolve_targets(ctx: &Context, diag: &Diagnosis, ns: &str) -> Result<Vec<String>, Error> {
    let Some(selector) = &diag.spec.target_selector else {
        return Ok(Vec::new());
    };

    let names = match resolved_form(selector) {
        ResolvedForm::NodeSelector(labels) => {
            let nodes: Api<Node> = Api::all(ctx.client.clone());
            let selector_str = join_label_selector(labels);
            let list = nodes.list(&ListParams::default().labels(&selector_str)).await?;
            list.items.into_iter().map(|n| n.name_any()).collect()
        }
        ResolvedForm::NodeNames(names) => names.to_vec(),
        ResolvedForm::PodSelector(labels) => {
            let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), ns);
            let selector_str = join_label_selector(labels);
            let list = pods.list(&ListParams::default().labels(&selector_str)).await?;
            list.items.iter().filter_map(pod_host).collect()
        }
        ResolvedForm::PodReferences(refs) => {
            let mut out = Vec::new();
            for r in refs {
                let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &r.namespace);
                if let Ok(pod) = pods.get(&r.name).await {
                    if let Some(host) = pod_host(&pod) {
                        out.push(host);
                    }
                }
            }
            out
        }
        ResolvedForm::None => Vec::new(),
    };

    Ok(dedup_preserve_order(names))
}

fn join_label_selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",")
}

async fn set_hash_label(api: &Api<Diagnosis>, name: &str, hash: &str) -> Result<(), Error> {
    let patch = serde_json::json!({
        "metadata": {
            "labels": { kubediag_types::hash::ADJACENCY_LIST_HASH_LABEL: hash }
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_missing_tasks(
    ctx: &Context,
    diag: &Diagnosis,
    status: &mut DiagnosisStatus,
    ns: &str,
    path_index: usize,
    node_index: usize,
    operation_node: usize,
    set: &OperationSet,
) -> Result<(), Error> {
    let Some(operation) = set.spec.adjacency_list.get(operation_node).and_then(|n| n.operation.clone()) else {
        return Ok(());
    };

    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), ns);
    let uid = diag.uid().unwrap_or_default();
    let diag_name = diag.name_any();
    let mut created = 0u32;

    for node in &status.node_names.clone() {
        let name = task_name(&diag_name, &uid, node, path_index, node_index, &operation);
        if tasks.get(&name).await.is_ok() {
            continue;
        }

        let task = Task {
            metadata: kube::api::ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(ns.to_string()),
                owner_references: Some(vec![diag.controller_owner_ref(&()).expect("Diagnosis has name/uid")]),
                ..Default::default()
            },
            spec: TaskSpec {
                operation: operation.clone(),
                node_name: Some(node.clone()),
                pod_reference: None,
                parameters: status.context.parameters.clone(),
            },
            status: None,
        };

        match tasks.create(&PostParams::default(), &task).await {
            Ok(_) => created += 1,
            Err(kube::Error::Api(e)) if e.code == 409 => created += 1,
            Err(e) => return Err(Error::KubeError(e)),
        }

        // spec.md §4.2 step 4 creates a task "Pending"; spec.md §4.3 "Claim
        // rule" makes the master (not the agent) the sole writer of the
        // Pending -> Running edge. Both status writes happen here, back to
        // back, since the master has already decided this task must run now.
        set_task_phase(&tasks, &name, TaskPhase::Pending).await?;
        set_task_phase(&tasks, &name, TaskPhase::Running).await?;
    }

    let key = operations_key(path_index, node_index, &operation);
    status.context.operations.entry(key).or_default();

    let cp = status.checkpoint.as_mut().expect("CreateTasks action implies a checkpoint");
    cp.active += created;
    Ok(())
}

async fn set_task_phase(tasks: &Api<Task>, name: &str, phase: TaskPhase) -> Result<(), Error> {
    let status = TaskStatus { phase: Some(phase), ..Default::default() };
    let patch = serde_json::json!({
        "apiVersion": "kubediag.io/v1",
        "kind": "Task",
        "status": status,
    });
    let ps = PatchParams::apply("kubediag-master-reconciler").force();
    tasks.patch_status(name, &ps, &Patch::Apply(patch)).await?;
    Ok(())
}

async fn patch_status(api: &Api<Diagnosis>, name: &str, status: DiagnosisStatus) -> Result<(), Error> {
    let patch = serde_json::json!({
        "apiVersion": "kubediag.io/v1",
        "kind": "Diagnosis",
        "status": status,
    });
    let ps = PatchParams::apply("kubediag-master-reconciler").force();
    api.patch_status(name, &ps, &Patch::Apply(patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_label_selector_formats_sorted_pairs() {
        let mut labels = BTreeMap::new();
        labels.insert("a".to_string(), "1".to_string());
        labels.insert("b".to_string(), "2".to_string());
        assert_eq!(join_label_selector(&labels), "a=1,b=2");
    }
}
