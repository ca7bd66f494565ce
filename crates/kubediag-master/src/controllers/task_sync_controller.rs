/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/controllers/task_sync_controller.rs
*
* Task result absorption (spec.md §4.2 "a separate controller reacting to
* Task phase changes"): watches `Task`, and on a terminal phase not yet
* recorded in the parent Diagnosis's `synchronizedTasks`, folds the result
* into the Diagnosis's checkpoint and `context.operations`. Exactly-once
* accounting is enforced by `kubediag_types::checkpoint::absorb_task_result`.
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
use kubediag_types::diagnosis::operations_key;
use kubediag_types::{Diagnosis, DiagnosisStatus, Task, TaskPhase};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Task {0} has no namespace")]
    MissingNamespace(String),
    #[error("Task {0} has no owning Diagnosis")]
    NoOwner(String),
}

struct Context {
    client: Client,
}

pub async fn run(client: Client) {
    let tasks: Api<Task> = Api::all(client.clone());
    let ctx = Arc::new(Context { client });

    Controller::new(tasks, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled Task: {:?}", o),
                Err(e) => warn!("Task sync error: {}", e),
            }
        })
        .await;
}

#[instrument(skip(task, ctx), fields(name = field::Empty, namespace = field::Empty))]
async fn reconcile(task: Arc<Task>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = task.namespace().ok_or_else(|| Error::MissingNamespace(task.name_any()))?;
    let name = task.name_any();
    Span::current().record("name", &name).record("namespace", &ns);

    let Some(phase) = task.status.as_ref().and_then(|s| s.phase.as_ref()) else {
        return Ok(Action::await_change());
    };
    if !phase.is_terminal() {
        return Ok(Action::await_change());
    }

    let diag_name = owning_diagnosis(&task).ok_or_else(|| Error::NoOwner(name.clone()))?;
    let diagnoses: Api<Diagnosis> = Api::namespaced(ctx.client.clone(), &ns);
    let diag = diagnoses.get(&diag_name).await?;
    let mut status = diag.status.clone().unwrap_or_default();

    let Some(cp) = status.checkpoint.as_mut() else {
        return Ok(Action::requeue(Duration::from_secs(2)));
    };

    let succeeded = matches!(phase, TaskPhase::Succeeded);
    let absorbed = kubediag_types::checkpoint::absorb_task_result(cp, &name, succeeded);
    if !absorbed {
        return Ok(Action::await_change());
    }

    if succeeded {
        record_results(&mut status, &task);
    }

    patch_status(&diagnoses, &diag_name, status).await?;
    info!(task = %name, diagnosis = %diag_name, succeeded, "absorbed task result");
    Ok(Action::await_change())
}

fn error_policy(_task: Arc<Task>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Task sync reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(10))
}

fn owning_diagnosis(task: &Task) -> Option<String> {
    task.metadata.owner_references.as_ref()?.iter().find(|o| o.kind == "Diagnosis").map(|o| o.name.clone())
}

fn record_results(status: &mut DiagnosisStatus, task: &Task) {
    let Some(cp) = &status.checkpoint else { return };
    let Some(task_status) = &task.status else { return };

    let key = operations_key(cp.path_index, cp.node_index, &task.spec.operation);
    status
        .context
        .operations
        .entry(key)
        .or_default()
        .insert(task.name_any(), task_status.results.clone());
}

async fn patch_status(api: &Api<Diagnosis>, name: &str, status: DiagnosisStatus) -> Result<(), Error> {
    let patch = serde_json::json!({
        "apiVersion": "kubediag.io/v1",
        "kind": "Diagnosis",
        "status": status,
    });
    let ps = PatchParams::apply("kubediag-task-sync-controller").force();
    api.patch_status(name, &ps, &Patch::Apply(patch)).await?;
    Ok(())
}
