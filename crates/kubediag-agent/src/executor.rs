/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/executor.rs
*
* The Agent Task Executor (spec.md §4.3): claims Tasks whose target node
* equals the local node, dispatches them to the right processor under a
* timeout, and writes results back exactly once. Modeled as a `Controller`
* watch the same way every teacher controller is: one reconcile function,
* one error policy, run concurrently with the script mirror.
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::Utc;
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
use kubediag_types::operation::Processor;
use kubediag_types::selector::pod_host;
use kubediag_types::{Diagnosis, Operation, Task, TaskPhase, TaskStatus};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

use crate::config::Config;
use crate::processors::{http, script};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Task {0} has no namespace")]
    MissingNamespace(String),
}

struct Context {
    client: Client,
    config: Config,
}

pub async fn run(client: Client, config: Config) {
    let tasks: Api<Task> = Api::all(client.clone());
    let ctx = Arc::new(Context { client, config });

    Controller::new(tasks, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled Task: {:?}", o),
                Err(e) => warn!("Task executor error: {}", e),
            }
        })
        .await;
}

fn error_policy(_task: Arc<Task>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("Task executor reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(10))
}

#[instrument(skip(task, ctx), fields(name = field::Empty, namespace = field::Empty))]
async fn reconcile(task: Arc<Task>, ctx: Arc<Context>) -> Result<Action, Error> {
    let ns = task.namespace().ok_or_else(|| Error::MissingNamespace(task.name_any()))?;
    let name = task.name_any();
    Span::current().record("name", &name).record("namespace", &ns);

    if !claimable(&task, &ctx.config.node_name, &ctx.client).await {
        return Ok(Action::await_change());
    }

    let phase = task.status.as_ref().and_then(|s| s.phase.clone());
    match phase {
        // The master is responsible for Pending -> Running; the agent only
        // ever acts once a task is Running (spec.md §4.3 "Claim rule").
        Some(TaskPhase::Running) => execute(&task, &ctx, &ns).await,
        Some(phase) if phase.is_terminal() => Ok(Action::await_change()),
        _ => Ok(Action::requeue(Duration::from_secs(2))),
    }
}

/// A task is claimable iff its node name matches the local node, or its pod
/// reference resolves to the local node (spec.md §4.3 "Claim rule").
async fn claimable(task: &Task, local_node: &str, client: &Client) -> bool {
    if let Some(node_name) = &task.spec.node_name {
        return node_name == local_node;
    }
    if let Some(pod_ref) = &task.spec.pod_reference {
        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client.clone(), &pod_ref.namespace);
        if let Ok(pod) = pods.get(&pod_ref.name).await {
            return pod_host(&pod).as_deref() == Some(local_node);
        }
    }
    false
}

async fn execute(task: &Task, ctx: &Context, ns: &str) -> Result<Action, Error> {
    let tasks: Api<Task> = Api::namespaced(ctx.client.clone(), ns);
    let name = task.name_any();

    let operations: Api<Operation> = Api::all(ctx.client.clone());
    let operation = match operations.get(&task.spec.operation).await {
        Ok(op) => op,
        Err(_) => {
            return finish(&tasks, &name, TaskPhase::Failed, BTreeMap::new(), reasons::OPERATION_NOT_FOUND, "referenced Operation not found").await;
        }
    };

    let context_parameters = context_parameters(ctx, task, ns).await;
    let merged = merge_parameters(&context_parameters, &task.spec.parameters);

    let processor = match operation.spec.processor_variant() {
        Ok(p) => p,
        Err(_) => {
            return finish(&tasks, &name, TaskPhase::Failed, BTreeMap::new(), reasons::OPERATION_NOT_FOUND, "Operation has an invalid processor variant").await;
        }
    };

    match processor {
        Processor::Http(spec) => match http::dispatch(spec, &ctx.config.advertised_address, ctx.config.advertised_port, &merged, &context_parameters).await {
            Ok(results) => finish(&tasks, &name, TaskPhase::Succeeded, results, "Complete", "processor call succeeded").await,
            Err(e) => finish(&tasks, &name, TaskPhase::Failed, BTreeMap::new(), reasons::PROCESSOR_ERROR, &e.to_string()).await,
        },
        Processor::Script(spec) => match script::dispatch(spec, &task.spec.operation, &ctx.config.scripts_dir(), &merged).await {
            Ok(results) => finish(&tasks, &name, TaskPhase::Succeeded, results, "Complete", "script exited successfully").await,
            Err(script::ScriptProcessorError::Timeout(_)) => {
                finish(&tasks, &name, TaskPhase::Failed, BTreeMap::new(), reasons::TASK_TIMEOUT, "script exceeded its deadline").await
            }
            Err(script::ScriptProcessorError::NonZeroExit(code, results)) => {
                finish(&tasks, &name, TaskPhase::Failed, results, reasons::PROCESSOR_ERROR, &format!("script exited with non-zero status {code}")).await
            }
            Err(e) => finish(&tasks, &name, TaskPhase::Failed, BTreeMap::new(), reasons::PROCESSOR_ERROR, &e.to_string()).await,
        },
    }
}

/// Parameters shadow context on key collisions (spec.md §4.3 step 2).
fn merge_parameters(context: &BTreeMap<String, String>, task_params: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = context.clone();
    merged.extend(task_params.clone());
    merged
}

async fn context_parameters(ctx: &Context, task: &Task, ns: &str) -> BTreeMap<String, String> {
    let Some(diag_name) = owning_diagnosis(task) else {
        return BTreeMap::new();
    };
    let diagnoses: Api<Diagnosis> = Api::namespaced(ctx.client.clone(), ns);
    diagnoses.get(&diag_name).await.ok().and_then(|d| d.status).map(|s| s.context.parameters).unwrap_or_default()
}

fn owning_diagnosis(task: &Task) -> Option<String> {
    task.metadata.owner_references.as_ref()?.iter().find(|o| o.kind == "Diagnosis").map(|o| o.name.clone())
}

/// Writes the terminal phase exactly once (spec.md §4.3 "Idempotence"): the
/// caller only reaches here from the `Running` branch of `reconcile`, so a
/// task already Succeeded/Failed never re-enters this function.
async fn finish(
    tasks: &Api<Task>,
    name: &str,
    phase: TaskPhase,
    results: BTreeMap<String, String>,
    reason: &str,
    message: &str,
) -> Result<Action, Error> {
    let status = TaskStatus {
        phase: Some(phase),
        results,
        start_time: Some(Utc::now().to_rfc3339()),
        conditions: vec![Condition::new("Accepted", "Claimed", "task claimed by agent"), Condition::new("Complete", reason, message)],
    };

    let patch = serde_json::json!({
        "apiVersion": "kubediag.io/v1",
        "kind": "Task",
        "status": status,
    });
    let ps = PatchParams::apply("kubediag-agent-executor").force();
    tasks.patch_status(name, &ps, &Patch::Apply(patch)).await?;
    Ok(Action::await_change())
}
