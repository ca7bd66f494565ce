/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/script_store.rs
*
* The script file lifecycle (spec.md §4.3 "Script file lifecycle"): a
* dedicated reconciler over `Api<Operation>` that mirrors
* `scriptRunner.script` to `<dataRoot>/scripts/<operation>`, rewriting on
* drift and removing the file on Operation deletion, using the same
* `finalizer` idiom `autoheal_controller` uses to keep an external resource
* (its in-memory cache; here, a file) in sync with a CR's lifecycle.
*
* SPDX-License-Identifier: Apache-2.0
*/

use futures::stream::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher,
    },
    Client, ResourceExt,
};
use kubediag_types::Operation;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{field, info, instrument, warn, Span};

const FINALIZER_NAME: &str = "operations.kubediag.io/script-mirror";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("finalizer error: {0}")]
    FinalizerError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

struct Context {
    client: Client,
    scripts_dir: std::path::PathBuf,
}

pub async fn run(client: Client, scripts_dir: std::path::PathBuf) {
    std::fs::create_dir_all(&scripts_dir).ok();

    let operations: Api<Operation> = Api::all(client.clone());
    let ctx = Arc::new(Context { client, scripts_dir });

    Controller::new(operations, watcher::Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled Operation script mirror: {:?}", o),
                Err(e) => warn!("Operation script mirror error: {}", e),
            }
        })
        .await;
}

#[instrument(skip(op, ctx), fields(name = field::Empty))]
async fn reconcile(op: Arc<Operation>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = op.name_any();
    Span::current().record("name", &name);
    let api: Api<Operation> = Api::all(ctx.client.clone());

    finalizer(&api, FINALIZER_NAME, op, |event| async {
        match event {
            FinalizerEvent::Apply(op) => mirror_script(&op, &ctx).await,
            FinalizerEvent::Cleanup(op) => remove_script(&op, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(e.into()))
}

fn error_policy(_op: Arc<Operation>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!("script mirror reconcile failed: {}", error);
    Action::requeue(Duration::from_secs(15))
}

fn script_path(scripts_dir: &Path, operation_name: &str) -> std::path::PathBuf {
    scripts_dir.join(operation_name)
}

async fn mirror_script(op: &Operation, ctx: &Context) -> Result<Action, Error> {
    let name = op.name_any();
    let Some(script) = op.spec.processor.as_ref().and_then(|p| p.script_runner.as_ref()).map(|s| &s.script) else {
        return Ok(Action::await_change());
    };

    let path = script_path(&ctx.scripts_dir, &name);
    let needs_write = match tokio::fs::read_to_string(&path).await {
        Ok(existing) => &existing != script,
        Err(_) => true,
    };

    if needs_write {
        tokio::fs::write(&path, script).await?;
        set_executable(&path).await?;
        info!(operation = %name, "rewrote script file (drift detected)");
    }

    Ok(Action::requeue(Duration::from_secs(3600)))
}

async fn remove_script(op: &Operation, ctx: &Context) -> Result<Action, Error> {
    let name = op.name_any();
    let path = script_path(&ctx.scripts_dir, &name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => info!(operation = %name, "removed script file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Io(e)),
    }
    Ok(Action::await_change())
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o755);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_path_joins_data_root_and_operation_name() {
        let dir = Path::new("/var/lib/kubediag/scripts");
        assert_eq!(script_path(dir, "collect-logs"), dir.join("collect-logs"));
    }
}
