/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/processors/script.rs
*
* The script runner processor dispatch (spec.md §4.3 step 3, script runner):
* execute the operation's mirrored script file under the same timeout
* discipline as the HTTP processor, killing the subprocess on deadline
* (spec.md §9 "Cancellation propagation": object-store calls -> processor
* call -> subprocess signalling).
*
* SPDX-License-Identifier: Apache-2.0
*/

use kubediag_types::operation::ScriptRunnerSpec;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ScriptProcessorError {
    #[error("script execution timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn script process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("script exited with non-zero status {0}")]
    NonZeroExit(i32, BTreeMap<String, String>),
}

/// Builds the argument list from `argKeys[]` looked up in the merged
/// parameter map; missing keys pass as empty strings (spec.md §4.3 step 3).
fn build_args(arg_keys: &[String], parameters: &BTreeMap<String, String>) -> Vec<String> {
    arg_keys.iter().map(|k| parameters.get(k).cloned().unwrap_or_default()).collect()
}

pub async fn dispatch(
    spec: &ScriptRunnerSpec,
    operation_name: &str,
    scripts_dir: &Path,
    parameters: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, ScriptProcessorError> {
    let script_path = scripts_dir.join(operation_name);
    let args = build_args(&spec.arg_keys, parameters);
    let timeout = Duration::from_secs(spec.effective_timeout_seconds() as u64);

    let mut child = Command::new(&script_path)
        .args(&args)
        .current_dir(scripts_dir)
        .env_clear()
        .envs(parameters.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ScriptProcessorError::Spawn)?;

    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stdout_pipe.read_to_end(&mut buf).await;
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = stderr_pipe.read_to_end(&mut buf).await;
        buf
    });

    let status = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status.map_err(ScriptProcessorError::Spawn)?,
        Err(_) => {
            // Deadline exceeded: kill and reap before surfacing the error so
            // no subprocess is left behind (spec.md §9 "Cancellation
            // propagation... failing to propagate leaks subprocesses").
            let _ = child.kill().await;
            let _ = child.wait().await;
            return Err(ScriptProcessorError::Timeout(timeout));
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    let mut results = BTreeMap::new();
    if let Some(key) = &spec.operation_result_key {
        results.insert(format!("{key}.stdout"), String::from_utf8_lossy(&stdout).into_owned());
        results.insert(format!("{key}.stderr"), String::from_utf8_lossy(&stderr).into_owned());
        if !status.success() {
            results.insert(format!("{key}.error"), status.to_string());
        }
    }

    if !status.success() {
        return Err(ScriptProcessorError::NonZeroExit(status.code().unwrap_or(-1), results));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arg_keys_become_empty_strings() {
        let mut parameters = BTreeMap::new();
        parameters.insert("present".to_string(), "value".to_string());
        let args = build_args(&["present".to_string(), "absent".to_string()], &parameters);
        assert_eq!(args, vec!["value".to_string(), "".to_string()]);
    }
}
