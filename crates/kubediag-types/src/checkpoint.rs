/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-types/src/checkpoint.rs
*
* The pure core of the Master Reconciler's checkpoint walk (spec.md §4.2,
* steps 1-6) and the adjacency-list hash guard. Factored out of
* kubediag-master's `reconcile` the same way kubediag-types::graph factors
* out the Graph Builder: the object-store reads/writes and Task creation
* stay in the reconciler, everything decidable from `DiagnosisStatus` alone
* lives here and is unit tested directly.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::diagnosis::{Checkpoint, DiagnosisStatus};

/// What the reconciler must do next, decided purely from the current
/// checkpoint and the shape of the OperationSet's paths. Each variant
/// corresponds to one step of spec.md §4.2's numbered algorithm; the
/// reconciler performs at most the I/O that variant implies and returns,
/// honoring "the checkpoint walk advances by *one* mutation per reconcile
/// iteration" (spec.md §5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointAction {
    /// Step 1: no checkpoint yet.
    Initialize,
    /// Step 3: `desired` not yet set for the current node.
    SetDesired { desired: u32 },
    /// Step 4: some targets for the current node have no Task yet.
    CreateTasks { path_index: usize, node_index: usize, operation: usize },
    /// Step 5: every target resolved and at least one succeeded.
    AdvanceOnNodeSuccess,
    /// Step 6: every target failed.
    AdvanceOnNodeFailure,
    /// Tasks are still in flight; nothing to do this reconcile.
    Wait,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint references path {path_index} which does not exist (have {path_count} paths)")]
    PathOutOfBounds { path_index: usize, path_count: usize },
    #[error("checkpoint references node {node_index} of path {path_index} which does not exist (path has {node_count} nodes)")]
    NodeOutOfBounds { path_index: usize, node_index: usize, node_count: usize },
}

pub fn initialize_checkpoint() -> Checkpoint {
    Checkpoint { path_index: 0, node_index: 0, desired: 0, active: 0, succeeded: 0, failed: 0, synchronized_tasks: Vec::new() }
}

/// Decides the next action from `status.checkpoint` and `paths`. `paths`
/// must be the OperationSet's already-validated `status.paths` (spec.md §3:
/// bounds errors against it are "fatal programming errors", surfaced here as
/// `CheckpointError` rather than a panic, per spec.md §7).
pub fn decide(status: &DiagnosisStatus, paths: &[Vec<usize>], target_count: usize) -> Result<CheckpointAction, CheckpointError> {
    let Some(checkpoint) = &status.checkpoint else {
        return Ok(CheckpointAction::Initialize);
    };

    let path = paths.get(checkpoint.path_index).ok_or(CheckpointError::PathOutOfBounds {
        path_index: checkpoint.path_index,
        path_count: paths.len(),
    })?;
    let operation = *path.get(checkpoint.node_index).ok_or(CheckpointError::NodeOutOfBounds {
        path_index: checkpoint.path_index,
        node_index: checkpoint.node_index,
        node_count: path.len(),
    })?;

    if checkpoint.desired == 0 {
        return Ok(CheckpointAction::SetDesired { desired: target_count as u32 });
    }

    let accounted = checkpoint.active + checkpoint.succeeded + checkpoint.failed;
    if accounted < checkpoint.desired {
        return Ok(CheckpointAction::CreateTasks {
            path_index: checkpoint.path_index,
            node_index: checkpoint.node_index,
            operation,
        });
    }

    if checkpoint.succeeded + checkpoint.failed == checkpoint.desired {
        // spec.md §9 Open Question (b): when both succeeded and failed are
        // non-zero at this point, the node counts as succeeded (the "some
        // target passed" rule).
        if checkpoint.succeeded > 0 {
            return Ok(CheckpointAction::AdvanceOnNodeSuccess);
        }
        return Ok(CheckpointAction::AdvanceOnNodeFailure);
    }

    Ok(CheckpointAction::Wait)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    DiagnosisSucceeded,
    AdvancedToNextNode,
}

/// Step 5: the current node passed on at least one target.
pub fn advance_on_success(status: &mut DiagnosisStatus, paths: &[Vec<usize>]) -> NodeOutcome {
    let checkpoint = status.checkpoint.as_mut().expect("advance_on_success requires a checkpoint");
    let path = &paths[checkpoint.path_index];
    let node = path[checkpoint.node_index];

    status.succeeded_path.get_or_insert_with(Vec::new).push(node);

    if checkpoint.node_index + 1 == path.len() {
        NodeOutcome::DiagnosisSucceeded
    } else {
        checkpoint.node_index += 1;
        checkpoint.desired = 0;
        checkpoint.active = 0;
        checkpoint.succeeded = 0;
        checkpoint.failed = 0;
        checkpoint.synchronized_tasks.clear();
        NodeOutcome::AdvancedToNextNode
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathOutcome {
    DiagnosisFailed,
    AdvancedToNextPath,
}

/// Step 6: the current node failed on every target.
pub fn advance_on_failure(status: &mut DiagnosisStatus, paths: &[Vec<usize>]) -> PathOutcome {
    let checkpoint = status.checkpoint.as_mut().expect("advance_on_failure requires a checkpoint");
    let failed_path = paths[checkpoint.path_index].clone();
    status.failed_paths.push(failed_path);
    status.succeeded_path = None;

    if checkpoint.path_index + 1 == paths.len() {
        PathOutcome::DiagnosisFailed
    } else {
        checkpoint.path_index += 1;
        checkpoint.node_index = 0;
        checkpoint.desired = 0;
        checkpoint.active = 0;
        checkpoint.succeeded = 0;
        checkpoint.failed = 0;
        checkpoint.synchronized_tasks.clear();
        PathOutcome::AdvancedToNextPath
    }
}

/// Task result absorption (spec.md §4.2 "Task result absorption" /
/// §7 "Exactly-once accounting"): for a task name not already recorded in
/// `synchronized_tasks`, account it exactly once and gate future calls.
/// Returns `false` if the task name was already synchronized (no-op).
pub fn absorb_task_result(checkpoint: &mut Checkpoint, task_name: &str, succeeded: bool) -> bool {
    if checkpoint.synchronized_tasks.iter().any(|t| t == task_name) {
        return false;
    }
    checkpoint.active = checkpoint.active.saturating_sub(1);
    if succeeded {
        checkpoint.succeeded += 1;
    } else {
        checkpoint.failed += 1;
    }
    checkpoint.synchronized_tasks.push(task_name.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::DiagnosisStatus;

    fn status_with(checkpoint: Option<Checkpoint>) -> DiagnosisStatus {
        DiagnosisStatus { checkpoint, ..Default::default() }
    }

    #[test]
    fn no_checkpoint_means_initialize() {
        let status = status_with(None);
        let paths = vec![vec![1]];
        assert_eq!(decide(&status, &paths, 1).unwrap(), CheckpointAction::Initialize);
    }

    #[test]
    fn zero_desired_means_set_desired_from_target_count() {
        let status = status_with(Some(initialize_checkpoint()));
        let paths = vec![vec![1]];
        assert_eq!(decide(&status, &paths, 3).unwrap(), CheckpointAction::SetDesired { desired: 3 });
    }

    #[test]
    fn partial_accounting_means_create_tasks() {
        let mut cp = initialize_checkpoint();
        cp.desired = 3;
        cp.active = 1;
        let status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(
            decide(&status, &paths, 3).unwrap(),
            CheckpointAction::CreateTasks { path_index: 0, node_index: 0, operation: 1 }
        );
    }

    #[test]
    fn full_accounting_with_no_results_yet_waits() {
        let mut cp = initialize_checkpoint();
        cp.desired = 2;
        cp.active = 2;
        let status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(decide(&status, &paths, 2).unwrap(), CheckpointAction::Wait);
    }

    #[test]
    fn some_succeeded_some_failed_is_a_node_success() {
        let mut cp = initialize_checkpoint();
        cp.desired = 2;
        cp.succeeded = 1;
        cp.failed = 1;
        let status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(decide(&status, &paths, 2).unwrap(), CheckpointAction::AdvanceOnNodeSuccess);
    }

    #[test]
    fn all_failed_is_a_node_failure() {
        let mut cp = initialize_checkpoint();
        cp.desired = 2;
        cp.failed = 2;
        let status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(decide(&status, &paths, 2).unwrap(), CheckpointAction::AdvanceOnNodeFailure);
    }

    #[test]
    fn advance_on_success_completes_last_node_of_path() {
        let mut cp = initialize_checkpoint();
        cp.desired = 1;
        cp.succeeded = 1;
        let mut status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(advance_on_success(&mut status, &paths), NodeOutcome::DiagnosisSucceeded);
        assert_eq!(status.succeeded_path, Some(vec![1]));
    }

    #[test]
    fn advance_on_success_moves_to_next_node_and_resets_counters() {
        let mut cp = initialize_checkpoint();
        cp.desired = 1;
        cp.succeeded = 1;
        cp.synchronized_tasks.push("t1".to_string());
        let mut status = status_with(Some(cp));
        let paths = vec![vec![1, 2]];
        assert_eq!(advance_on_success(&mut status, &paths), NodeOutcome::AdvancedToNextNode);
        let cp = status.checkpoint.unwrap();
        assert_eq!(cp.node_index, 1);
        assert_eq!(cp.desired, 0);
        assert!(cp.synchronized_tasks.is_empty());
    }

    #[test]
    fn advance_on_failure_exhausts_all_paths() {
        let mut cp = initialize_checkpoint();
        cp.desired = 1;
        cp.failed = 1;
        let mut status = status_with(Some(cp));
        let paths = vec![vec![1]];
        assert_eq!(advance_on_failure(&mut status, &paths), PathOutcome::DiagnosisFailed);
        assert_eq!(status.failed_paths, vec![vec![1]]);
        assert_eq!(status.succeeded_path, None);
    }

    #[test]
    fn advance_on_failure_moves_to_next_path() {
        let mut cp = initialize_checkpoint();
        cp.desired = 1;
        cp.failed = 1;
        let mut status = status_with(Some(cp));
        status.succeeded_path = Some(vec![9]);
        let paths = vec![vec![1], vec![2]];
        assert_eq!(advance_on_failure(&mut status, &paths), PathOutcome::AdvancedToNextPath);
        let cp = status.checkpoint.unwrap();
        assert_eq!(cp.path_index, 1);
        assert_eq!(cp.node_index, 0);
        assert_eq!(status.succeeded_path, None);
    }

    #[test]
    fn exactly_once_accounting_gates_on_synchronized_tasks() {
        let mut cp = initialize_checkpoint();
        cp.desired = 1;
        cp.active = 1;
        assert!(absorb_task_result(&mut cp, "t1", true));
        assert_eq!(cp.succeeded, 1);
        assert_eq!(cp.active, 0);
        // Re-processing the same terminal task is a no-op.
        assert!(!absorb_task_result(&mut cp, "t1", true));
        assert_eq!(cp.succeeded, 1);
    }
}
