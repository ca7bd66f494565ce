/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/controllers/mod.rs
*
* The master's four concurrent subsystems: the Graph Builder, the Master
* Reconciler, the Task result absorber and the Trigger Matcher. Each module
* owns its own `Controller`/watch loop and is joined by main.rs the way the
* teacher's operator joins its reconcilers and webhook server.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod graph_builder;
pub mod master_reconciler;
pub mod task_sync_controller;
pub mod trigger_matcher;
