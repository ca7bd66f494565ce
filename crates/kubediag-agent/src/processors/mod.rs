/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/processors/mod.rs
*
* The two processor dispatch backends an Operation can name (spec.md §4.3
* step 3): the HTTP processor and the script runner. executor.rs picks
* between them based on the Operation's processor variant.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod http;
pub mod script;
