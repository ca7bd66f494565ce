/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/config.rs
*
* Agent-side operator knobs (spec.md §6): nodeName, advertised address/port,
* and dataRoot, read from environment variables at startup the same way the
* master's config.rs does.
*
* SPDX-License-Identifier: Apache-2.0
*/

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub advertised_address: String,
    pub advertised_port: u16,
    pub data_root: String,
}

impl Config {
    pub fn from_env() -> Self {
        let advertised_port: u16 = env_or("KUBEDIAG_AGENT_PORT", "8088").parse().unwrap_or(8088);
        Config {
            node_name: env_or("KUBEDIAG_NODE_NAME", "unknown-node"),
            advertised_address: env_or("KUBEDIAG_AGENT_ADDRESS", "127.0.0.1"),
            advertised_port,
            data_root: env_or("KUBEDIAG_DATA_ROOT", "/var/lib/kubediag"),
        }
    }

    pub fn scripts_dir(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.data_root).join("scripts")
    }
}
