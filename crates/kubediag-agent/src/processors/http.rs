/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-agent/src/processors/http.rs
*
* The HTTP processor dispatch (spec.md §4.3 step 3, HTTP processor):
* POST a JSON body to `scheme://address:port/path` under a
* `tokio::time::timeout` deadline. A 2xx response with a JSON object body
* defines the results map; anything else is a `ProcessorError`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kubediag_types::operation::HttpProcessorSpec;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HttpProcessorError {
    #[error("processor call timed out after {0:?}")]
    Timeout(Duration),
    #[error("processor request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("processor returned non-2xx status {0}")]
    NonSuccess(reqwest::StatusCode),
    #[error("processor response body was not a JSON object of strings: {0}")]
    MalformedResponse(String),
}

pub async fn dispatch(
    spec: &HttpProcessorSpec,
    agent_address: &str,
    agent_port: u16,
    parameters: &BTreeMap<String, String>,
    context_parameters: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, HttpProcessorError> {
    let address = spec.address.as_deref().unwrap_or(agent_address);
    let port = spec.port.unwrap_or(agent_port);
    let scheme = spec.effective_scheme();
    let path = spec.effective_path();
    let url = format!("{scheme}://{address}:{port}{path}");

    let body = serde_json::json!({
        "parameters": parameters,
        "context": { "parameters": context_parameters },
    });

    let timeout = Duration::from_secs(spec.effective_timeout_seconds() as u64);
    let client = reqwest::Client::new();

    let response = tokio::time::timeout(timeout, client.post(&url).json(&body).send())
        .await
        .map_err(|_| HttpProcessorError::Timeout(timeout))??;

    if !response.status().is_success() {
        return Err(HttpProcessorError::NonSuccess(response.status()));
    }

    let results: BTreeMap<String, String> = tokio::time::timeout(timeout, response.json())
        .await
        .map_err(|_| HttpProcessorError::Timeout(timeout))?
        .map_err(|e| HttpProcessorError::MalformedResponse(e.to_string()))?;

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_spec_address_over_agent_default_when_set() {
        let spec = HttpProcessorSpec {
            address: Some("10.0.0.5".to_string()),
            port: Some(9999),
            path: Some("/run".to_string()),
            scheme: Some("https".to_string()),
            timeout_seconds: Some(5),
        };
        let address = spec.address.as_deref().unwrap_or("127.0.0.1");
        let port = spec.port.unwrap_or(8088);
        assert_eq!(format!("{}://{address}:{port}{}", spec.effective_scheme(), spec.effective_path()), "https://10.0.0.5:9999/run");
    }

    #[test]
    fn url_falls_back_to_agent_defaults_when_unset() {
        let spec = HttpProcessorSpec { address: None, port: None, path: None, scheme: None, timeout_seconds: None };
        let address = spec.address.as_deref().unwrap_or("127.0.0.1");
        let port = spec.port.unwrap_or(8088);
        assert_eq!(format!("{}://{address}:{port}{}", spec.effective_scheme(), spec.effective_path()), "http://127.0.0.1:8088/");
    }
}
