/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: crates/kubediag-master/src/controllers/trigger_matcher.rs
*
* The Trigger Matcher (spec.md §4.4): two ingress paths feeding one
* matching engine. The webhook route mirrors
* `autoheal_controller::run_webhook_server`'s `warp::post().and(warp::path(...))`
* composition; the Kubernetes Event path is a thin `Controller` watch
* forwarding every event onto a bounded channel, per spec.md §4.4
* "reconciler forwards every event to the matcher through a buffered
* channel". The fingerprint cache is owned solely by the webhook handler
* task (spec.md §5/§9: single-writer, no locks needed beyond the Mutex
* that makes it `Send`-safe across async tasks).
*
* SPDX-License-Identifier: Apache-2.0
*/

use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::{
    api::{Api, PostParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    Client, Resource, ResourceExt,
};
use kubediag_types::trigger::{alert_matches, event_matches, AlertSignal, EventSignal, SourceTemplate};
use kubediag_types::{Diagnosis, DiagnosisSpec, PodReference, TargetSelector, Trigger};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, field, info, instrument, warn, Span};
use warp::{http::StatusCode, Filter};

use crate::config::Config;
use crate::metrics::{ALERTS_RECEIVED_TOTAL, ALERTS_SUPPRESSED_TOTAL, DIAGNOSES_MATERIALISED_TOTAL};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
}

/// Shared state between the webhook handler and the event forwarder.
struct MatcherState {
    client: Client,
    config: Config,
    /// Alert fingerprint -> last successful Diagnosis creation time
    /// (spec.md §3 "Fingerprint cache"). Single-writer: only the webhook
    /// handler task ever mutates this.
    fingerprint_cache: Mutex<HashMap<u64, DateTime<Utc>>>,
}

// --- Alertmanager webhook wire shapes (spec.md §6) ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct AlertPayload {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
    #[serde(default)]
    starts_at: String,
    #[serde(default)]
    ends_at: String,
    #[serde(default)]
    generator_url: String,
    #[serde(default)]
    status: String,
}

const UNMATCHED_EVENT_CHANNEL_CAPACITY: usize = 256;

pub async fn run(client: Client, config: Config) {
    let state = Arc::new(MatcherState { client: client.clone(), config, fingerprint_cache: Mutex::new(HashMap::new()) });

    let (tx, rx) = mpsc::channel::<Event>(UNMATCHED_EVENT_CHANNEL_CAPACITY);

    let webhook = run_webhook_server(state.clone());
    let event_consumer = run_event_consumer(state.clone(), rx);
    let event_watch = run_event_watch(client, tx);

    tokio::select! {
        _ = webhook => warn!("Trigger webhook server has unexpectedly exited."),
        _ = event_consumer => warn!("Trigger event consumer has unexpectedly exited."),
        _ = event_watch => warn!("Trigger event watch has unexpectedly exited."),
    }
}

// --- Webhook ingress ---

fn with_state(state: Arc<MatcherState>) -> impl Filter<Extract = (Arc<MatcherState>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn run_webhook_server(state: Arc<MatcherState>) {
    if !state.config.alertmanager_enabled {
        info!("Alertmanager webhook disabled by configuration");
        return;
    }

    let port = state.config.webhook_port;
    let route = warp::post()
        .and(warp::path!("api" / "v1" / "alerts"))
        .and(warp::body::json())
        .and(with_state(state))
        .and_then(handle_alerts);

    info!("Starting Alertmanager webhook server on 0.0.0.0:{port}");
    warp::serve(route).run(([0, 0, 0, 0], port)).await;
}

#[instrument(skip(alerts, state))]
async fn handle_alerts(alerts: Vec<AlertPayload>, state: Arc<MatcherState>) -> Result<impl warp::Reply, warp::Rejection> {
    ALERTS_RECEIVED_TOTAL.inc_by(alerts.len() as u64);

    for alert in alerts {
        if alert.status == "resolved" {
            continue;
        }

        let signal = AlertSignal {
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            starts_at: alert.starts_at.clone(),
            ends_at: alert.ends_at.clone(),
            generator_url: alert.generator_url.clone(),
            resolved: false,
        };
        let fingerprint = signal.fingerprint();
        let now = Utc::now();

        {
            let cache = state.fingerprint_cache.lock().expect("fingerprint cache poisoned");
            if let Some(last) = cache.get(&fingerprint) {
                if now.signed_duration_since(*last).to_std().map(|d| d < state.config.repeat_interval).unwrap_or(false) {
                    ALERTS_SUPPRESSED_TOTAL.inc();
                    debug!(fingerprint, "alert suppressed by repeat interval");
                    continue;
                }
            }
        }

        match match_and_create_alert(&state, &signal, fingerprint).await {
            Ok(true) => {
                let mut cache = state.fingerprint_cache.lock().expect("fingerprint cache poisoned");
                cache.insert(fingerprint, now);
            }
            Ok(false) => {}
            Err(e) => error!(error = %e, "failed to materialise Diagnosis from alert"),
        }
    }

    Ok(StatusCode::OK)
}

async fn match_and_create_alert(state: &MatcherState, signal: &AlertSignal, fingerprint: u64) -> Result<bool, Error> {
    let triggers: Api<Trigger> = Api::all(state.client.clone());
    let list = triggers.list(&Default::default()).await?;

    let mut names: Vec<_> = list.items.into_iter().collect();
    names.sort_by(|a, b| a.name_any().cmp(&b.name_any()));

    for trigger in names {
        let SourceTemplate::PrometheusAlert(template) = (match trigger.spec.source_variant() {
            Ok(v) => v,
            Err(_) => continue,
        }) else {
            continue;
        };

        let matched = match alert_matches(template, signal) {
            Ok(m) => m,
            Err(e) => {
                warn!(trigger = %trigger.name_any(), error = %e, "trigger has a malformed pattern");
                continue;
            }
        };
        if !matched {
            continue;
        }

        let diag = materialise_from_alert(&trigger, template, signal, fingerprint, &state.config.default_namespace);
        create_diagnosis(&state.client, diag).await?;
        DIAGNOSES_MATERIALISED_TOTAL.with_label_values(&["prometheus"]).inc();
        return Ok(true);
    }

    Ok(false)
}

fn materialise_from_alert(
    trigger: &Trigger,
    template: &kubediag_types::trigger::PrometheusAlertTemplate,
    signal: &AlertSignal,
    fingerprint: u64,
    namespace: &str,
) -> Diagnosis {
    let fp7: String = format!("{fingerprint:x}").chars().take(7).collect();
    let name = format!("alert.{}.{fp7}", signal.alert_name().to_lowercase());

    let node_name = template.node_name_label.as_ref().and_then(|l| signal.labels.get(l)).cloned();
    let pod_namespace = template.pod_namespace_label.as_ref().and_then(|l| signal.labels.get(l)).cloned();
    let pod_name = template.pod_name_label.as_ref().and_then(|l| signal.labels.get(l)).cloned();
    let pod_container = template.pod_container_label.as_ref().and_then(|l| signal.labels.get(l)).cloned();

    let pod_reference = match (pod_namespace, pod_name) {
        (Some(namespace), Some(name)) => Some(PodReference { namespace, name, container: pod_container }),
        _ => None,
    };

    let node_names = node_name.map(|n| vec![n]);
    let target_selector = if node_names.is_some() || pod_reference.is_some() {
        Some(TargetSelector { node_selector: None, node_names, pod_selector: None, pod_references: pod_reference.map(|r| vec![r]) })
    } else {
        None
    };

    let mut parameters = BTreeMap::new();
    for label in &template.parameter_labels {
        if let Some(v) = signal.labels.get(label) {
            parameters.insert(label.clone(), v.clone());
        }
    }

    Diagnosis::new(
        &name,
        DiagnosisSpec { operation_set: trigger.spec.operation_set.clone(), target_selector, parameters },
    )
    .into_namespaced(namespace)
}

// --- Kubernetes Event ingress ---

async fn run_event_watch(client: Client, tx: mpsc::Sender<Event>) {
    let events: Api<Event> = Api::all(client);
    Controller::new(events, watcher::Config::default())
        .run(
            move |event, _ctx| {
                let tx = tx.clone();
                async move { forward_event(event, tx).await }
            },
            |_event, _err: &Error, _ctx| Action::requeue(Duration::from_secs(10)),
            Arc::new(()),
        )
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("Event watch error: {}", e);
            }
        })
        .await;
}

async fn forward_event(event: Arc<Event>, tx: mpsc::Sender<Event>) -> Result<Action, Error> {
    if tx.try_send((*event).clone()).is_err() {
        warn!("event channel full, requeueing");
        return Ok(Action::requeue(Duration::from_secs(2)));
    }
    Ok(Action::await_change())
}

async fn run_event_consumer(state: Arc<MatcherState>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = match_and_create_event(&state, &event).await {
            error!(error = %e, "failed to materialise Diagnosis from event");
        }
    }
}

async fn match_and_create_event(state: &MatcherState, event: &Event) -> Result<(), Error> {
    let signal = EventSignal {
        name: event.name_any(),
        namespace: event.namespace().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        source_component: event.source.as_ref().and_then(|s| s.component.clone()).unwrap_or_default(),
        source_host: event.source.as_ref().and_then(|s| s.host.clone()).unwrap_or_default(),
        labels: event.metadata.labels.clone().unwrap_or_default(),
        annotations: event.metadata.annotations.clone().unwrap_or_default(),
    };

    let triggers: Api<Trigger> = Api::all(state.client.clone());
    let list = triggers.list(&Default::default()).await?;
    let mut items: Vec<_> = list.items.into_iter().collect();
    items.sort_by(|a, b| a.name_any().cmp(&b.name_any()));

    for trigger in items {
        let SourceTemplate::KubernetesEvent(template) = (match trigger.spec.source_variant() {
            Ok(v) => v,
            Err(_) => continue,
        }) else {
            continue;
        };

        let matched = match event_matches(template, &signal) {
            Ok(m) => m,
            Err(e) => {
                warn!(trigger = %trigger.name_any(), error = %e, "trigger has a malformed pattern");
                continue;
            }
        };
        if !matched {
            continue;
        }

        let name = format!("event.{}.{}", signal.namespace, signal.name);
        let diag = Diagnosis::new(&name, DiagnosisSpec { operation_set: trigger.spec.operation_set.clone(), target_selector: None, parameters: BTreeMap::new() })
            .into_namespaced(&state.config.default_namespace);
        create_diagnosis(&state.client, diag).await?;
        DIAGNOSES_MATERIALISED_TOTAL.with_label_values(&["event"]).inc();
        return Ok(());
    }

    Ok(())
}

async fn create_diagnosis(client: &Client, diag: Diagnosis) -> Result<(), Error> {
    let ns = diag.namespace().expect("materialised Diagnosis always carries a namespace");
    let api: Api<Diagnosis> = Api::namespaced(client.clone(), &ns);
    let name = diag.name_any();

    match api.create(&PostParams::default(), &diag).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => {
            debug!(name = %name, "Diagnosis already exists, ignoring");
            Ok(())
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Thin extension used only to keep `materialise_from_alert` readable:
/// `Diagnosis::new` from kube-derive doesn't set a namespace, so we patch
/// it in immediately after construction.
trait IntoNamespaced {
    fn into_namespaced(self, namespace: &str) -> Self;
}

impl IntoNamespaced for Diagnosis {
    fn into_namespaced(mut self, namespace: &str) -> Self {
        self.meta_mut().namespace = Some(namespace.to_string());
        self
    }
}

