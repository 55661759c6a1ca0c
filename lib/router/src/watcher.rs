// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Keeps the aggregator's replica set in line with the model-serving pods in the cluster.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use llmaz_api::constants::{DEFAULT_BACKEND_PORT, MODEL_RUNNER_CONTAINER_NAME, labels};
use tokio_util::sync::CancellationToken;

use crate::aggregator::{Aggregator, Replica, ReplicaKey, key_for};

/// Port name on the model-runner container that serves `/metrics`
pub const METRICS_PORT_NAME: &str = "http";

/// Receiver of replica membership changes
pub trait ReplicaSink: Send + Sync {
    fn add_replica(&self, replica: Replica);
    fn delete_replica(&self, key: &str);
    fn replica_keys(&self) -> Vec<ReplicaKey>;
}

impl ReplicaSink for Aggregator {
    fn add_replica(&self, replica: Replica) {
        Aggregator::add_replica(self, replica)
    }

    fn delete_replica(&self, key: &str) {
        Aggregator::delete_replica(self, key)
    }

    fn replica_keys(&self) -> Vec<ReplicaKey> {
        self.keys()
    }
}

/// What a pod means for the replica set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodState {
    /// Not a model-serving pod
    Ignored,
    Ready(Replica),
    /// Serving pod that must not receive traffic
    Unavailable(ReplicaKey),
}

pub fn classify(pod: &Pod) -> PodState {
    let Some(model) = pod.labels().get(labels::MODEL_NAME).cloned() else {
        return PodState::Ignored;
    };
    let key = key_for(&pod.namespace().unwrap_or_default(), &pod.name_any());

    if pod.metadata.deletion_timestamp.is_some() || !is_ready(pod) {
        return PodState::Unavailable(key);
    }
    let Some(ip) = pod.status.as_ref().and_then(|s| s.pod_ip.as_deref()) else {
        return PodState::Unavailable(key);
    };

    PodState::Ready(Replica {
        namespace: pod.namespace().unwrap_or_default(),
        name: pod.name_any(),
        model,
        endpoint: format!("http://{ip}:{}", metrics_port(pod)),
    })
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn metrics_port(pod: &Pod) -> i32 {
    pod.spec
        .as_ref()
        .and_then(|spec| {
            spec.containers
                .iter()
                .find(|c| c.name == MODEL_RUNNER_CONTAINER_NAME)
        })
        .and_then(|c| c.ports.as_ref())
        .and_then(|ports| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(METRICS_PORT_NAME))
        })
        .map(|p| p.container_port)
        .unwrap_or(DEFAULT_BACKEND_PORT)
}

/// Applies pod events to a [`ReplicaSink`]. A relist (`Init` .. `InitDone`) also drops
/// replicas whose pods disappeared while the watch was down.
pub struct ReplicaWatcher {
    sink: Arc<dyn ReplicaSink>,
    relist: Option<HashSet<ReplicaKey>>,
}

impl ReplicaWatcher {
    pub fn new(sink: Arc<dyn ReplicaSink>) -> Self {
        Self { sink, relist: None }
    }

    /// Added or modified pod
    pub fn on_event(&self, pod: &Pod) -> Option<ReplicaKey> {
        match classify(pod) {
            PodState::Ignored => None,
            PodState::Ready(replica) => {
                let key = replica.key();
                self.sink.add_replica(replica);
                Some(key)
            }
            PodState::Unavailable(key) => {
                tracing::debug!(replica = %key, "pod not ready");
                self.sink.delete_replica(&key);
                None
            }
        }
    }

    pub fn on_delete(&self, pod: &Pod) {
        if !pod.labels().contains_key(labels::MODEL_NAME) {
            return;
        }
        let key = key_for(&pod.namespace().unwrap_or_default(), &pod.name_any());
        self.sink.delete_replica(&key);
    }

    pub fn handle(&mut self, event: Event<Pod>) {
        match event {
            Event::Apply(pod) => {
                self.on_event(&pod);
            }
            Event::Delete(pod) => self.on_delete(&pod),
            Event::Init => self.relist = Some(HashSet::new()),
            Event::InitApply(pod) => {
                let ready = self.on_event(&pod);
                if let (Some(seen), Some(key)) = (self.relist.as_mut(), ready) {
                    seen.insert(key);
                }
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return;
                };
                for key in self.sink.replica_keys() {
                    if !seen.contains(&key) {
                        tracing::info!(replica = %key, "replica vanished during relist");
                        self.sink.delete_replica(&key);
                    }
                }
            }
        }
    }

    /// Watch model-serving pods in `namespace` (all namespaces when `None`) until cancelled
    pub async fn run(
        mut self,
        client: Client,
        namespace: Option<String>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let api: Api<Pod> = match namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let config = watcher::Config::default().labels(labels::MODEL_NAME);
        let mut events = watcher::watcher(api, config).default_backoff().boxed();

        tracing::info!(namespace = ?namespace, "watching model pods");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => tracing::warn!(error = %e, "pod watch error"),
                    None => break,
                },
            }
        }
        tracing::info!("pod watcher stopped");
        Ok(())
    }
}
