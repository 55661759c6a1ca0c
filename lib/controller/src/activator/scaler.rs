// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectReference, Pod, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};
use llmaz_api::Playground;
use llmaz_api::constants::annotations;

use super::{ActivatorError, ScaleUp, Target};
use crate::util;

const UPDATE_ATTEMPTS: usize = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Wakes a parked Playground: one replica, then waits for its first pod
pub struct PlaygroundScaler {
    client: Client,
    poll_interval: Duration,
    timeout: Duration,
}

impl PlaygroundScaler {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: POLL_INTERVAL,
            timeout: READY_TIMEOUT,
        }
    }

    /// `spec.replicas = 1` guarded by the resource version
    async fn wake(&self, namespace: &str, name: &str) -> Result<(), ActivatorError> {
        let api: Api<Playground> = Api::namespaced(self.client.clone(), namespace);
        for attempt in 1..=UPDATE_ATTEMPTS {
            let mut playground = api.get(name).await?;
            if playground.replicas() > 0 {
                return Ok(());
            }
            playground.spec.replicas = Some(1);
            match api.replace(name, &PostParams::default(), &playground).await {
                Ok(_) => {
                    tracing::info!(playground = name, namespace, "scaled to one replica");
                    return Ok(());
                }
                Err(e) if util::is_conflict(&e) => {
                    tracing::debug!(playground = name, attempt, "conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ActivatorError::Conflict(name.to_string()))
    }

    // TODO: a multi-host group is usable only once every worker is ready, poll the whole group
    // instead of the leader pod.
    async fn wait_until_ready(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Pod, ActivatorError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let poll = async {
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                interval.tick().await;
                match pods.get_opt(pod_name).await {
                    Ok(Some(pod)) if is_pod_ready(&pod) => return pod,
                    Ok(_) => {}
                    Err(e) => tracing::warn!(pod = pod_name, error = %e, "failed to get pod"),
                }
            }
        };
        tokio::time::timeout(self.timeout, poll)
            .await
            .map_err(|_| ActivatorError::ScaleUpTimeout(pod_name.to_string()))
    }
}

#[async_trait]
impl ScaleUp for PlaygroundScaler {
    async fn scale_up(&self, target: &Target) -> Result<(), ActivatorError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), &target.namespace);
        let svc = services.get(&target.name).await?;
        let workload = svc
            .annotations()
            .get(annotations::MODEL_ACTIVATOR)
            .cloned()
            .ok_or_else(|| ActivatorError::MissingWorkload(target.name.clone()))?;

        self.wake(&target.namespace, &workload).await?;
        let pod = self.wait_until_ready(&target.namespace, &format!("{workload}-0")).await?;

        // point the endpoints at the pod so the reconciler can hand over
        let Some(endpoints) = ready_endpoints(&svc, &pod) else {
            return Err(ActivatorError::NoPodIp(pod.name_any()));
        };
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), &target.namespace);
        util::apply(&api, &endpoints).await?;
        tracing::info!(service = %target.name, pod = %pod.name_any(), "workload ready");
        Ok(())
    }
}

pub(crate) fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// Endpoints of `svc` backed by `pod`, one port per Service port resolved through its
/// target port. `None` until the pod has an IP.
pub(crate) fn ready_endpoints(svc: &Service, pod: &Pod) -> Option<Endpoints> {
    let ip = pod.status.as_ref()?.pod_ip.clone()?;
    let container_ports: Vec<_> = pod
        .spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .collect();

    let ports = svc
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|sp| {
            let port = match &sp.target_port {
                Some(IntOrString::Int(number)) => *number,
                Some(IntOrString::String(name)) => container_ports
                    .iter()
                    .find(|cp| cp.name.as_deref() == Some(name.as_str()))
                    .map(|cp| cp.container_port)
                    .unwrap_or(sp.port),
                None => sp.port,
            };
            EndpointPort {
                name: sp.name.clone(),
                port,
                protocol: Some("TCP".to_string()),
                app_protocol: None,
            }
        })
        .collect();

    Some(Endpoints {
        metadata: ObjectMeta {
            name: Some(svc.name_any()),
            namespace: svc.namespace(),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip,
                target_ref: Some(ObjectReference {
                    kind: Some("Pod".to_string()),
                    name: Some(pod.name_any()),
                    namespace: pod.namespace(),
                    uid: pod.metadata.uid.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            not_ready_addresses: None,
            ports: Some(ports),
        }]),
    })
}
