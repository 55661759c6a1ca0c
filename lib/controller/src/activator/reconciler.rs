// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Service, ServicePort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use llmaz_api::constants::annotations;
use serde_json::{Value, json};

use super::{ActivatorError, PortManager, Target, forward};
use crate::error::{ReconcileError, Result};
use crate::reconciler::{Action, ObjectKey, Reconciler};
use crate::util;

/// Holds Services marked with the activator annotation while their workload is parked
pub struct ActivatorReconciler {
    client: Client,
    ports: Arc<PortManager>,
    /// Address the intercepted endpoints point at
    pod_ip: String,
}

impl ActivatorReconciler {
    pub fn new(client: Client, ports: Arc<PortManager>, pod_ip: impl Into<String>) -> Self {
        Self {
            client,
            ports,
            pod_ip: pod_ip.into(),
        }
    }

    /// Take over the endpoints of `svc` and park its selector
    async fn intercept(&self, svc: &Service, ns: &str, snapshot: bool) -> Result<()> {
        let name = svc.name_any();
        validate(svc)?;

        let mut listeners = Vec::new();
        for port in service_ports(svc) {
            let info = self.ports.add_target(Target::new(&name, ns, port.port))?;
            listeners.push((port.clone(), info.port()));
        }

        if snapshot {
            let services: Api<Service> = Api::namespaced(self.client.clone(), ns);
            services
                .patch(
                    &name,
                    &PatchParams::default(),
                    &Patch::Merge(snapshot_patch(svc)?),
                )
                .await?;
        }

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), ns);
        util::apply(&endpoints, &intercepted_endpoints(svc, &self.pod_ip, &listeners)).await?;
        tracing::info!(
            service = %name,
            namespace = ns,
            ports = listeners.len(),
            "service intercepted"
        );
        Ok(())
    }

    /// Hand buffered connections to the real endpoints and give the Service its selector back
    async fn release(&self, svc: &Service, ns: &str, endpoints: &Endpoints) -> Result<()> {
        let name = svc.name_any();
        for port in service_ports(svc) {
            let Some(info) = self.ports.remove_target(&Target::new(&name, ns, port.port)) else {
                continue;
            };
            info.close();
            let conns = info.drain();
            if conns.is_empty() {
                continue;
            }
            let Some(upstream) = resolve_upstream(endpoints, port, &self.pod_ip) else {
                tracing::warn!(
                    service = %name,
                    port = port.port,
                    dropped = conns.len(),
                    "no upstream for port"
                );
                continue;
            };
            tracing::info!(
                service = %name,
                %upstream,
                connections = conns.len(),
                "forwarding buffered connections"
            );
            for conn in conns {
                let upstream = upstream.clone();
                tokio::spawn(async move { forward(conn, &upstream).await });
            }
        }

        if let Some(patch) = restore_patch(svc) {
            let services: Api<Service> = Api::namespaced(self.client.clone(), ns);
            services
                .patch(&name, &PatchParams::default(), &Patch::Merge(patch))
                .await?;
            tracing::info!(service = %name, namespace = ns, "selector restored");
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ActivatorReconciler {
    type Object = Service;

    fn name(&self) -> &'static str {
        "activator"
    }

    async fn reconcile(&self, svc: Arc<Service>) -> Result<Action> {
        if !svc.annotations().contains_key(annotations::MODEL_ACTIVATOR) {
            return Ok(Action::Done);
        }
        let ns = svc
            .namespace()
            .ok_or_else(|| ReconcileError::missing("Service", "metadata.namespace"))?;

        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), &ns);
        let current = endpoints.get_opt(&svc.name_any()).await?;
        let live = current
            .as_ref()
            .is_some_and(|ep| has_live_addresses(ep, &self.pod_ip));
        let intercepted = svc.annotations().contains_key(annotations::CACHED_MODEL_ACTIVATOR);

        match (intercepted, live, current) {
            (true, true, Some(ep)) => self.release(&svc, &ns, &ep).await?,
            // still parked, make sure the listeners survived a restart
            (true, false, _) => self.intercept(&svc, &ns, false).await?,
            (false, false, _) => self.intercept(&svc, &ns, true).await?,
            _ => {}
        }
        Ok(Action::Done)
    }

    async fn cleanup(&self, key: &ObjectKey) -> Result<()> {
        let Some(ns) = key.namespace.as_deref() else {
            return Ok(());
        };
        for info in self.ports.remove_target_for_all_ports(&key.name, ns) {
            info.close();
            drop(info.drain());
        }
        Ok(())
    }
}

fn service_ports(svc: &Service) -> &[ServicePort] {
    svc.spec
        .as_ref()
        .and_then(|s| s.ports.as_deref())
        .unwrap_or_default()
}

/// ClusterIP with at least one TCP port, none of them zero
pub(crate) fn validate(svc: &Service) -> Result<(), ActivatorError> {
    let ineligible = |reason| ActivatorError::Ineligible {
        service: svc.name_any(),
        reason,
    };
    let spec = svc.spec.as_ref().ok_or_else(|| ineligible("no spec"))?;
    if spec.type_.as_deref().is_some_and(|t| t != "ClusterIP") {
        return Err(ineligible("not a ClusterIP service"));
    }
    let ports = service_ports(svc);
    if ports.is_empty() {
        return Err(ineligible("no ports"));
    }
    for port in ports {
        if port.protocol.as_deref().is_some_and(|p| p != "TCP") {
            return Err(ineligible("only TCP ports are supported"));
        }
        if port.port == 0 {
            return Err(ineligible("port is zero"));
        }
    }
    Ok(())
}

/// Endpoints pointing every Service port at its local listener
pub(crate) fn intercepted_endpoints(
    svc: &Service,
    pod_ip: &str,
    listeners: &[(ServicePort, u16)],
) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: Some(svc.name_any()),
            namespace: svc.namespace(),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: pod_ip.to_string(),
                ..Default::default()
            }]),
            not_ready_addresses: None,
            ports: Some(
                listeners
                    .iter()
                    .map(|(port, local)| EndpointPort {
                        name: port.name.clone(),
                        port: i32::from(*local),
                        protocol: Some("TCP".to_string()),
                        app_protocol: None,
                    })
                    .collect(),
            ),
        }]),
    }
}

/// Whether the endpoints list an address other than the activator
pub(crate) fn has_live_addresses(endpoints: &Endpoints, pod_ip: &str) -> bool {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|s| s.addresses.iter().flatten())
        .any(|a| a.ip != pod_ip)
}

/// `ip:port` of a real endpoint for `port`, matched by its target port
pub(crate) fn resolve_upstream(
    endpoints: &Endpoints,
    port: &ServicePort,
    pod_ip: &str,
) -> Option<String> {
    for subset in endpoints.subsets.iter().flatten() {
        let Some(address) = subset
            .addresses
            .iter()
            .flatten()
            .find(|a| a.ip != pod_ip)
        else {
            continue;
        };
        let ports = subset.ports.as_deref().unwrap_or_default();
        let matched = match &port.target_port {
            Some(IntOrString::Int(number)) => ports.iter().find(|p| p.port == *number),
            Some(IntOrString::String(name)) => ports
                .iter()
                .find(|p| p.name.as_deref() == Some(name.as_str())),
            None => ports.iter().find(|p| p.port == port.port),
        }
        .or_else(|| ports.iter().find(|p| p.name.is_some() && p.name == port.name));
        if let Some(p) = matched {
            return Some(format!("{}:{}", address.ip, p.port));
        }
    }
    None
}

/// Save the selector in an annotation and clear it
pub(crate) fn snapshot_patch(svc: &Service) -> Result<Value, ActivatorError> {
    let selector = svc
        .spec
        .as_ref()
        .and_then(|s| s.selector.clone())
        .unwrap_or_default();
    let cached = serde_json::to_string(&selector)?;
    Ok(json!({
        "metadata": {"annotations": {(annotations::CACHED_MODEL_ACTIVATOR): cached}},
        "spec": {"selector": null},
    }))
}

/// Put the saved selector back and drop the snapshot. `None` when there is no snapshot.
pub(crate) fn restore_patch(svc: &Service) -> Option<Value> {
    let cached = svc.annotations().get(annotations::CACHED_MODEL_ACTIVATOR)?;
    let selector: BTreeMap<String, String> = match serde_json::from_str(cached) {
        Ok(selector) => selector,
        Err(e) => {
            tracing::warn!(
                service = %svc.name_any(),
                error = %e,
                "discarding unreadable selector snapshot"
            );
            BTreeMap::new()
        }
    };
    Some(json!({
        "metadata": {"annotations": {(annotations::CACHED_MODEL_ACTIVATOR): null}},
        "spec": {"selector": selector},
    }))
}
