// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use llmaz_runtime::CancellationToken;
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::activator as metric_names;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntCounterVec, IntGauge};
use tokio::net::{TcpListener, TcpStream};

use super::ActivatorError;

/// One port of one Service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub name: String,
    pub namespace: String,
    pub port: i32,
}

impl Target {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, port: i32) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

/// Wakes the workload behind a [`Target`]
#[async_trait]
pub trait ScaleUp: Send + Sync + 'static {
    async fn scale_up(&self, target: &Target) -> Result<(), ActivatorError>;
}

#[derive(Clone, Debug)]
pub struct ActivatorMetrics {
    intercepted_ports: IntGauge,
    buffered_connections: IntCounter,
    scale_ups: IntCounterVec,
}

impl ActivatorMetrics {
    pub fn new(registry: &MetricsRegistry) -> anyhow::Result<Self> {
        Ok(Self {
            intercepted_ports: registry.create_int_gauge(
                metric_names::INTERCEPTED_PORTS,
                "Service ports held by the activator",
            )?,
            buffered_connections: registry.create_int_counter(
                metric_names::BUFFERED_CONNECTIONS_TOTAL,
                "Connections accepted while the workload was parked",
            )?,
            scale_ups: registry.create_int_counter_vec(
                metric_names::SCALE_UPS_TOTAL,
                "Scale-up attempts by result",
                &["result"],
            )?,
        })
    }
}

/// A local listener standing in for one [`Target`]
pub struct PortInformation {
    target: Target,
    port: u16,
    connections: Mutex<Vec<TcpStream>>,
    /// Set while a scale-up is pending or done
    triggered: AtomicBool,
    cancel: CancellationToken,
}

impl fmt::Debug for PortInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortInformation")
            .field("target", &self.target)
            .field("port", &self.port)
            .field("buffered", &self.buffered())
            .finish()
    }
}

impl PortInformation {
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Port of the local listener
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn buffered(&self) -> usize {
        self.connections.lock().len()
    }

    /// Stop accepting. The listener socket is released once the accept loop exits.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Take the buffered connections
    pub fn drain(&self) -> Vec<TcpStream> {
        std::mem::take(&mut *self.connections.lock())
    }
}

#[derive(Default)]
struct Ports {
    by_target: HashMap<Target, Arc<PortInformation>>,
    by_port: HashMap<u16, Target>,
}

impl Ports {
    fn remove(&mut self, target: &Target) -> Option<Arc<PortInformation>> {
        let info = self.by_target.remove(target)?;
        self.by_port.remove(&info.port);
        Some(info)
    }
}

/// Bijection between [`Target`]s and local listeners
pub struct PortManager {
    ports: Mutex<Ports>,
    scaler: Arc<dyn ScaleUp>,
    metrics: Option<ActivatorMetrics>,
    cancel: CancellationToken,
}

impl PortManager {
    /// Listeners stop when `cancel` fires
    pub fn new(scaler: Arc<dyn ScaleUp>, cancel: CancellationToken) -> Self {
        Self {
            ports: Mutex::new(Ports::default()),
            scaler,
            metrics: None,
            cancel,
        }
    }

    pub fn with_metrics(mut self, metrics: ActivatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The listener for `target`, bound and started on first use
    pub fn add_target(&self, target: Target) -> Result<Arc<PortInformation>, ActivatorError> {
        let mut ports = self.ports.lock();
        if let Some(existing) = ports.by_target.get(&target) {
            return Ok(existing.clone());
        }

        let std_listener =
            std::net::TcpListener::bind("0.0.0.0:0").map_err(ActivatorError::Bind)?;
        std_listener.set_nonblocking(true).map_err(ActivatorError::Bind)?;
        let port = std_listener.local_addr().map_err(ActivatorError::Bind)?.port();
        let listener = TcpListener::from_std(std_listener).map_err(ActivatorError::Bind)?;

        let info = Arc::new(PortInformation {
            target: target.clone(),
            port,
            connections: Mutex::new(Vec::new()),
            triggered: AtomicBool::new(false),
            cancel: self.cancel.child_token(),
        });
        ports.by_port.insert(port, target.clone());
        ports.by_target.insert(target.clone(), info.clone());
        self.update_gauge(&ports);
        drop(ports);

        tracing::info!(service = %target, port, "intercepting");
        tokio::spawn(accept_loop(
            listener,
            info.clone(),
            self.scaler.clone(),
            self.metrics.clone(),
        ));
        Ok(info)
    }

    pub fn get(&self, target: &Target) -> Option<Arc<PortInformation>> {
        self.ports.lock().by_target.get(target).cloned()
    }

    pub fn target_for_port(&self, port: u16) -> Option<Target> {
        self.ports.lock().by_port.get(&port).cloned()
    }

    /// Forget `target`; the caller closes and drains the returned listener
    pub fn remove_target(&self, target: &Target) -> Option<Arc<PortInformation>> {
        let mut ports = self.ports.lock();
        let info = ports.remove(target);
        self.update_gauge(&ports);
        info
    }

    /// Forget every port of the Service `name` in `namespace`
    pub fn remove_target_for_all_ports(
        &self,
        name: &str,
        namespace: &str,
    ) -> Vec<Arc<PortInformation>> {
        let mut ports = self.ports.lock();
        let targets: Vec<Target> = ports
            .by_target
            .keys()
            .filter(|t| t.name == name && t.namespace == namespace)
            .cloned()
            .collect();
        let removed = targets.iter().filter_map(|t| ports.remove(t)).collect();
        self.update_gauge(&ports);
        removed
    }

    pub fn len(&self) -> usize {
        self.ports.lock().by_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update_gauge(&self, ports: &Ports) {
        if let Some(m) = &self.metrics {
            m.intercepted_ports.set(ports.by_target.len() as i64);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    info: Arc<PortInformation>,
    scaler: Arc<dyn ScaleUp>,
    metrics: Option<ActivatorMetrics>,
) {
    loop {
        let accepted = tokio::select! {
            _ = info.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(
                    service = %info.target,
                    error = %e,
                    "accept failed, closing listener"
                );
                break;
            }
        };
        tracing::debug!(service = %info.target, %peer, "buffering connection");
        info.connections.lock().push(stream);
        if let Some(m) = &metrics {
            m.buffered_connections.inc();
        }

        if !info.triggered.swap(true, Ordering::AcqRel) {
            tokio::spawn(trigger_scale_up(info.clone(), scaler.clone(), metrics.clone()));
        }
    }
    tracing::debug!(service = %info.target, port = info.port, "listener closed");
}

async fn trigger_scale_up(
    info: Arc<PortInformation>,
    scaler: Arc<dyn ScaleUp>,
    metrics: Option<ActivatorMetrics>,
) {
    let result = scaler.scale_up(&info.target).await;
    if let Some(m) = &metrics {
        let label = if result.is_ok() { "success" } else { "error" };
        m.scale_ups.with_label_values(&[label]).inc();
    }
    if let Err(e) = result {
        let rejected = info.drain().len();
        tracing::error!(service = %info.target, rejected, error = %e, "scale up failed");
        // the next connection tries again
        info.triggered.store(false, Ordering::Release);
    }
}
