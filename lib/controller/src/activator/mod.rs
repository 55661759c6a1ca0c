// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scale-from-zero TCP front.
//!
//! While a workload is parked at zero replicas the activator points the endpoints of its
//! Service at local listeners, buffers the connections that arrive, asks the workload to scale
//! up and, once a real endpoint shows up, tunnels the buffered connections to it and hands the
//! Service back to its selector.

mod port_manager;
mod reconciler;
mod scaler;
mod tunnel;

pub use port_manager::{ActivatorMetrics, PortInformation, PortManager, ScaleUp, Target};
pub use reconciler::ActivatorReconciler;
pub use scaler::PlaygroundScaler;
pub use tunnel::forward;

#[derive(Debug, thiserror::Error)]
pub enum ActivatorError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("service {service} can not be activated: {reason}")]
    Ineligible {
        service: String,
        reason: &'static str,
    },

    #[error("service {0} does not name a workload")]
    MissingWorkload(String),

    #[error("gave up updating playground {0} after repeated conflicts")]
    Conflict(String),

    #[error("timed out waiting for pod {0} to become ready")]
    ScaleUpTimeout(String),

    #[error("pod {0} has no IP")]
    NoPodIp(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to serialize selector: {0}")]
    Snapshot(#[from] serde_json::Error),
}
