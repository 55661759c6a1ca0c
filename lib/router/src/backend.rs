// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inference backends recognised from their exported metric names, and the mapping from each
//! backend's metric names onto an [`Indicator`].

use crate::metrics::{MetricError, MetricFamilies, parse_metric_with_no_label};
use crate::store::Indicator;

pub const LLAMACPP: &str = "llamacpp";

/// Backend-specific names of the three load metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMap {
    pub running_queue_size: String,
    pub waiting_queue_size: String,
    pub kv_cache_usage: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    /// Metric name prefix that identifies the backend
    pub prefix: String,
    pub metrics: MetricMap,
}

impl Backend {
    pub fn llamacpp() -> Self {
        Self {
            prefix: LLAMACPP.to_string(),
            metrics: MetricMap {
                running_queue_size: "llamacpp:requests_processing".to_string(),
                waiting_queue_size: "llamacpp:requests_deferred".to_string(),
                kv_cache_usage: "llamacpp:kv_cache_usage_ratio".to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.prefix
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[error("unsupported backend")]
pub struct UnsupportedBackend;

#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Vec<Backend>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self {
            backends: vec![Backend::llamacpp()],
        }
    }
}

impl BackendRegistry {
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Add or replace the backend identified by `prefix`
    pub fn register(&mut self, prefix: impl Into<String>, metrics: MetricMap) {
        let prefix = prefix.into();
        self.backends.retain(|b| b.prefix != prefix);
        self.backends.push(Backend { prefix, metrics });
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    /// The backend owning the first family, in name order, that carries a registered prefix
    pub fn detect_backend(
        &self,
        families: &MetricFamilies,
    ) -> Result<&Backend, UnsupportedBackend> {
        families
            .keys()
            .find_map(|name| self.backends.iter().find(|b| name.starts_with(&b.prefix)))
            .ok_or(UnsupportedBackend)
    }
}

/// Read the backend's load metrics. A metric the replica does not export reads as 0, any
/// other parse failure is returned.
pub fn indicator_from(
    families: &MetricFamilies,
    backend: &Backend,
) -> Result<Indicator, MetricError> {
    let read = |name: &str| match parse_metric_with_no_label(families, name) {
        Ok(value) => Ok(value),
        Err(MetricError::NotFound(_)) => Ok(0.0),
        Err(e) => Err(e),
    };
    Ok(Indicator {
        running_queue_size: read(&backend.metrics.running_queue_size)?,
        waiting_queue_size: read(&backend.metrics.waiting_queue_size)?,
        kv_cache_usage: read(&backend.metrics.kv_cache_usage)?,
    })
}
