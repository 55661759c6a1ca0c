// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metric name constants and sanitization utilities
//!
//! **Metric names**: allow colons and `__` anywhere. **Label names**: no colons, no `__` prefix.

use once_cell::sync::Lazy;
use regex::Regex;

/// Metric name prefixes used across the metrics system
pub mod name_prefix {
    /// Prefix for controller-manager metrics
    pub const MANAGER: &str = "llmaz_manager";

    /// Prefix for router metrics
    pub const ROUTER: &str = "llmaz_router";
}

/// Process-level metrics exposed by every binary
pub mod process {
    /// Seconds since the system status server started
    pub const UPTIME_SECONDS: &str = "uptime_seconds";
}

/// Reconciler metrics
pub mod reconciler {
    /// Total reconciliations, labelled by controller and result
    pub const RECONCILE_TOTAL: &str = "reconcile_total";

    /// Reconcile latency in seconds
    pub const RECONCILE_DURATION_SECONDS: &str = "reconcile_duration_seconds";

    /// Keys waiting in a controller's work queue
    pub const WORKQUEUE_DEPTH: &str = "workqueue_depth";
}

/// Activator metrics
pub mod activator {
    /// Listeners currently intercepting traffic
    pub const INTERCEPTED_PORTS: &str = "activator_intercepted_ports";

    /// Connections buffered while waiting for a scale-up
    pub const BUFFERED_CONNECTIONS_TOTAL: &str = "activator_buffered_connections_total";

    /// Scale-up callbacks fired
    pub const SCALE_UPS_TOTAL: &str = "activator_scale_ups_total";
}

/// Router metrics
pub mod router {
    /// Scrapes attempted by the aggregator
    pub const SCRAPES_TOTAL: &str = "scrapes_total";

    /// Scrapes that failed
    pub const SCRAPE_FAILURES_TOTAL: &str = "scrape_failures_total";

    /// Replicas the aggregator is scraping
    pub const LIVE_REPLICAS: &str = "live_replicas";

    /// Routing decisions, labelled by result
    pub const ROUTE_DECISIONS_TOTAL: &str = "route_decisions_total";
}

static INVALID_METRIC_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_:]").unwrap_or_else(|_| unreachable!()));

/// Replace characters that are not valid in a Prometheus metric name with `_`
pub fn sanitize_prometheus_name(raw: &str) -> String {
    let mut name = INVALID_METRIC_CHARS.replace_all(raw, "_").into_owned();
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Join a prefix and a metric name
pub fn build_metric_name(prefix: &str, name: &str) -> String {
    sanitize_prometheus_name(&format!("{prefix}_{name}"))
}
