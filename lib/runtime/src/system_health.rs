// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Liveness and readiness state served by the system status server.
//!
//! The process is live as long as it answers. Readiness starts at the status handed to
//! [`SystemHealth::new`] and additionally requires every registered check to report ready;
//! the manager registers `"webhook"` and flips it once the admission server is listening.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::config::HealthStatus;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: f64,
    pub checks: BTreeMap<String, &'static str>,
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    system_health: Arc<RwLock<HealthStatus>>,
    checks: Arc<RwLock<BTreeMap<String, HealthStatus>>>,
    health_path: String,
    ready_path: String,
    start_time: Instant,
}

impl SystemHealth {
    pub fn new(
        starting_health_status: HealthStatus,
        health_path: String,
        ready_path: String,
    ) -> Self {
        Self {
            system_health: Arc::new(RwLock::new(starting_health_status)),
            checks: Arc::new(RwLock::new(BTreeMap::new())),
            health_path,
            ready_path,
            start_time: Instant::now(),
        }
    }

    pub fn set_health_status(&self, status: HealthStatus) {
        *self.system_health.write() = status;
    }

    /// Register a named readiness check, initially not ready
    pub fn register_check(&self, name: impl Into<String>) {
        self.checks
            .write()
            .entry(name.into())
            .or_insert(HealthStatus::NotReady);
    }

    pub fn set_check_status(&self, name: &str, status: HealthStatus) {
        let mut checks = self.checks.write();
        match checks.get_mut(name) {
            Some(current) => *current = status,
            None => {
                tracing::debug!(check = name, "registering readiness check on first update");
                checks.insert(name.to_string(), status);
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.system_health.read() == HealthStatus::Ready
            && self
                .checks
                .read()
                .values()
                .all(|s| *s == HealthStatus::Ready)
    }

    pub fn report(&self) -> HealthReport {
        let checks = self
            .checks
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), status_str(*v)))
            .collect();
        HealthReport {
            status: if self.is_ready() { "ready" } else { "notready" },
            uptime_seconds: self.uptime().as_secs_f64(),
            checks,
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }

    pub fn ready_path(&self) -> &str {
        &self.ready_path
    }
}

fn status_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Ready => "ready",
        HealthStatus::NotReady => "notready",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_all_checks() {
        let health = SystemHealth::new(
            HealthStatus::Ready,
            "/healthz".to_string(),
            "/readyz".to_string(),
        );
        assert!(health.is_ready());

        health.register_check("informers");
        assert!(!health.is_ready());
        assert_eq!(health.report().checks["informers"], "notready");

        health.set_check_status("informers", HealthStatus::Ready);
        assert!(health.is_ready());

        health.set_health_status(HealthStatus::NotReady);
        assert!(!health.is_ready());
        assert_eq!(health.report().status, "notready");
    }

    #[test]
    fn test_register_does_not_reset_existing_check() {
        let health = SystemHealth::new(
            HealthStatus::Ready,
            "/healthz".to_string(),
            "/readyz".to_string(),
        );
        health.set_check_status("leader", HealthStatus::Ready);
        health.register_check("leader");
        assert!(health.is_ready());
    }
}
