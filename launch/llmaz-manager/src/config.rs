// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use llmaz_runtime::config::environment_names;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Default, Parser, Serialize)]
#[command(version, about = "Reconcile llmaz playgrounds and services into workloads")]
pub struct Flags {
    /// Address the metrics endpoint binds to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_bind_address: Option<String>,

    /// Address the liveness and readiness probes bind to
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_probe_bind_address: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_bind_address: Option<String>,

    /// Namespace the manager runs in; holds the leader lease
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Address the activator advertises in intercepted endpoints
    #[arg(long, env = environment_names::manager::POD_IP)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_elect: Option<bool>,

    /// Run the scale-from-zero activator
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_serverless: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_serverless"))]
pub struct ManagerConfig {
    #[validate(custom(function = "validate_bind_address"))]
    pub metrics_bind_address: String,

    #[validate(custom(function = "validate_bind_address"))]
    pub health_probe_bind_address: String,

    #[validate(custom(function = "validate_bind_address"))]
    pub webhook_bind_address: String,

    #[validate(length(min = 1))]
    pub namespace: String,

    pub pod_ip: Option<String>,

    pub leader_elect: bool,

    pub enable_serverless: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            metrics_bind_address: ":8080".to_string(),
            health_probe_bind_address: ":8081".to_string(),
            webhook_bind_address: ":9443".to_string(),
            namespace: "llmaz-system".to_string(),
            pod_ip: None,
            leader_elect: false,
            enable_serverless: false,
        }
    }
}

impl ManagerConfig {
    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(ManagerConfig::default()))
            .merge(Toml::file("/etc/llmaz/manager.toml"))
            .merge(Env::prefixed(environment_names::manager::PREFIX))
    }

    /// Defaults, then `/etc/llmaz/manager.toml`, then `LLMAZ_MANAGER_*`, then `flags`
    pub fn from_settings(flags: &Flags) -> anyhow::Result<ManagerConfig> {
        let config: ManagerConfig = Self::figment()
            .merge(Serialized::globals(flags))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}

/// Split a `host:port` bind address. An empty host (`:8080`) means every interface.
pub fn split_bind_address(addr: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("bind address {addr:?} has no port"))?;
    let port = port
        .parse()
        .map_err(|e| anyhow::anyhow!("bind address {addr:?}: invalid port: {e}"))?;
    let host = match host {
        "" => "0.0.0.0",
        host => host.trim_start_matches('[').trim_end_matches(']'),
    };
    Ok((host.to_string(), port))
}

fn validate_bind_address(addr: &str) -> Result<(), ValidationError> {
    split_bind_address(addr)
        .map(|_| ())
        .map_err(|_| ValidationError::new("bind address must be host:port"))
}

fn validate_serverless(config: &ManagerConfig) -> Result<(), ValidationError> {
    if config.enable_serverless && config.pod_ip.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::new("enable_serverless requires pod_ip"));
    }
    Ok(())
}
