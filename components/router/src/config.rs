// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use llmaz_router::AggregatorConfig;
use llmaz_runtime::config::environment_names;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Command line flags. Anything left unset falls through to `/etc/llmaz/router.toml` and the
/// `LLMAZ_ROUTER_*` environment.
#[derive(Debug, Default, Parser, Serialize)]
#[command(version, about = "Pick the least loaded replica for a model")]
pub struct Flags {
    /// Address to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Only watch pods in this namespace. All namespaces by default.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_interval_ms: Option<u64>,

    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_timeout_ms: Option<u64>,

    /// Seconds an indicator outlives its last successful scrape
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicator_grace_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct RouterConfig {
    pub host: String,

    #[validate(range(min = 1))]
    pub port: u16,

    pub namespace: Option<String>,

    #[validate(range(min = 1))]
    pub scrape_interval_ms: u64,

    #[validate(range(min = 1))]
    pub scrape_timeout_ms: u64,

    #[validate(range(max = 60))]
    pub indicator_grace_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            namespace: None,
            scrape_interval_ms: 500,
            scrape_timeout_ms: 2000,
            indicator_grace_secs: 30,
        }
    }
}

impl RouterConfig {
    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(RouterConfig::default()))
            .merge(Toml::file("/etc/llmaz/router.toml"))
            .merge(Env::prefixed(environment_names::router::PREFIX))
    }

    /// Defaults, then the config file, then the environment, then `flags`
    pub fn from_settings(flags: &Flags) -> anyhow::Result<RouterConfig> {
        let config: RouterConfig = Self::figment()
            .merge(Serialized::globals(flags))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.scrape_timeout_ms)
    }

    pub fn aggregator(&self) -> anyhow::Result<AggregatorConfig> {
        AggregatorConfig::builder()
            .scrape_interval(Duration::from_millis(self.scrape_interval_ms))
            .indicator_grace_period(Duration::from_secs(self.indicator_grace_secs))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        temp_env::with_vars_unset(["LLMAZ_ROUTER_PORT", "LLMAZ_ROUTER_NAMESPACE"], || {
            let config = RouterConfig::from_settings(&Flags::default()).unwrap();
            assert_eq!(config, RouterConfig::default());
            let aggregator = config.aggregator().unwrap();
            assert_eq!(aggregator.scrape_interval, Duration::from_millis(500));
            assert_eq!(aggregator.indicator_grace_period, Duration::from_secs(30));
        });
    }

    #[test]
    fn test_flags_override_env() {
        temp_env::with_vars(
            [
                ("LLMAZ_ROUTER_PORT", Some("9000")),
                ("LLMAZ_ROUTER_NAMESPACE", Some("from-env")),
            ],
            || {
                let flags = Flags {
                    namespace: Some("from-flag".to_string()),
                    ..Default::default()
                };
                let config = RouterConfig::from_settings(&flags).unwrap();
                assert_eq!(config.port, 9000);
                assert_eq!(config.namespace.as_deref(), Some("from-flag"));
            },
        );
    }

    #[test]
    fn test_rejects_long_grace_period() {
        let flags = Flags {
            indicator_grace_secs: Some(120),
            ..Default::default()
        };
        assert!(RouterConfig::from_settings(&flags).is_err());
    }
}
