// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::sync::Arc;

use super::framework::Plugin;

pub type PluginFactory = fn() -> anyhow::Result<Arc<dyn Plugin>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a plugin named {0} already exists")]
    AlreadyExists(String),

    #[error("no plugin named {0} exists")]
    NotFound(String),

    #[error("failed to build plugin {name}: {source}")]
    Build {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Plugin factories by name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, PluginFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, factory: PluginFactory) -> Result<(), RegistryError> {
        if self.factories.contains_key(name) {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        self.factories
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<PluginFactory> {
        self.factories.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::plugins::latency_aware::{self, LatencyAware};
    use assert_matches::assert_matches;

    #[test]
    fn test_register_and_unregister() {
        let mut registry = Registry::new();
        registry.register(latency_aware::NAME, LatencyAware::factory).unwrap();
        assert!(registry.contains(latency_aware::NAME));

        let err = registry
            .register(latency_aware::NAME, LatencyAware::factory)
            .unwrap_err();
        assert_eq!(err.to_string(), "a plugin named LatencyAware already exists");

        registry.unregister(latency_aware::NAME).unwrap();
        assert!(registry.is_empty());
        assert_matches!(
            registry.unregister(latency_aware::NAME),
            Err(RegistryError::NotFound(n)) if n == "LatencyAware"
        );
    }

    #[test]
    fn test_factory_builds_plugin() {
        let mut registry = Registry::new();
        registry.register(latency_aware::NAME, LatencyAware::factory).unwrap();
        let plugin = (registry.get(latency_aware::NAME).unwrap())().unwrap();
        assert_eq!(plugin.name(), "LatencyAware");
        assert!(plugin.as_score().is_some());
        assert!(plugin.as_filter().is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), ["LatencyAware"]);
    }
}
