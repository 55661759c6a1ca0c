// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Replica selection: every filter plugin may veto a replica, the surviving replicas are
//! ranked by the weighted sum of all score plugins.

pub mod framework;
pub mod plugins;
pub mod registry;

use std::sync::Arc;

use framework::{Plugin, standardize};
use registry::{PluginFactory, Registry, RegistryError};

use crate::store::{DataStore, ReplicaId, Store};

pub struct Dispatcher {
    registry: Registry,
    store: Arc<dyn Store>,
    plugins: Vec<Arc<dyn Plugin>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.plugins.iter().map(|p| p.name()).collect();
        f.debug_struct("Dispatcher").field("plugins", &names).finish()
    }
}

impl Dispatcher {
    pub fn new(registry: Registry, store: Arc<dyn Store>) -> Self {
        Self {
            registry,
            store,
            plugins: Vec::new(),
        }
    }

    /// A dispatcher running every in-tree plugin
    pub fn with_in_tree_plugins(store: Arc<dyn Store>) -> Result<Self, RegistryError> {
        let mut dispatcher = Self::new(Registry::new(), store);
        dispatcher.register_plugins(&plugins::in_tree())?;
        Ok(dispatcher)
    }

    /// Register and instantiate `factories` in order. A name that is already registered
    /// aborts start-up.
    pub fn register_plugins(
        &mut self,
        factories: &[(&str, PluginFactory)],
    ) -> Result<(), RegistryError> {
        for (name, factory) in factories {
            self.registry.register(name, *factory)?;
            let plugin = factory().map_err(|source| RegistryError::Build {
                name: name.to_string(),
                source,
            })?;
            tracing::info!(plugin = %name, "registered dispatcher plugin");
            self.plugins.push(plugin);
        }
        Ok(())
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Replicas of `model` that pass every filter. Unknown models have none.
    pub fn filter(&self, model: &str) -> Vec<ReplicaId> {
        match self.store.data_store(model) {
            Ok(data) => self.run_filters(&data),
            Err(e) => {
                tracing::debug!(model, error = %e, "nothing to filter");
                Vec::new()
            }
        }
    }

    /// The best of `candidates`, or `None` when there are none
    pub fn score(&self, candidates: &[ReplicaId], model: &str) -> Option<ReplicaId> {
        let data = self.store.data_store(model).ok()?;
        self.run_scores(candidates, &data)
    }

    pub fn schedule(&self, model: &str) -> Option<ReplicaId> {
        // one snapshot for both phases
        let data = match self.store.data_store(model) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!(model, error = %e, "no replicas to schedule on");
                return None;
            }
        };
        let candidates = self.run_filters(&data);
        let picked = self.run_scores(&candidates, &data);
        tracing::debug!(model, candidates = candidates.len(), picked = ?picked, "scheduled");
        picked
    }

    fn run_filters(&self, data: &DataStore) -> Vec<ReplicaId> {
        data.filter_iterate(|replica, indicator| {
            self.plugins
                .iter()
                .filter_map(|p| p.as_filter())
                .all(|plugin| {
                    let status = plugin.filter(indicator);
                    if !status.is_success() {
                        tracing::debug!(
                            replica,
                            plugin = plugin.name(),
                            %status,
                            "replica filtered out"
                        );
                    }
                    status.is_success()
                })
        })
    }

    fn run_scores(&self, candidates: &[ReplicaId], data: &DataStore) -> Option<ReplicaId> {
        data.score_iterate(candidates.iter().map(String::as_str), |_, indicator| {
            self.plugins
                .iter()
                .filter_map(|p| p.as_score())
                .map(|plugin| standardize(plugin.score(indicator, data) * plugin.weight()))
                .sum()
        })
    }
}
