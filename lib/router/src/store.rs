// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Live per-model view of replica load.
//!
//! Every model owns a [`DataStore`]: the latest [`Indicator`] of each replica serving it plus
//! the running `[min, max]` of each metric. The bounds only ever widen on insert, so after a
//! replica is removed they may lag behind the remaining values. Scorers normalise against
//! them and tolerate the slack.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

/// Replica identifier, `namespace/name` for pods discovered by the watcher
pub type ReplicaId = String;

/// Read-only view of one model's data, cheap to clone and safe to hold across awaits
pub type DataStoreSnapshot = Arc<DataStore>;

/// Load of a single replica. A metric the backend does not export reads as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Indicator {
    pub running_queue_size: f64,
    pub waiting_queue_size: f64,
    pub kv_cache_usage: f64,
}

impl Indicator {
    pub fn new(running_queue_size: f64, waiting_queue_size: f64, kv_cache_usage: f64) -> Self {
        Self {
            running_queue_size,
            waiting_queue_size,
            kv_cache_usage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    fn at(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    fn widen(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("model {0} not found")]
    ModelNotFound(String),

    #[error("replica {replica} of model {model} not found")]
    ReplicaNotFound { replica: String, model: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataStore {
    indicators: BTreeMap<ReplicaId, Indicator>,
    running_queue_size: Bounds,
    waiting_queue_size: Bounds,
    kv_cache_usage: Bounds,
}

impl DataStore {
    fn new(replica: &str, indicator: Indicator) -> Self {
        Self {
            indicators: BTreeMap::from([(replica.to_string(), indicator)]),
            running_queue_size: Bounds::at(indicator.running_queue_size),
            waiting_queue_size: Bounds::at(indicator.waiting_queue_size),
            kv_cache_usage: Bounds::at(indicator.kv_cache_usage),
        }
    }

    fn upsert(&mut self, replica: &str, indicator: Indicator) {
        self.running_queue_size.widen(indicator.running_queue_size);
        self.waiting_queue_size.widen(indicator.waiting_queue_size);
        self.kv_cache_usage.widen(indicator.kv_cache_usage);
        self.indicators.insert(replica.to_string(), indicator);
    }

    pub fn get(&self, replica: &str) -> Option<&Indicator> {
        self.indicators.get(replica)
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, &Indicator)> {
        self.indicators.iter()
    }

    pub fn running_queue_size(&self) -> Bounds {
        self.running_queue_size
    }

    pub fn waiting_queue_size(&self) -> Bounds {
        self.waiting_queue_size
    }

    pub fn kv_cache_usage(&self) -> Bounds {
        self.kv_cache_usage
    }

    /// Replicas for which `keep` returns true, in replica id order
    pub fn filter_iterate<F>(&self, mut keep: F) -> Vec<ReplicaId>
    where
        F: FnMut(&str, &Indicator) -> bool,
    {
        self.indicators
            .iter()
            .filter(|(id, indicator)| keep(id, indicator))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Highest scoring replica among `candidates`. Ties go to the earlier candidate and a
    /// score of 0 still wins, so any candidate known to this store yields a pick. Candidates
    /// without an indicator are skipped.
    pub fn score_iterate<'a, I, F>(&self, candidates: I, mut score: F) -> Option<ReplicaId>
    where
        I: IntoIterator<Item = &'a str>,
        F: FnMut(&str, &Indicator) -> f64,
    {
        let mut best: Option<(&'a str, f64)> = None;
        for id in candidates {
            let Some(indicator) = self.indicators.get(id) else {
                continue;
            };
            let value = score(id, indicator);
            match best {
                Some((_, top)) if value <= top => {}
                _ => best = Some((id, value)),
            }
        }
        best.map(|(id, _)| id.to_string())
    }
}

/// Indicator storage shared by the aggregator (writer) and the dispatcher (reader)
pub trait Store: Send + Sync {
    /// Replace the replica's indicator and widen the model's bounds
    fn insert(&self, replica: &str, model: &str, indicator: Indicator);

    /// Drop the replica; a model left without replicas is dropped too
    fn remove(&self, replica: &str, model: &str);

    fn get(&self, replica: &str, model: &str) -> Result<Indicator, StoreError>;

    fn data_store(&self, model: &str) -> Result<DataStoreSnapshot, StoreError>;

    /// Replicas across all models
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process [`Store`]. A single lock guards the model map, so a model's indicators and
/// bounds always change together.
#[derive(Debug, Default)]
pub struct MemoryStore {
    models: RwLock<HashMap<String, DataStoreSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.models.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Store for MemoryStore {
    fn insert(&self, replica: &str, model: &str, indicator: Indicator) {
        let mut models = self.models.write();
        match models.get_mut(model) {
            Some(data) => Arc::make_mut(data).upsert(replica, indicator),
            None => {
                models.insert(model.to_string(), Arc::new(DataStore::new(replica, indicator)));
            }
        }
    }

    fn remove(&self, replica: &str, model: &str) {
        let mut models = self.models.write();
        let Some(data) = models.get_mut(model) else {
            return;
        };
        if !data.indicators.contains_key(replica) {
            return;
        }
        let data = Arc::make_mut(data);
        data.indicators.remove(replica);
        if data.is_empty() {
            models.remove(model);
        }
    }

    fn get(&self, replica: &str, model: &str) -> Result<Indicator, StoreError> {
        let models = self.models.read();
        let data = models
            .get(model)
            .ok_or_else(|| StoreError::ModelNotFound(model.to_string()))?;
        data.get(replica)
            .copied()
            .ok_or_else(|| StoreError::ReplicaNotFound {
                replica: replica.to_string(),
                model: model.to_string(),
            })
    }

    fn data_store(&self, model: &str) -> Result<DataStoreSnapshot, StoreError> {
        self.models
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| StoreError::ModelNotFound(model.to_string()))
    }

    fn len(&self) -> usize {
        self.models.read().values().map(|d| d.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_first_insert_sets_bounds() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(10.0, 20.0, 0.5));

        let data = store.data_store("m").unwrap();
        assert_eq!(data.running_queue_size(), Bounds { min: 10.0, max: 10.0 });
        assert_eq!(data.waiting_queue_size(), Bounds { min: 20.0, max: 20.0 });
        assert_eq!(data.kv_cache_usage(), Bounds { min: 0.5, max: 0.5 });
    }

    #[test]
    fn test_insert_get_and_bounds() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(10.0, 20.0, 0.5));
        store.insert("r2", "m", Indicator::new(40.0, 0.0, 0.9));

        assert_eq!(store.get("r2", "m").unwrap(), Indicator::new(40.0, 0.0, 0.9));
        assert_eq!(store.len(), 2);

        let data = store.data_store("m").unwrap();
        assert_eq!(data.running_queue_size(), Bounds { min: 10.0, max: 40.0 });
        assert_eq!(data.waiting_queue_size(), Bounds { min: 0.0, max: 20.0 });
        assert_eq!(data.kv_cache_usage(), Bounds { min: 0.5, max: 0.9 });
    }

    #[test]
    fn test_insert_replaces_prior_indicator() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(10.0, 0.0, 0.0));
        store.insert("r1", "m", Indicator::new(2.0, 0.0, 0.0));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("r1", "m").unwrap().running_queue_size, 2.0);
        // bounds keep the old extreme
        let data = store.data_store("m").unwrap();
        assert_eq!(data.running_queue_size(), Bounds { min: 2.0, max: 10.0 });
    }

    #[test]
    fn test_remove_last_replica_drops_model() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::default());
        store.insert("r2", "m", Indicator::default());

        store.remove("r1", "m");
        assert_matches!(store.get("r1", "m"), Err(StoreError::ReplicaNotFound { .. }));
        assert!(store.data_store("m").is_ok());

        store.remove("r2", "m");
        assert_matches!(store.data_store("m"), Err(StoreError::ModelNotFound(m)) if m == "m");
        assert!(store.is_empty());

        // unknown replica and model are ignored
        store.remove("r9", "m");
        store.remove("r9", "other");
    }

    #[test]
    fn test_snapshot_is_isolated_from_writes() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(1.0, 1.0, 0.1));
        let before = store.data_store("m").unwrap();

        store.insert("r2", "m", Indicator::new(5.0, 5.0, 0.5));
        assert_eq!(before.len(), 1);
        assert_eq!(store.data_store("m").unwrap().len(), 2);
    }

    #[test]
    fn test_models_are_independent() {
        let store = MemoryStore::new();
        store.insert("r1", "a", Indicator::new(1.0, 0.0, 0.0));
        store.insert("r1", "b", Indicator::new(100.0, 0.0, 0.0));

        assert_eq!(store.models(), ["a", "b"]);
        let a = store.data_store("a").unwrap();
        assert_eq!(a.running_queue_size(), Bounds { min: 1.0, max: 1.0 });
    }

    #[test]
    fn test_filter_iterate() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(1.0, 0.0, 0.0));
        store.insert("r2", "m", Indicator::new(9.0, 0.0, 0.0));
        store.insert("r3", "m", Indicator::new(3.0, 0.0, 0.0));

        let data = store.data_store("m").unwrap();
        let kept = data.filter_iterate(|_, i| i.running_queue_size < 5.0);
        assert_eq!(kept, ["r1", "r3"]);
    }

    #[test]
    fn test_score_iterate_first_highest_wins() {
        let store = MemoryStore::new();
        for id in ["r1", "r2", "r3"] {
            store.insert(id, "m", Indicator::default());
        }
        let data = store.data_store("m").unwrap();

        let scores = HashMap::from([("r1", 10.0), ("r2", 30.0), ("r3", 30.0)]);
        let best = data.score_iterate(["r1", "r2", "r3"], |id, _| scores[id]);
        assert_eq!(best.as_deref(), Some("r2"));

        // all zero still picks the first candidate
        let best = data.score_iterate(["r3", "r1"], |_, _| 0.0);
        assert_eq!(best.as_deref(), Some("r3"));

        assert_eq!(data.score_iterate(["missing"], |_, _| 1.0), None);
        assert_eq!(data.score_iterate(Vec::<&str>::new(), |_, _| 1.0), None);
    }

    fn indicator() -> impl Strategy<Value = Indicator> {
        (0.0..1000.0f64, 0.0..1000.0f64, 0.0..1.0f64)
            .prop_map(|(r, w, kv)| Indicator::new(r, w, kv))
    }

    proptest! {
        #[test]
        fn prop_values_within_bounds(
            writes in prop::collection::vec((0usize..5, indicator()), 1..40)
        ) {
            let store = MemoryStore::new();
            for (replica, indicator) in &writes {
                store.insert(&format!("r{replica}"), "m", *indicator);
            }
            let data = store.data_store("m").unwrap();
            for (_, i) in data.iter() {
                prop_assert!(data.running_queue_size().contains(i.running_queue_size));
                prop_assert!(data.waiting_queue_size().contains(i.waiting_queue_size));
                prop_assert!(data.kv_cache_usage().contains(i.kv_cache_usage));
            }
            let distinct: std::collections::HashSet<_> = writes.iter().map(|(r, _)| r).collect();
            prop_assert_eq!(store.len(), distinct.len());
        }

        #[test]
        fn prop_filter_order_independent(
            values in prop::collection::vec(indicator(), 1..20),
            a in 0.0..1000.0f64,
            b in 0.0..1.0f64,
        ) {
            let store = MemoryStore::new();
            for (n, indicator) in values.iter().enumerate() {
                store.insert(&format!("r{n}"), "m", *indicator);
            }
            let data = store.data_store("m").unwrap();
            let by_queue = |_: &str, i: &Indicator| i.running_queue_size <= a;
            let by_cache = |_: &str, i: &Indicator| i.kv_cache_usage <= b;

            let ab = data.filter_iterate(|id, i| by_queue(id, i) && by_cache(id, i));
            let ba = data.filter_iterate(|id, i| by_cache(id, i) && by_queue(id, i));
            prop_assert_eq!(ab, ba);
        }
    }
}
