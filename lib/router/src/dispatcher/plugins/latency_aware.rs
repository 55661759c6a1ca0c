// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prefers the replica with the shortest queues and the most free KV cache, relative to the
//! other replicas of the same model.

use std::sync::Arc;

use crate::dispatcher::framework::{MAX_SCORE, Plugin, ScorePlugin};
use crate::store::{Bounds, DataStore, Indicator};

pub const NAME: &str = "LatencyAware";

const RUNNING_QUEUE_WEIGHT: f64 = 0.3;
const WAITING_QUEUE_WEIGHT: f64 = 0.3;
const KV_CACHE_WEIGHT: f64 = 0.4;

#[derive(Debug, Default)]
pub struct LatencyAware;

impl LatencyAware {
    pub fn factory() -> anyhow::Result<Arc<dyn Plugin>> {
        Ok(Arc::new(LatencyAware))
    }
}

/// `MAX_SCORE` at the minimum of the range, 0 at the maximum. A flat range contributes
/// nothing.
fn relative(value: f64, bounds: Bounds) -> f64 {
    let range = bounds.range();
    if range == 0.0 {
        return 0.0;
    }
    MAX_SCORE * (1.0 - (value - bounds.min) / range)
}

impl Plugin for LatencyAware {
    fn name(&self) -> &str {
        NAME
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        Some(self)
    }
}

impl ScorePlugin for LatencyAware {
    fn score(&self, indicator: &Indicator, data: &DataStore) -> f64 {
        let running = relative(indicator.running_queue_size, data.running_queue_size());
        let waiting = relative(indicator.waiting_queue_size, data.waiting_queue_size());
        let kv_cache = relative(indicator.kv_cache_usage, data.kv_cache_usage());
        running * RUNNING_QUEUE_WEIGHT + waiting * WAITING_QUEUE_WEIGHT + kv_cache * KV_CACHE_WEIGHT
    }

    fn weight(&self) -> f64 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};

    fn score_of(store: &MemoryStore, replica: &str) -> f64 {
        let data = store.data_store("m").unwrap();
        LatencyAware.score(data.get(replica).unwrap(), &data)
    }

    #[test]
    fn test_less_loaded_scores_higher() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(10.0, 20.0, 0.5));
        store.insert("r2", "m", Indicator::new(5.0, 10.0, 0.2));

        // r1 sits at every max, r2 at every min
        assert_eq!(score_of(&store, "r1"), 0.0);
        assert!((score_of(&store, "r2") - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_metric_is_skipped() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(3.0, 0.0, 0.5));
        store.insert("r2", "m", Indicator::new(1.0, 0.0, 0.5));

        // only the running queue differs
        assert_eq!(score_of(&store, "r1"), 0.0);
        assert!((score_of(&store, "r2") - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_replica_scores_zero() {
        let store = MemoryStore::new();
        store.insert("r1", "m", Indicator::new(3.0, 2.0, 0.5));
        assert_eq!(score_of(&store, "r1"), 0.0);
    }
}
