// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metric-driven routing for model-serving replicas.
//!
//! The [`watcher`] keeps the [`aggregator`]'s replica set in line with ready pods, the
//! aggregator scrapes each replica's `/metrics` into the indicator [`store`], and the
//! [`dispatcher`] picks a replica per request from the stored indicators.

pub mod aggregator;
pub mod backend;
pub mod dispatcher;
pub mod fetcher;
pub mod metrics;
pub mod store;
pub mod watcher;

pub use aggregator::{Aggregator, AggregatorConfig, AggregatorMetrics, Replica, ReplicaKey};
pub use dispatcher::Dispatcher;
pub use fetcher::{FetchError, MetricsFetcher, Scrape};
pub use store::{DataStore, DataStoreSnapshot, Indicator, MemoryStore, Store, StoreError};
pub use watcher::{ReplicaSink, ReplicaWatcher};
