// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Periodic scraping of every live replica into the indicator [`Store`].
//!
//! The replica set is fed by the watcher. Each tick starts a scrape batch for the replicas
//! that have no scrape in flight, so a slow replica never has two scrapes outstanding. A
//! replica that keeps failing loses its cached indicator after the grace period but stays a
//! member until the watcher deletes it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use derive_builder::Builder;
use futures::StreamExt;
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::router as metric_names;
use parking_lot::Mutex;
use prometheus::{IntCounter, IntGauge};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use validator::{Validate, ValidationError};

use crate::fetcher::{FetchError, Scrape};
use crate::store::{Indicator, Store};

pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_CONCURRENT_SCRAPES: usize = 20;
pub const DEFAULT_INDICATOR_GRACE_PERIOD: Duration = Duration::from_secs(30);
const MAX_INDICATOR_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// `namespace/name`
pub type ReplicaKey = String;

pub fn key_for(namespace: &str, name: &str) -> ReplicaKey {
    format!("{namespace}/{name}")
}

/// A ready pod serving a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Replica {
    pub namespace: String,
    pub name: String,
    pub model: String,
    /// Base URL, e.g. `http://10.0.0.12:8080`
    pub endpoint: String,
}

impl Replica {
    pub fn key(&self) -> ReplicaKey {
        key_for(&self.namespace, &self.name)
    }
}

#[derive(Debug, Clone, Builder, Validate)]
#[builder(build_fn(private, name = "build_internal"))]
pub struct AggregatorConfig {
    #[builder(default = "DEFAULT_SCRAPE_INTERVAL")]
    #[validate(custom(function = "validate_scrape_interval"))]
    pub scrape_interval: Duration,

    #[builder(default = "DEFAULT_MAX_CONCURRENT_SCRAPES")]
    #[validate(range(min = 1))]
    pub max_concurrent_scrapes: usize,

    /// How long an indicator outlives its last successful scrape
    #[builder(default = "DEFAULT_INDICATOR_GRACE_PERIOD")]
    #[validate(custom(function = "validate_grace_period"))]
    pub indicator_grace_period: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            scrape_interval: DEFAULT_SCRAPE_INTERVAL,
            max_concurrent_scrapes: DEFAULT_MAX_CONCURRENT_SCRAPES,
            indicator_grace_period: DEFAULT_INDICATOR_GRACE_PERIOD,
        }
    }
}

impl AggregatorConfig {
    pub fn builder() -> AggregatorConfigBuilder {
        AggregatorConfigBuilder::default()
    }
}

impl AggregatorConfigBuilder {
    pub fn build(&self) -> anyhow::Result<AggregatorConfig> {
        let config = self.build_internal()?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_scrape_interval(interval: &Duration) -> Result<(), ValidationError> {
    if interval.is_zero() {
        return Err(ValidationError::new("scrape_interval must be positive"));
    }
    Ok(())
}

fn validate_grace_period(grace: &Duration) -> Result<(), ValidationError> {
    if *grace > MAX_INDICATOR_GRACE_PERIOD {
        return Err(ValidationError::new("indicator_grace_period must not exceed 60s"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AggregatorMetrics {
    scrapes: IntCounter,
    failures: IntCounter,
    live_replicas: IntGauge,
}

impl AggregatorMetrics {
    pub fn new(registry: &MetricsRegistry) -> anyhow::Result<Self> {
        Ok(Self {
            scrapes: registry
                .create_int_counter(metric_names::SCRAPES_TOTAL, "Replica scrapes attempted")?,
            failures: registry.create_int_counter(
                metric_names::SCRAPE_FAILURES_TOTAL,
                "Replica scrapes that failed",
            )?,
            live_replicas: registry
                .create_int_gauge(metric_names::LIVE_REPLICAS, "Replicas being scraped")?,
        })
    }
}

#[derive(Debug)]
struct Tracked {
    replica: Replica,
    added: Instant,
    last_success: Option<Instant>,
    /// Bumped on every (re-)insert; a scrape result only lands on the generation it was
    /// started for.
    generation: u64,
    in_flight: bool,
    evicted: bool,
}

impl Tracked {
    fn new(replica: Replica, generation: u64) -> Self {
        Self {
            replica,
            generation,
            added: Instant::now(),
            last_success: None,
            in_flight: false,
            evicted: false,
        }
    }
}

struct Inner {
    config: AggregatorConfig,
    store: Arc<dyn Store>,
    scraper: Arc<dyn Scrape>,
    replicas: Mutex<HashMap<ReplicaKey, Tracked>>,
    generations: AtomicU64,
    metrics: Option<AggregatorMetrics>,
}

#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("config", &self.inner.config)
            .field("replicas", &self.len())
            .finish()
    }
}

impl Aggregator {
    pub fn new(
        config: AggregatorConfig,
        store: Arc<dyn Store>,
        scraper: Arc<dyn Scrape>,
        metrics: Option<AggregatorMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                scraper,
                replicas: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                metrics,
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Start tracking `replica`. Re-adding an identical replica is a no-op; a changed
    /// endpoint or model replaces the old entry.
    pub fn add_replica(&self, replica: Replica) {
        let key = replica.key();
        let mut replicas = self.inner.replicas.lock();
        match replicas.get_mut(&key) {
            Some(tracked) if tracked.replica == replica => return,
            Some(tracked) => {
                tracing::debug!(replica = %key, endpoint = %replica.endpoint, "replica changed");
                if tracked.replica.model != replica.model {
                    self.inner.store.remove(&key, &tracked.replica.model);
                }
                *tracked = Tracked::new(replica, self.next_generation());
            }
            None => {
                tracing::info!(
                    replica = %key,
                    model = %replica.model,
                    endpoint = %replica.endpoint,
                    "tracking replica"
                );
                let generation = self.next_generation();
                replicas.insert(key, Tracked::new(replica, generation));
            }
        }
        self.set_live(replicas.len());
    }

    /// Stop tracking the replica and drop its indicator. Unknown keys are ignored.
    pub fn delete_replica(&self, key: &str) {
        let mut replicas = self.inner.replicas.lock();
        if let Some(tracked) = replicas.remove(key) {
            tracing::info!(replica = %key, "untracking replica");
            self.inner.store.remove(key, &tracked.replica.model);
        }
        self.set_live(replicas.len());
    }

    pub fn get_replica(&self, key: &str) -> Option<Replica> {
        self.inner.replicas.lock().get(key).map(|t| t.replica.clone())
    }

    pub fn keys(&self) -> Vec<ReplicaKey> {
        self.inner.replicas.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.replicas.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_generation(&self) -> u64 {
        self.inner.generations.fetch_add(1, Ordering::Relaxed)
    }

    fn set_live(&self, n: usize) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.live_replicas.set(n as i64);
        }
    }

    /// Scrape on every tick until `cancel` fires. Batches still running at that point are
    /// aborted.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.scrape_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut batches = JoinSet::new();

        tracing::info!(
            interval_ms = self.inner.config.scrape_interval.as_millis() as u64,
            "aggregator started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let this = self.clone();
                    batches.spawn(async move { this.scrape_once().await });
                }
                Some(joined) = batches.join_next(), if !batches.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!(error = %e, "scrape batch failed");
                    }
                }
            }
        }
        batches.abort_all();
        tracing::info!("aggregator stopped");
    }

    /// Scrape every replica without a scrape in flight and write the results through
    pub async fn scrape_once(&self) {
        let due = self.begin_batch();
        if due.is_empty() {
            return;
        }
        let limit = self.inner.config.max_concurrent_scrapes.max(1);
        futures::stream::iter(due)
            .map(|(generation, replica)| {
                let scraper = self.inner.scraper.clone();
                async move {
                    let result = scraper.scrape(&replica.endpoint).await;
                    (generation, replica, result)
                }
            })
            .buffer_unordered(limit)
            .for_each(|(generation, replica, result)| {
                self.complete(generation, &replica, result);
                futures::future::ready(())
            })
            .await;
    }

    /// Marks the due replicas in flight and evicts stale indicators
    fn begin_batch(&self) -> Vec<(u64, Replica)> {
        let now = Instant::now();
        let mut replicas = self.inner.replicas.lock();
        let mut due = Vec::new();
        for (key, tracked) in replicas.iter_mut() {
            self.evict_if_stale(key, tracked, now);
            if !tracked.in_flight {
                tracked.in_flight = true;
                due.push((tracked.generation, tracked.replica.clone()));
            }
        }
        due
    }

    fn complete(&self, generation: u64, replica: &Replica, result: Result<Indicator, FetchError>) {
        let key = replica.key();
        if let Some(metrics) = &self.inner.metrics {
            metrics.scrapes.inc();
        }

        let mut replicas = self.inner.replicas.lock();
        // deleted or replaced while the scrape was running
        let Some(tracked) = replicas.get_mut(&key).filter(|t| t.generation == generation) else {
            return;
        };
        tracked.in_flight = false;

        match result {
            Ok(indicator) => {
                tracked.last_success = Some(Instant::now());
                tracked.evicted = false;
                self.inner.store.insert(&key, &replica.model, indicator);
            }
            Err(e) => {
                if let Some(metrics) = &self.inner.metrics {
                    metrics.failures.inc();
                }
                tracing::warn!(replica = %key, error = %e, "failed to scrape replica");
                self.evict_if_stale(&key, tracked, Instant::now());
            }
        }
    }

    fn evict_if_stale(&self, key: &str, tracked: &mut Tracked, now: Instant) {
        if tracked.evicted {
            return;
        }
        let since = tracked.last_success.unwrap_or(tracked.added);
        if now.saturating_duration_since(since) < self.inner.config.indicator_grace_period {
            return;
        }
        tracked.evicted = true;
        if tracked.last_success.is_some() {
            tracing::warn!(replica = %key, "no successful scrape within grace period, evicting");
        }
        self.inner.store.remove(key, &tracked.replica.model);
    }
}
