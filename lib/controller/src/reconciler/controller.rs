// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::reconciler as metric_names;
use llmaz_runtime::{CancellationToken, WorkQueue};
use prometheus::{HistogramVec, IntCounterVec, IntGauge};
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;

use super::{Action, ObjectKey, Reconciler, controller_keys};

const DEFAULT_WORKERS: usize = 2;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    total: IntCounterVec,
    duration: HistogramVec,
    depth: IntGauge,
}

impl ReconcileMetrics {
    pub fn new(registry: &MetricsRegistry) -> anyhow::Result<Self> {
        Ok(Self {
            total: registry.create_int_counter_vec(
                metric_names::RECONCILE_TOTAL,
                "Reconciliations by controller and result",
                &["controller", "result"],
            )?,
            duration: registry.create_histogram_vec(
                metric_names::RECONCILE_DURATION_SECONDS,
                "Reconcile latency",
                &["controller"],
            )?,
            depth: registry.create_int_gauge(
                metric_names::WORKQUEUE_DEPTH,
                "Keys waiting across all controller queues",
            )?,
        })
    }
}

type KeyStream = BoxStream<'static, Vec<ObjectKey>>;

/// Drives one [`Reconciler`] from a watch on its kind plus any number of related watches.
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    api: Api<R::Object>,
    config: watcher::Config,
    queue: WorkQueue<ObjectKey>,
    triggers: Vec<KeyStream>,
    workers: usize,
    metrics: Option<ReconcileMetrics>,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: R, api: Api<R::Object>, config: watcher::Config) -> Self {
        let queue = WorkQueue::new(reconciler.name());
        Self {
            reconciler: Arc::new(reconciler),
            api,
            config,
            queue,
            triggers: Vec::new(),
            workers: DEFAULT_WORKERS,
            metrics: None,
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn metrics(mut self, metrics: ReconcileMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Handle for enqueueing keys from outside the watches
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    /// Reconcile the controlling `R::Object` whenever an owned `K` changes
    pub fn owns<K>(self, api: Api<K>, config: watcher::Config) -> Self
    where
        K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    {
        self.watches(api, config, |obj| controller_keys::<R::Object, K>(obj))
    }

    /// Reconcile the keys `mapper` derives from every change of a `K`
    pub fn watches<K, F>(mut self, api: Api<K>, config: watcher::Config, mapper: F) -> Self
    where
        K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
        F: Fn(&K) -> Vec<ObjectKey> + Send + Sync + 'static,
    {
        let stream = watcher(api, config)
            .default_backoff()
            .touched_objects()
            .filter_map(move |res| {
                let keys = match res {
                    Ok(obj) => Some(mapper(&obj)),
                    Err(e) => {
                        tracing::warn!(error = %e, "related watch failed");
                        None
                    }
                };
                futures::future::ready(keys)
            })
            .boxed();
        self.triggers.push(stream);
        self
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let name = self.reconciler.name();
        tracing::info!(controller = name, workers = self.workers, "controller starting");

        let (reader, writer) = reflector::store();
        let mut feeders = JoinSet::new();

        let queue = self.queue.clone();
        let primary = reflector::reflector(writer, watcher(self.api, self.config))
            .default_backoff()
            .touched_objects()
            .try_for_each(move |obj| {
                queue.add(ObjectKey::from_object(&obj));
                futures::future::ready(Ok(()))
            });
        feeders.spawn(async move {
            if let Err(e) = primary.await {
                tracing::error!(controller = name, error = %e, "primary watch ended");
            }
        });

        for trigger in self.triggers {
            let queue = self.queue.clone();
            feeders.spawn(trigger.for_each(move |keys| {
                for key in keys {
                    queue.add(key);
                }
                futures::future::ready(())
            }));
        }

        tokio::select! {
            ready = reader.wait_until_ready() => {
                if let Err(e) = ready {
                    anyhow::bail!("{name} cache never synced: {e}");
                }
            }
            _ = cancel.cancelled() => {
                feeders.abort_all();
                return Ok(());
            }
        }
        tracing::info!(controller = name, "cache synced");

        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            workers.spawn(worker(
                self.reconciler.clone(),
                reader.clone(),
                self.queue.clone(),
                self.metrics.clone(),
            ));
        }

        cancel.cancelled().await;
        self.queue.shut_down();
        feeders.abort_all();
        while workers.join_next().await.is_some() {}
        tracing::info!(controller = name, "controller stopped");
        Ok(())
    }
}

async fn worker<R: Reconciler>(
    reconciler: Arc<R>,
    reader: Store<R::Object>,
    queue: WorkQueue<ObjectKey>,
    metrics: Option<ReconcileMetrics>,
) {
    let name = reconciler.name();
    while let Some(key) = queue.get().await {
        if let Some(m) = &metrics {
            m.depth.set(queue.len() as i64);
        }

        let mut obj_ref = ObjectRef::<R::Object>::new(&key.name);
        if let Some(ns) = &key.namespace {
            obj_ref = obj_ref.within(ns);
        }

        let started = Instant::now();
        let result = match reader.get(&obj_ref) {
            Some(obj) => reconciler.reconcile(obj).await,
            None => reconciler.cleanup(&key).await.map(|_| Action::Done),
        };

        let outcome = match result {
            Ok(Action::Done) => {
                queue.forget(&key);
                "success"
            }
            Ok(Action::RequeueAfter(delay)) => {
                queue.forget(&key);
                queue.add_after(key.clone(), delay);
                "requeue"
            }
            Err(e) => {
                tracing::warn!(
                    controller = name,
                    %key,
                    retries = queue.num_requeues(&key),
                    error = %e,
                    "reconcile failed"
                );
                queue.add_rate_limited(key.clone());
                "error"
            }
        };
        if let Some(m) = &metrics {
            m.total.with_label_values(&[name, outcome]).inc();
            m.duration
                .with_label_values(&[name])
                .observe(started.elapsed().as_secs_f64());
        }
        queue.done(&key);
    }
}
