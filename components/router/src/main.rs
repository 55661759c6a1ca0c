// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `router` scrapes every model-serving pod and answers `GET /v1/route/{model}` with the
//! replica that should take the next request.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use llmaz_router::{
    Aggregator, AggregatorMetrics, Dispatcher, MemoryStore, MetricsFetcher, ReplicaWatcher,
};
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::name_prefix;
use llmaz_runtime::{Runtime, Worker, logging};
use tokio::net::TcpListener;

mod api;
mod config;

use config::{Flags, RouterConfig};

fn main() -> anyhow::Result<()> {
    logging::init();
    let flags = Flags::parse();
    let config = RouterConfig::from_settings(&flags)?;
    let worker = Worker::from_settings()?;
    worker.execute(move |runtime| app(runtime, config))
}

async fn app(runtime: Runtime, config: RouterConfig) -> anyhow::Result<()> {
    tracing::info!(?config, "starting router");
    let cancel = runtime.child_token();
    let registry = MetricsRegistry::new(name_prefix::ROUTER);

    let store = Arc::new(MemoryStore::new());
    let fetcher = MetricsFetcher::new(config.scrape_timeout())?;
    let aggregator = Aggregator::new(
        config.aggregator()?,
        store.clone(),
        Arc::new(fetcher),
        Some(AggregatorMetrics::new(&registry)?),
    );
    // fatal on a duplicate plugin name
    let dispatcher = Dispatcher::with_in_tree_plugins(store)?;

    let client = kube::Client::try_default()
        .await
        .context("failed to build kubernetes client")?;
    let watcher = ReplicaWatcher::new(Arc::new(aggregator.clone()));
    let watch = tokio::spawn(watcher.run(client, config.namespace.clone(), cancel.clone()));
    let scrape = tokio::spawn(aggregator.clone().run(cancel.clone()));

    let state = Arc::new(api::AppState::new(dispatcher, aggregator, registry)?);
    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;
    tracing::info!(addr = %listener.local_addr()?, "router listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    watch.await??;
    scrape.await?;
    Ok(())
}
