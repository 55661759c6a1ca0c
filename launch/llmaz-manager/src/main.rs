// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `llmaz-manager` runs the Playground, Service and activator controllers together with the
//! admission webhooks, the metrics endpoint and the health probes.

use std::sync::Arc;

use anyhow::Context;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use clap::Parser;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::runtime::watcher;
use kube::{Api, Client};
use llmaz_api::constants::labels;
use llmaz_api::{InferenceService, LeaderWorkerSet, Playground};
use llmaz_controller::activator::{
    ActivatorMetrics, ActivatorReconciler, PlaygroundScaler, PortManager,
};
use llmaz_controller::reconciler::{Controller, ObjectKey, ReconcileMetrics};
use llmaz_controller::{LeaderElector, PlaygroundReconciler, ServiceReconciler, webhook};
use llmaz_runtime::config::HealthStatus;
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::name_prefix;
use llmaz_runtime::system_status_server::spawn_system_status_server;
use llmaz_runtime::{CancellationToken, Runtime, SystemHealth, Worker, logging};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

mod config;

use config::{Flags, ManagerConfig, split_bind_address};

fn main() -> anyhow::Result<()> {
    logging::init();
    let flags = Flags::parse();
    let config = ManagerConfig::from_settings(&flags)?;
    let worker = Worker::from_settings()?;
    worker.execute(move |runtime| app(runtime, config))
}

async fn app(runtime: Runtime, config: ManagerConfig) -> anyhow::Result<()> {
    tracing::info!(?config, "starting llmaz-manager");
    let cancel = runtime.child_token();
    let registry = MetricsRegistry::new(name_prefix::MANAGER);

    let health = SystemHealth::new(
        HealthStatus::NotReady,
        "/healthz".to_string(),
        "/readyz".to_string(),
    );
    health.register_check("webhook");
    let (host, port) = split_bind_address(&config.health_probe_bind_address)?;
    spawn_system_status_server(&host, port, cancel.clone(), health.clone(), registry.clone())
        .await
        .context("failed to start health probe server")?;
    spawn_metrics_server(&config.metrics_bind_address, registry.clone(), cancel.clone()).await?;

    let (host, port) = split_bind_address(&config.webhook_bind_address)?;
    webhook::spawn_webhook_server(&format!("{host}:{port}"), cancel.clone())
        .await
        .context("failed to start webhook server")?;
    health.set_check_status("webhook", HealthStatus::Ready);
    health.set_health_status(HealthStatus::Ready);

    let client = Client::try_default()
        .await
        .context("failed to build kubernetes client")?;

    if config.leader_elect {
        let identity = std::env::var("HOSTNAME")
            .unwrap_or_else(|_| format!("llmaz-manager-{}", uuid::Uuid::new_v4()));
        let elector = LeaderElector::new(client.clone(), &config.namespace, identity);
        if !elector.acquire(&cancel).await {
            return Ok(());
        }
        elector.spawn_renewal(cancel.clone());
    }

    run_controllers(client, &config, &registry, cancel).await
}

async fn run_controllers(
    client: Client,
    config: &ManagerConfig,
    registry: &MetricsRegistry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let metrics = ReconcileMetrics::new(registry)?;
    let managed = format!("{}={}", labels::MANAGED, labels::MANAGED_VALUE);
    let mut controllers = JoinSet::new();

    let playgrounds = Controller::new(
        PlaygroundReconciler::new(client.clone()),
        Api::<Playground>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(
        Api::<InferenceService>::all(client.clone()),
        watcher::Config::default().labels(&managed),
    )
    .metrics(metrics.clone());
    controllers.spawn(playgrounds.run(cancel.clone()));

    let services = Controller::new(
        ServiceReconciler::new(client.clone()),
        Api::<InferenceService>::all(client.clone()),
        watcher::Config::default(),
    )
    .owns(
        Api::<LeaderWorkerSet>::all(client.clone()),
        watcher::Config::default().labels(&managed),
    )
    .metrics(metrics.clone());
    controllers.spawn(services.run(cancel.clone()));

    if config.enable_serverless {
        let pod_ip = config
            .pod_ip
            .clone()
            .context("--enable-serverless needs --pod-ip")?;
        let scaler = Arc::new(PlaygroundScaler::new(client.clone()));
        let ports = PortManager::new(scaler, cancel.clone())
            .with_metrics(ActivatorMetrics::new(registry)?);
        let activator = Controller::new(
            ActivatorReconciler::new(client.clone(), Arc::new(ports), pod_ip),
            Api::<Service>::all(client.clone()),
            watcher::Config::default(),
        )
        // an Endpoints object shares its Service's name
        .watches(
            Api::<Endpoints>::all(client.clone()),
            watcher::Config::default(),
            |endpoints: &Endpoints| vec![ObjectKey::from_object(endpoints)],
        )
        .metrics(metrics);
        controllers.spawn(activator.run(cancel.clone()));
    }

    while let Some(joined) = controllers.join_next().await {
        let result = joined
            .map_err(anyhow::Error::from)
            .and_then(|result| result);
        if let Err(e) = result {
            tracing::error!("controller failed: {e:#}");
            cancel.cancel();
            return Err(e);
        }
    }
    Ok(())
}

async fn spawn_metrics_server(
    addr: &str,
    registry: MetricsRegistry,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (host, port) = split_bind_address(addr)?;
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move {
                match registry.prometheus_expfmt() {
                    Ok(body) => (StatusCode::OK, body).into_response(),
                    Err(e) => {
                        tracing::error!("Failed to encode metrics: {e}");
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        }),
    );
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind metrics address {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "metrics server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::error!("Metrics server error: {e}");
        }
    });
    Ok(())
}
