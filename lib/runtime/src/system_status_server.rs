// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HTTP server exposing liveness, readiness and Prometheus metrics of the process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::logging::make_request_span;
use crate::metrics::MetricsRegistry;
use crate::metrics::prometheus_names::process;
use crate::system_health::SystemHealth;

/// System status server information containing socket address and handle
#[derive(Debug, Clone)]
pub struct SystemStatusServerInfo {
    pub socket_addr: SocketAddr,
    pub handle: Option<Arc<JoinHandle<()>>>,
}

impl SystemStatusServerInfo {
    pub fn new(socket_addr: SocketAddr, handle: Option<JoinHandle<()>>) -> Self {
        Self {
            socket_addr,
            handle: handle.map(Arc::new),
        }
    }

    pub fn address(&self) -> String {
        self.socket_addr.to_string()
    }

    pub fn port(&self) -> u16 {
        self.socket_addr.port()
    }
}

struct SystemStatusState {
    health: SystemHealth,
    metrics: MetricsRegistry,
    uptime: prometheus::Gauge,
}

/// Start the status server. Binding port 0 picks a free port; the chosen address is returned.
pub async fn spawn_system_status_server(
    host: &str,
    port: u16,
    cancel_token: CancellationToken,
    health: SystemHealth,
    metrics: MetricsRegistry,
) -> anyhow::Result<SystemStatusServerInfo> {
    let uptime = metrics.create_gauge(
        process::UPTIME_SECONDS,
        "Seconds since the process status server started",
    )?;
    let health_path = health.health_path().to_string();
    let ready_path = health.ready_path().to_string();
    let state = Arc::new(SystemStatusState {
        health,
        metrics,
        uptime,
    });

    let app = Router::new()
        .route(&health_path, get(health_handler))
        .route(&ready_path, get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(|| async { (StatusCode::NOT_FOUND, "Route not found") })
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span));

    let listener = TcpListener::bind((host, port)).await?;
    let socket_addr = listener.local_addr()?;
    tracing::debug!(%socket_addr, health_path, ready_path, "system status server listening");

    let observer = cancel_token.child_token();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(observer.cancelled_owned())
            .await
        {
            tracing::error!("System status server error: {e}");
        }
    });

    Ok(SystemStatusServerInfo::new(socket_addr, Some(handle)))
}

async fn health_handler(State(state): State<Arc<SystemStatusState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "uptime_seconds": state.health.uptime().as_secs_f64(),
    }))
}

async fn ready_handler(State(state): State<Arc<SystemStatusState>>) -> impl IntoResponse {
    let report = state.health.report();
    let code = if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, axum::Json(report))
}

async fn metrics_handler(State(state): State<Arc<SystemStatusState>>) -> impl IntoResponse {
    state.uptime.set(state.health.uptime().as_secs_f64());
    match state.metrics.prometheus_expfmt() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HealthStatus;

    async fn start(health: SystemHealth) -> (SystemStatusServerInfo, CancellationToken) {
        let token = CancellationToken::new();
        let info = spawn_system_status_server(
            "127.0.0.1",
            0,
            token.clone(),
            health,
            MetricsRegistry::new("test"),
        )
        .await
        .unwrap();
        (info, token)
    }

    #[tokio::test]
    async fn test_readiness_follows_health_state() {
        let health = SystemHealth::new(
            HealthStatus::NotReady,
            "/healthz".to_string(),
            "/readyz".to_string(),
        );
        let (info, token) = start(health.clone()).await;
        let base = format!("http://{}", info.address());
        let client = reqwest::Client::new();

        let live = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(live.status(), 200);

        let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(ready.status(), 503);

        health.set_health_status(HealthStatus::Ready);
        let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(ready.status(), 200);

        let missing = client.get(format!("{base}/nope")).send().await.unwrap();
        assert_eq!(missing.status(), 404);

        token.cancel();
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_uptime() {
        let health = SystemHealth::new(
            HealthStatus::Ready,
            "/healthz".to_string(),
            "/readyz".to_string(),
        );
        let (info, token) = start(health).await;
        let body = reqwest::get(format!("http://{}/metrics", info.address()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("test_uptime_seconds"));
        token.cancel();
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let health = SystemHealth::new(
            HealthStatus::Ready,
            "/healthz".to_string(),
            "/readyz".to_string(),
        );
        let (info, token) = start(health).await;
        token.cancel();
        let handle = info.handle.clone().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
