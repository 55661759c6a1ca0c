// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use llmaz_router::{Aggregator, Dispatcher, Store};
use llmaz_runtime::logging::make_request_span;
use llmaz_runtime::metrics::MetricsRegistry;
use llmaz_runtime::metrics::prometheus_names::router as metric_names;
use prometheus::IntCounterVec;
use serde_json::json;
use tower_http::trace::TraceLayer;

/// Label for route requests naming a model the store has never seen, so arbitrary request
/// paths do not mint new series.
const UNKNOWN_MODEL: &str = "unknown";

pub struct AppState {
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    registry: MetricsRegistry,
    decisions: IntCounterVec,
}

impl AppState {
    pub fn new(
        dispatcher: Dispatcher,
        aggregator: Aggregator,
        registry: MetricsRegistry,
    ) -> anyhow::Result<Self> {
        let decisions = registry.create_int_counter_vec(
            metric_names::ROUTE_DECISIONS_TOTAL,
            "Route requests by model and outcome",
            &["model", "outcome"],
        )?;
        Ok(Self {
            dispatcher,
            aggregator,
            registry,
            decisions,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/route/{model}", get(route_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
}

async fn route_handler(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.schedule(&model) {
        Some(replica) => {
            state.decisions.with_label_values(&[&model, "routed"]).inc();
            (StatusCode::OK, Json(json!({ "replica": replica })))
        }
        None => {
            let known = state.aggregator.store().data_store(&model).is_ok();
            let label = if known { model.as_str() } else { UNKNOWN_MODEL };
            state.decisions.with_label_values(&[label, "unavailable"]).inc();
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": format!("no replica available for model {model}") })),
            )
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "replicas": state.aggregator.len(),
        "plugins": state.dispatcher.plugin_names(),
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.prometheus_expfmt() {
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
