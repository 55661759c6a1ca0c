// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission endpoints for the llmaz kinds.
//!
//! Each `/validate-<kind>` route decodes an `admission.k8s.io/v1` review, runs the matching
//! [`llmaz_api::validation`] check and denies the request with the joined field errors. The
//! `/mutate-<kind>` routes apply the defaulting functions and answer with a JSON patch.

use std::net::SocketAddr;

use axum::{Json, Router, routing::post};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use llmaz_api::validation::{self, FieldErrors};
use llmaz_api::{BackendRuntime, InferenceService, OpenModel, Playground};
use llmaz_runtime::logging::make_request_span;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

type Review = AdmissionReview<DynamicObject>;

pub fn router() -> Router {
    Router::new()
        .route("/mutate-openmodel", post(mutate_model))
        .route("/validate-openmodel", post(validate_model))
        .route("/validate-backendruntime", post(validate_backend_runtime))
        .route("/mutate-playground", post(mutate_playground))
        .route("/validate-playground", post(validate_playground))
        .route("/validate-service", post(validate_service))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
}

/// Serve the admission routes until `cancel` fires. Returns the bound address.
pub async fn spawn_webhook_server(
    addr: &str,
    cancel: CancellationToken,
) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(%local, "webhook server listening");

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::error!("Webhook server error: {e}");
        }
    });
    Ok((local, handle))
}

async fn mutate_model(Json(review): Json<Review>) -> Json<Review> {
    Json(mutate(review, validation::default_model))
}

async fn validate_model(Json(review): Json<Review>) -> Json<Review> {
    Json(validate(review, |op, model: &OpenModel| match op {
        Operation::Create => validation::validate_model_create(model),
        _ => validation::validate_model_update(model),
    }))
}

async fn validate_backend_runtime(Json(review): Json<Review>) -> Json<Review> {
    Json(validate(review, |_, backend: &BackendRuntime| {
        validation::validate_backend_runtime(backend)
    }))
}

async fn mutate_playground(Json(review): Json<Review>) -> Json<Review> {
    Json(mutate(review, validation::default_playground))
}

async fn validate_playground(Json(review): Json<Review>) -> Json<Review> {
    Json(validate(review, |op, playground: &Playground| match op {
        Operation::Create => validation::validate_playground_create(playground),
        _ => validation::validate_playground_update(playground),
    }))
}

async fn validate_service(Json(review): Json<Review>) -> Json<Review> {
    Json(validate(review, |op, service: &InferenceService| match op {
        Operation::Create => validation::validate_service_create(service),
        _ => validation::validate_service_update(service),
    }))
}

fn validate<K, F>(review: Review, check: F) -> Review
where
    K: DeserializeOwned,
    F: FnOnce(&Operation, &K) -> FieldErrors,
{
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "malformed admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let response = AdmissionResponse::from(&req);

    // deletes carry no object
    let Some(object) = req.object.as_ref() else {
        return response.into_review();
    };
    let typed: K = match decode(object) {
        Ok(typed) => typed,
        Err(e) => return response.deny(e.to_string()).into_review(),
    };

    let errs = check(&req.operation, &typed);
    if errs.is_empty() {
        return response.into_review();
    }
    tracing::debug!(
        name = %req.name,
        operation = ?req.operation,
        errors = errs.len(),
        "admission denied"
    );
    response.deny(errs.to_string()).into_review()
}

fn mutate<K, F>(review: Review, default: F) -> Review
where
    K: Serialize + DeserializeOwned,
    F: FnOnce(&mut K),
{
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "malformed admission review");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };
    let response = AdmissionResponse::from(&req);

    let Some(object) = req.object.as_ref() else {
        return response.into_review();
    };
    match defaulting_patch(object, default) {
        Ok(patch) if patch.0.is_empty() => response.into_review(),
        Ok(patch) => match response.with_patch(patch) {
            Ok(patched) => patched.into_review(),
            Err(e) => AdmissionResponse::invalid(e.to_string()).into_review(),
        },
        Err(e) => response.deny(e.to_string()).into_review(),
    }
}

fn decode<K: DeserializeOwned>(object: &DynamicObject) -> Result<K, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(object)?)
}

/// Diff between the typed object before and after defaulting. Both sides go through the typed
/// form so unknown fields in the request never show up as removals.
fn defaulting_patch<K, F>(
    object: &DynamicObject,
    default: F,
) -> Result<json_patch::Patch, serde_json::Error>
where
    K: Serialize + DeserializeOwned,
    F: FnOnce(&mut K),
{
    let mut typed: K = decode(object)?;
    let before = serde_json::to_value(&typed)?;
    default(&mut typed);
    let after = serde_json::to_value(&typed)?;
    Ok(json_patch::diff(&before, &after))
}
