// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes resource types of the llmaz control plane.
//!
//! * [`OpenModel`] (`llmaz.io/v1alpha1`) describes where model weights live.
//! * [`BackendRuntime`], [`Playground`] and [`InferenceService`] (`inference.llmaz.io/v1alpha1`)
//!   describe how a model is served.
//! * [`LeaderWorkerSet`] is the external multi-host pod group the controller emits.
//!
//! Admission rules for these kinds live in [`validation`].

pub mod backend_runtime;
pub mod condition;
pub mod constants;
pub mod lws;
pub mod model;
pub mod playground;
pub mod quantity;
pub mod service;
pub mod uri;
pub mod validation;

pub use backend_runtime::{
    BackendRuntime, BackendRuntimeConfig, BackendRuntimeSpec, InferenceMode, RecommendedConfig,
    ResourceRequirements, ScaleTrigger,
};
pub use lws::{LeaderWorkerSet, LeaderWorkerSetSpec, LeaderWorkerTemplate, RolloutStrategy};
pub use model::{
    ModelClaim, ModelClaims, ModelHub, ModelRef, ModelRole, ModelSource, ModelSpec, OpenModel,
};
pub use playground::{ElasticConfig, Playground, PlaygroundSpec, PlaygroundStatus};
pub use service::{InferenceService, ServiceSpec, ServiceStatus};
pub use uri::{ModelUri, Protocol};
