// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire-visible names shared between the controller, the activator and the router.

/// Labels
pub mod labels {
    pub const MODEL_NAME: &str = "llmaz.io/model-name";
    pub const MODEL_FAMILY_NAME: &str = "llmaz.io/model-family-name";

    /// Set on every object the controller emits
    pub const MANAGED: &str = "llmaz.io/managed";
    pub const MANAGED_VALUE: &str = "true";

    pub const LWS_NAME: &str = "leaderworkerset.sigs.k8s.io/name";
    pub const LWS_WORKER_INDEX: &str = "leaderworkerset.sigs.k8s.io/worker-index";
}

/// Annotations
pub mod annotations {
    pub const MODEL_PREHEAT: &str = "llmaz.io/model-preheat";
    pub const SKIP_MODEL_LOADER: &str = "llmaz.io/skip-model-loader";
    pub const INFERENCE_SERVICE_FLAVORS: &str = "llmaz.io/inference-service-flavors";

    /// Scale-from-zero marker; the value is the workload name
    pub const MODEL_ACTIVATOR: &str = "activator.llmaz.io/playground";
    /// JSON snapshot of the Service selector while the activator owns the endpoints
    pub const CACHED_MODEL_ACTIVATOR: &str = "cached.activator.llmaz.io";
}

/// Model hubs
pub const HUGGING_FACE: &str = "Huggingface";
pub const MODEL_SCOPE: &str = "ModelScope";

pub const DEFAULT_OWNED_BY: &str = "llmaz";
pub const DEFAULT_BACKEND: &str = "vllm";

/// Container and volume names
pub const MODEL_RUNNER_CONTAINER_NAME: &str = "model-runner";
pub const MODEL_LOADER_CONTAINER_NAME: &str = "model-loader";
pub const MODEL_VOLUME_NAME: &str = "model-volume";

pub const CONTAINER_MODEL_PATH: &str = "/workspace/models/";
pub const HOST_MODEL_BASE_PATH: &str = "/mnt/models/";
pub const HOST_CLUSTER_MODEL_PATH: &str = "/mnt/models/cluster/";

pub const DEFAULT_BACKEND_PORT: i32 = 8080;

/// Condition types shared by Playground and Service
pub mod conditions {
    pub const PROGRESSING: &str = "Progressing";
    pub const AVAILABLE: &str = "Available";
}
