// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `BackendRuntime`: an inference engine (vLLM, SGLang, llama.cpp, ...) and the argument
//! templates recommended for each serving mode.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::autoscaling::v2::{HorizontalPodAutoscalerBehavior, MetricSpec};
use k8s_openapi::api::core::v1::{EnvVar, Lifecycle, Probe};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "inference.llmaz.io",
    version = "v1alpha1",
    kind = "BackendRuntime",
    status = "BackendRuntimeStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct BackendRuntimeSpec {
    /// Entrypoint of the runner container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_host_commands: Option<MultiHostCommands>,

    pub image: String,

    /// Image tag, overridable per Playground
    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_probe: Option<Probe>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_configs: Vec<RecommendedConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRuntimeStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultiHostCommands {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub leader: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker: Vec<String>,
}

/// Argument template and sizing for one serving mode
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedConfig {
    pub name: String,

    /// May contain `{{ .ModelPath }}`, `{{ .ModelName }}` and `{{ .DraftModelPath }}`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory_size: Option<Quantity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_trigger: Option<ScaleTrigger>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa: Option<HpaTrigger>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HpaTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Vec<MetricSpec>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

/// Per-Playground overrides of the backend runtime
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRuntimeConfig {
    /// Name of the BackendRuntime object, `vllm` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub envs: Vec<EnvVar>,

    /// Recommended config to render; detected from the model roles when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,

    /// Appended after the rendered recommended args
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_memory_size: Option<Quantity>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InferenceMode {
    #[default]
    Default,
    SpeculativeDecoding,
    ModelParallelism,
}

impl InferenceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceMode::Default => "default",
            InferenceMode::SpeculativeDecoding => "speculative-decoding",
            InferenceMode::ModelParallelism => "model-parallelism",
        }
    }
}

impl fmt::Display for InferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown inference mode {0}")]
pub struct UnknownMode(String);

impl FromStr for InferenceMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(InferenceMode::Default),
            "speculative-decoding" => Ok(InferenceMode::SpeculativeDecoding),
            "model-parallelism" => Ok(InferenceMode::ModelParallelism),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

impl BackendRuntime {
    pub fn recommended_config(&self, name: &str) -> Option<&RecommendedConfig> {
        self.spec.recommended_configs.iter().find(|c| c.name == name)
    }
}
