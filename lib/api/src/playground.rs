// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `Playground`: the simple way to serve a model. The controller expands it into an
//! [`InferenceService`](crate::InferenceService) plus an optional HPA.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::backend_runtime::{BackendRuntimeConfig, InferenceMode, ScaleTrigger};
use crate::constants::{DEFAULT_BACKEND, annotations};
use crate::model::{ModelClaim, ModelClaims, ModelRef, ModelRole};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "inference.llmaz.io",
    version = "v1alpha1",
    kind = "Playground",
    namespaced,
    shortname = "pl",
    status = "PlaygroundStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PlaygroundSpec {
    /// Defaults to 1; 0 parks the workload for scale-from-zero
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_claim: Option<ModelClaim>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_claims: Option<ModelClaims>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_runtime_config: Option<BackendRuntimeConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elastic_config: Option<ElasticConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,

    /// Falls back to the recommended config's trigger when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_trigger: Option<ScaleTrigger>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaygroundStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl Playground {
    /// The claimed models with the main model first. A single `modelClaim` becomes one main ref.
    pub fn model_refs(&self) -> Vec<ModelRef> {
        self.claims().map(|c| c.main_first()).unwrap_or_default()
    }

    /// Claims in their multi-model form
    pub fn claims(&self) -> Option<ModelClaims> {
        if let Some(claim) = &self.spec.model_claim {
            return Some(ModelClaims::from(claim));
        }
        self.spec.model_claims.clone()
    }

    pub fn backend_name(&self) -> &str {
        self.spec
            .backend_runtime_config
            .as_ref()
            .and_then(|c| c.backend_name.as_deref())
            .unwrap_or(DEFAULT_BACKEND)
    }

    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    /// A draft model means speculative decoding, anything else is served as `default`
    pub fn detected_mode(&self) -> InferenceMode {
        match &self.spec.model_claims {
            Some(claims)
                if self.spec.model_claim.is_none() && claims.has_role(ModelRole::Draft) =>
            {
                InferenceMode::SpeculativeDecoding
            }
            _ => InferenceMode::Default,
        }
    }

    /// Recommended config to render: an explicit `configName` wins over detection
    pub fn config_name(&self) -> String {
        self.spec
            .backend_runtime_config
            .as_ref()
            .and_then(|c| c.config_name.clone())
            .unwrap_or_else(|| self.detected_mode().to_string())
    }

    /// The runner loads weights itself when `llmaz.io/skip-model-loader: "true"`
    pub fn skip_model_loader(&self) -> bool {
        skip_model_loader(self.metadata.annotations.as_ref())
    }
}

pub fn skip_model_loader(annos: Option<&std::collections::BTreeMap<String, String>>) -> bool {
    annos
        .and_then(|a| a.get(annotations::SKIP_MODEL_LOADER))
        .is_some_and(|v| v == "true")
}
