// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The `OpenModel` resource and the claims workloads use to reference models.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::constants::HUGGING_FACE;
use crate::uri::{ModelUri, UriError};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "llmaz.io",
    version = "v1alpha1",
    kind = "OpenModel",
    shortname = "om",
    status = "ModelStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    /// Model family, e.g. `llama3`; copied into the family-name label
    pub family_name: String,

    pub source: ModelSourceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_config: Option<InferenceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owned_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Time>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Wire form of the model source: exactly one of the two fields is expected to be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hub: Option<ModelHub>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelHub {
    /// `Huggingface` (default) or `ModelScope`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "modelID", default)]
    pub model_id: String,

    /// A single file of the repository, e.g. one GGUF quantization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_patterns: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_patterns: Option<Vec<String>>,
}

impl ModelHub {
    pub fn hub_name(&self) -> &str {
        self.name.as_deref().unwrap_or(HUGGING_FACE)
    }
}

/// Where the model weights come from
#[derive(Clone, Debug, PartialEq)]
pub enum ModelSource {
    Hub(ModelHub),
    Uri(ModelUri),
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("model source can't be all null")]
    Empty,

    #[error(transparent)]
    Uri(#[from] UriError),
}

impl ModelSourceSpec {
    /// Decode the wire form. A model hub takes precedence over a URI.
    pub fn resolve(&self) -> Result<ModelSource, SourceError> {
        if let Some(hub) = &self.model_hub {
            return Ok(ModelSource::Hub(hub.clone()));
        }
        match &self.uri {
            Some(uri) => Ok(ModelSource::Uri(uri.parse()?)),
            None => Err(SourceError::Empty),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flavors: Vec<Flavor>,
}

/// A hardware profile the model can be served on
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flavor {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
}

impl OpenModel {
    pub fn source(&self) -> Result<ModelSource, SourceError> {
        self.spec.source.resolve()
    }

    pub fn flavors(&self) -> &[Flavor] {
        self.spec
            .inference_config
            .as_ref()
            .map(|c| c.flavors.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    #[default]
    Main,
    Draft,
    Lora,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelRole::Main => "main",
            ModelRole::Draft => "draft",
            ModelRole::Lora => "lora",
        };
        f.write_str(s)
    }
}

/// Reference to a single model
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelClaim {
    #[serde(default)]
    pub model_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_flavors: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ModelRole>,
}

impl ModelRef {
    pub fn new(name: impl Into<String>, role: ModelRole) -> Self {
        Self {
            name: name.into(),
            role: Some(role),
        }
    }

    /// Unset roles count as `main`
    pub fn role(&self) -> ModelRole {
        self.role.unwrap_or_default()
    }
}

/// References to several models, e.g. a main and a draft model
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelClaims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<ModelRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_flavors: Option<Vec<String>>,
}

impl ModelClaims {
    pub fn main_model(&self) -> Option<&ModelRef> {
        self.models.iter().find(|m| m.role() == ModelRole::Main)
    }

    pub fn count_role(&self, role: ModelRole) -> usize {
        self.models.iter().filter(|m| m.role() == role).count()
    }

    pub fn has_role(&self, role: ModelRole) -> bool {
        self.count_role(role) > 0
    }

    /// Copy of the refs with the main model moved to index 0
    pub fn main_first(&self) -> Vec<ModelRef> {
        let mut models = self.models.clone();
        if let Some(pos) = models.iter().position(|m| m.role() == ModelRole::Main) {
            let main = models.remove(pos);
            models.insert(0, main);
        }
        models
    }
}

impl From<&ModelClaim> for ModelClaims {
    fn from(claim: &ModelClaim) -> Self {
        ModelClaims {
            models: vec![ModelRef::new(claim.model_name.clone(), ModelRole::Main)],
            inference_flavors: claim.inference_flavors.clone(),
        }
    }
}
