// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use k8s_openapi::api::core::v1::{EnvVar, Lifecycle, Probe};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use llmaz_api::model::SourceError;
use llmaz_api::{
    BackendRuntime, OpenModel, Playground, RecommendedConfig, ResourceRequirements, ScaleTrigger,
};

use super::render::{RenderError, TemplateValues, render_flags};
use crate::model_source::provider_for;

pub const MODEL_PATH_KEY: &str = "ModelPath";
pub const MODEL_NAME_KEY: &str = "ModelName";
pub const DRAFT_MODEL_PATH_KEY: &str = "DraftModelPath";

#[derive(Debug, thiserror::Error)]
pub enum ParserError {
    #[error("backendRuntime {backend} has no recommended config named {config}")]
    ConfigNotFound { backend: String, config: String },

    #[error("no model to serve")]
    NoModels,

    #[error("invalid source of model {model}: {source}")]
    Source {
        model: String,
        #[source]
        source: SourceError,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Reads a [`BackendRuntime`] in the context of one Playground and its models.
#[derive(Debug)]
pub struct BackendRuntimeParser<'a> {
    backend: &'a BackendRuntime,
    /// Main model first
    models: &'a [OpenModel],
    config_name: String,
    skip_model_loader: bool,
}

impl<'a> BackendRuntimeParser<'a> {
    pub fn new(
        backend: &'a BackendRuntime,
        models: &'a [OpenModel],
        playground: &Playground,
    ) -> Self {
        Self {
            backend,
            models,
            config_name: playground.config_name(),
            skip_model_loader: playground.skip_model_loader(),
        }
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }

    pub fn recommended_config(&self) -> Option<&'a RecommendedConfig> {
        self.backend.recommended_config(&self.config_name)
    }

    /// The selected recommended config's args with the model placeholders filled in
    pub fn args(&self) -> Result<Vec<String>, ParserError> {
        let values = self.template_values()?;
        let config = self
            .recommended_config()
            .ok_or_else(|| ParserError::ConfigNotFound {
                backend: self.backend.metadata.name.clone().unwrap_or_default(),
                config: self.config_name.clone(),
            })?;
        Ok(render_flags(&config.args, &values)?)
    }

    fn template_values(&self) -> Result<TemplateValues, ParserError> {
        let main = self.models.first().ok_or(ParserError::NoModels)?;
        let provider = source_provider(main)?;

        let mut values = TemplateValues::new();
        values.insert(
            MODEL_PATH_KEY.to_string(),
            provider.model_path(self.skip_model_loader),
        );
        values.insert(MODEL_NAME_KEY.to_string(), provider.model_name());
        if let Some(draft) = self.models.get(1) {
            values.insert(
                DRAFT_MODEL_PATH_KEY.to_string(),
                source_provider(draft)?.model_path(self.skip_model_loader),
            );
        }
        Ok(values)
    }

    pub fn image(&self, version: &str) -> String {
        format!("{}:{version}", self.backend.spec.image)
    }

    pub fn version(&self) -> &'a str {
        &self.backend.spec.version
    }

    pub fn command(&self) -> &'a [String] {
        &self.backend.spec.commands
    }

    pub fn envs(&self) -> &'a [EnvVar] {
        &self.backend.spec.envs
    }

    pub fn lifecycle(&self) -> Option<&'a Lifecycle> {
        self.backend.spec.lifecycle.as_ref()
    }

    pub fn liveness_probe(&self) -> Option<&'a Probe> {
        self.backend.spec.liveness_probe.as_ref()
    }

    pub fn readiness_probe(&self) -> Option<&'a Probe> {
        self.backend.spec.readiness_probe.as_ref()
    }

    pub fn startup_probe(&self) -> Option<&'a Probe> {
        self.backend.spec.startup_probe.as_ref()
    }

    pub fn resources(&self) -> Option<&'a ResourceRequirements> {
        self.recommended_config()?.resources.as_ref()
    }

    pub fn shared_memory_size(&self) -> Option<&'a Quantity> {
        self.recommended_config()?.shared_memory_size.as_ref()
    }

    pub fn scale_trigger(&self) -> Option<&'a ScaleTrigger> {
        self.recommended_config()?.scale_trigger.as_ref()
    }
}

fn source_provider(
    model: &OpenModel,
) -> Result<Box<dyn crate::model_source::ModelSourceProvider>, ParserError> {
    provider_for(model).map_err(|source| ParserError::Source {
        model: model.metadata.name.clone().unwrap_or_default(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use llmaz_api::model::{ModelSourceSpec, ModelSpec};
    use llmaz_api::{
        BackendRuntimeConfig, BackendRuntimeSpec, ModelClaim, ModelClaims, ModelHub, ModelRef,
        ModelRole, PlaygroundSpec,
    };

    pub(crate) fn hub_model(name: &str, model_id: &str) -> OpenModel {
        OpenModel::new(
            name,
            ModelSpec {
                family_name: name.split('-').next().unwrap_or(name).to_string(),
                source: ModelSourceSpec {
                    model_hub: Some(ModelHub {
                        model_id: model_id.to_string(),
                        ..Default::default()
                    }),
                    uri: None,
                },
                ..Default::default()
            },
        )
    }

    pub(crate) fn vllm() -> BackendRuntime {
        BackendRuntime::new(
            "vllm",
            BackendRuntimeSpec {
                commands: vec![
                    "python3".into(),
                    "-m".into(),
                    "vllm.entrypoints.openai.api_server".into(),
                ],
                image: "vllm/vllm-openai".to_string(),
                version: "v0.7.3".to_string(),
                recommended_configs: vec![
                    RecommendedConfig {
                        name: "default".to_string(),
                        args: vec![
                            "--model".into(),
                            "{{ .ModelPath }}".into(),
                            "--served-model-name".into(),
                            "{{ .ModelName }}".into(),
                            "--host".into(),
                            "0.0.0.0".into(),
                            "--port".into(),
                            "8080".into(),
                        ],
                        shared_memory_size: Some(Quantity("2Gi".to_string())),
                        ..Default::default()
                    },
                    RecommendedConfig {
                        name: "speculative-decoding".to_string(),
                        args: vec![
                            "-m".into(),
                            "{{ .ModelPath }}".into(),
                            "-md".into(),
                            "{{ .DraftModelPath }}".into(),
                        ],
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
        )
    }

    pub(crate) fn single_model_playground(model: &str) -> Playground {
        Playground::new(
            "llama3",
            PlaygroundSpec {
                model_claim: Some(ModelClaim {
                    model_name: model.to_string(),
                    inference_flavors: None,
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_default_args() {
        let backend = vllm();
        let models = [hub_model("llama3-8b", "meta-llama/Meta-Llama-3-8B")];
        let playground = single_model_playground("llama3-8b");
        let parser = BackendRuntimeParser::new(&backend, &models, &playground);

        assert_eq!(parser.config_name(), "default");
        assert_eq!(
            parser.args().unwrap(),
            [
                "--model",
                "/workspace/models/models--meta-llama--Meta-Llama-3-8B",
                "--served-model-name",
                "llama3-8b",
                "--host",
                "0.0.0.0",
                "--port",
                "8080",
            ]
        );
        assert_eq!(parser.image(parser.version()), "vllm/vllm-openai:v0.7.3");
        assert_eq!(parser.command()[0], "python3");
        assert_eq!(parser.shared_memory_size(), Some(&Quantity("2Gi".to_string())));
        assert!(parser.resources().is_none());
    }

    #[test]
    fn test_speculative_decoding_args() {
        let backend = vllm();
        let models = [
            hub_model("llama3-405b", "meta-llama/Meta-Llama-3.1-405B"),
            hub_model("llama3-8b", "meta-llama/Meta-Llama-3-8B"),
        ];
        let playground = Playground::new(
            "spec-dec",
            PlaygroundSpec {
                model_claims: Some(ModelClaims {
                    models: vec![
                        ModelRef::new("llama3-405b", ModelRole::Main),
                        ModelRef::new("llama3-8b", ModelRole::Draft),
                    ],
                    inference_flavors: None,
                }),
                ..Default::default()
            },
        );
        let parser = BackendRuntimeParser::new(&backend, &models, &playground);

        assert_eq!(parser.config_name(), "speculative-decoding");
        assert_eq!(
            parser.args().unwrap(),
            [
                "-m",
                "/workspace/models/models--meta-llama--Meta-Llama-3.1-405B",
                "-md",
                "/workspace/models/models--meta-llama--Meta-Llama-3-8B",
            ]
        );
    }

    #[test]
    fn test_unknown_config() {
        let backend = vllm();
        let models = [hub_model("llama3-8b", "meta-llama/Meta-Llama-3-8B")];
        let mut playground = single_model_playground("llama3-8b");
        playground.spec.backend_runtime_config = Some(BackendRuntimeConfig {
            config_name: Some("low-latency".to_string()),
            ..Default::default()
        });
        let parser = BackendRuntimeParser::new(&backend, &models, &playground);
        assert_matches!(
            parser.args(),
            Err(ParserError::ConfigNotFound { backend, config })
                if backend == "vllm" && config == "low-latency"
        );
        assert!(parser.shared_memory_size().is_none());
    }

    #[test]
    fn test_skip_model_loader_uses_model_id() {
        let backend = vllm();
        let models = [hub_model("llama3-8b", "meta-llama/Meta-Llama-3-8B")];
        let mut playground = single_model_playground("llama3-8b");
        playground.metadata.annotations = Some(
            [(
                llmaz_api::constants::annotations::SKIP_MODEL_LOADER.to_string(),
                "true".to_string(),
            )]
            .into(),
        );
        let parser = BackendRuntimeParser::new(&backend, &models, &playground);
        assert_eq!(parser.args().unwrap()[1], "meta-llama/Meta-Llama-3-8B");
    }

    #[test]
    fn test_no_models() {
        let backend = vllm();
        let playground = single_model_playground("llama3-8b");
        let parser = BackendRuntimeParser::new(&backend, &[], &playground);
        assert_matches!(parser.args(), Err(ParserError::NoModels));
    }
}
