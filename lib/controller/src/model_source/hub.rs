// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use k8s_openapi::api::core::v1::PodTemplateSpec;
use llmaz_api::ModelHub;
use llmaz_api::constants::CONTAINER_MODEL_PATH;

use super::{
    HUGGING_FACE_HUB_TOKEN, HUGGING_FACE_TOKEN_KEY, MODEL_SOURCE_MODELHUB, MODELHUB_SECRET_NAME,
    ModelSourceProvider, add_runner_envs_if_absent, env, inject_model_volume, new_loader_container,
    push_init_container, secret_env,
};

/// Weights pulled from a model hub (Huggingface, ModelScope)
#[derive(Debug, Clone)]
pub struct ModelHubProvider {
    model_name: String,
    hub: ModelHub,
}

impl ModelHubProvider {
    pub fn new(model_name: impl Into<String>, hub: ModelHub) -> Self {
        Self {
            model_name: model_name.into(),
            hub,
        }
    }

    fn token_envs() -> Vec<k8s_openapi::api::core::v1::EnvVar> {
        // the hub clients accept either name
        vec![
            secret_env(HUGGING_FACE_HUB_TOKEN, MODELHUB_SECRET_NAME, HUGGING_FACE_TOKEN_KEY),
            secret_env(HUGGING_FACE_TOKEN_KEY, MODELHUB_SECRET_NAME, HUGGING_FACE_TOKEN_KEY),
        ]
    }
}

impl ModelSourceProvider for ModelHubProvider {
    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    fn model_path(&self, skip_model_loader: bool) -> String {
        if skip_model_loader {
            return self.hub.model_id.clone();
        }
        match &self.hub.filename {
            Some(filename) => format!("{CONTAINER_MODEL_PATH}{filename}"),
            None => format!(
                "{CONTAINER_MODEL_PATH}models--{}",
                self.hub.model_id.replace('/', "--")
            ),
        }
    }

    fn inject_model_loader(&self, template: &mut PodTemplateSpec, index: usize) {
        let mut loader = new_loader_container(template, index);
        let envs = loader.env.get_or_insert_with(Vec::new);
        envs.push(env("MODEL_SOURCE_TYPE", MODEL_SOURCE_MODELHUB));
        envs.push(env("MODEL_ID", self.hub.model_id.as_str()));
        envs.push(env("MODEL_HUB_NAME", self.hub.hub_name()));
        if let Some(filename) = &self.hub.filename {
            envs.push(env("MODEL_FILENAME", filename.as_str()));
        }
        if let Some(revision) = &self.hub.revision {
            envs.push(env("REVISION", revision.as_str()));
        }
        if let Some(patterns) = &self.hub.allow_patterns {
            envs.push(env("MODEL_ALLOW_PATTERNS", patterns.join(",")));
        }
        if let Some(patterns) = &self.hub.ignore_patterns {
            envs.push(env("MODEL_IGNORE_PATTERNS", patterns.join(",")));
        }
        envs.extend(Self::token_envs());

        push_init_container(template, loader);
        if index == 0 {
            inject_model_volume(template);
        }
    }

    fn inject_model_env_vars(&self, template: &mut PodTemplateSpec) {
        add_runner_envs_if_absent(template, Self::token_envs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_source::tests::{
        env_names, init_containers, model, runner_template, volumes,
    };
    use crate::model_source::{loader_image, provider_for, runner_mut};
    use llmaz_api::model::ModelSourceSpec;
    use rstest::rstest;

    fn hub(model_id: &str, filename: Option<&str>) -> ModelHub {
        ModelHub {
            model_id: model_id.to_string(),
            filename: filename.map(str::to_string),
            ..Default::default()
        }
    }

    #[rstest]
    #[case(
        "Qwen/Qwen2-0.5B-Instruct",
        None,
        false,
        "/workspace/models/models--Qwen--Qwen2-0.5B-Instruct"
    )]
    #[case("a/b", None, false, "/workspace/models/models--a--b")]
    #[case("Qwen/Qwen2-GGUF", Some("x.gguf"), false, "/workspace/models/x.gguf")]
    #[case("Qwen/Qwen2-GGUF", Some("x.gguf"), true, "Qwen/Qwen2-GGUF")]
    fn test_model_path(
        #[case] id: &str,
        #[case] filename: Option<&str>,
        #[case] skip: bool,
        #[case] expected: &str,
    ) {
        let provider = ModelHubProvider::new("m", hub(id, filename));
        assert_eq!(provider.model_path(skip), expected);
    }

    #[test]
    fn test_inject_model_loader() {
        let source = ModelSourceSpec {
            model_hub: Some(ModelHub {
                model_id: "Qwen/Qwen2-0.5B-Instruct".to_string(),
                revision: Some("main".to_string()),
                allow_patterns: Some(vec!["*.json".to_string(), "*.safetensors".to_string()]),
                ..Default::default()
            }),
            uri: None,
        };
        let provider = provider_for(&model("qwen2-0--5b", source)).unwrap();
        assert_eq!(provider.model_name(), "qwen2-0--5b");

        let mut template = runner_template(vec![]);
        provider.inject_model_loader(&mut template, 0);
        provider.inject_model_loader(&mut template, 1);

        let init = init_containers(&template);
        assert_eq!(init.len(), 2);
        assert_eq!(init[0].name, "model-loader");
        assert_eq!(init[1].name, "model-loader-1");
        assert_eq!(init[0].image.as_deref(), Some(loader_image().as_str()));
        assert_eq!(
            env_names(&init[0]),
            [
                "MODEL_SOURCE_TYPE",
                "MODEL_ID",
                "MODEL_HUB_NAME",
                "REVISION",
                "MODEL_ALLOW_PATTERNS",
                "HUGGING_FACE_HUB_TOKEN",
                "HF_TOKEN",
            ]
        );
        let allow = init[0].env.as_ref().unwrap()[4].value.as_deref();
        assert_eq!(allow, Some("*.json,*.safetensors"));
        let token = init[0].env.as_ref().unwrap()[6].value_from.as_ref().unwrap();
        let secret = token.secret_key_ref.as_ref().unwrap();
        assert_eq!(secret.name, "modelhub-secret");
        assert_eq!(secret.optional, Some(true));

        // one shared volume no matter how many loaders
        assert_eq!(volumes(&template).len(), 1);
    }

    #[test]
    fn test_inject_model_env_vars_keeps_user_tokens() {
        let user_token = crate::model_source::secret_env(HUGGING_FACE_TOKEN_KEY, "mine", "token");
        let mut template = runner_template(vec![user_token.clone()]);
        let provider = ModelHubProvider::new("m", hub("a/b", None));
        provider.inject_model_env_vars(&mut template);
        provider.inject_model_env_vars(&mut template);

        let runner = runner_mut(&mut template).unwrap();
        let envs = runner.env.as_ref().unwrap();
        assert_eq!(envs.len(), 2);
        assert_eq!(envs[0], user_token);
        assert_eq!(envs[1].name, HUGGING_FACE_HUB_TOKEN);
        assert!(init_containers(&template).is_empty());
    }
}
