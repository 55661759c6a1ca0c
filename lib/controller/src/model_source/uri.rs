// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use k8s_openapi::api::core::v1::{EnvVar, HostPathVolumeSource, PodTemplateSpec, Volume};
use llmaz_api::constants::{CONTAINER_MODEL_PATH, MODEL_VOLUME_NAME};
use llmaz_api::{ModelUri, Protocol};

use super::{
    AWS_ACCESS_KEY_ID, AWS_ACCESS_SECRET_NAME, AWS_SECRET_ACCESS_KEY, MODEL_SOURCE_OBJ_STORE,
    ModelSourceProvider, OSS_ACCESS_KEY_ID, OSS_ACCESS_KEY_SECRET, OSS_ACCESS_SECRET_NAME,
    add_runner_envs_if_absent, env, inject_model_volume, mount_on_runner, new_loader_container,
    push_init_container, secret_env,
};

/// Weights addressed by URI: object stores, a node path or an ollama model
#[derive(Debug, Clone)]
pub struct UriProvider {
    model_name: String,
    uri: ModelUri,
}

impl UriProvider {
    pub fn new(model_name: impl Into<String>, uri: ModelUri) -> Self {
        Self {
            model_name: model_name.into(),
            uri,
        }
    }

    fn credential_envs(&self) -> Vec<EnvVar> {
        match self.uri.protocol {
            Protocol::Oss => vec![
                secret_env(OSS_ACCESS_KEY_ID, OSS_ACCESS_SECRET_NAME, OSS_ACCESS_KEY_ID),
                secret_env(OSS_ACCESS_KEY_SECRET, OSS_ACCESS_SECRET_NAME, OSS_ACCESS_KEY_SECRET),
            ],
            Protocol::S3 | Protocol::Gcs => vec![
                secret_env(AWS_ACCESS_KEY_ID, AWS_ACCESS_SECRET_NAME, AWS_ACCESS_KEY_ID),
                secret_env(AWS_SECRET_ACCESS_KEY, AWS_ACCESS_SECRET_NAME, AWS_SECRET_ACCESS_KEY),
            ],
            Protocol::Host | Protocol::Ollama => Vec::new(),
        }
    }

    /// Last path segment of the object key
    fn leaf(&self) -> &str {
        let path = self.uri.path.trim_end_matches('/');
        path.rsplit('/').next().unwrap_or(path)
    }
}

impl ModelSourceProvider for UriProvider {
    fn model_name(&self) -> String {
        match self.uri.protocol {
            Protocol::Ollama => self.uri.path.clone(),
            _ => self.model_name.clone(),
        }
    }

    fn model_path(&self, skip_model_loader: bool) -> String {
        match self.uri.protocol {
            Protocol::Host | Protocol::Ollama => self.uri.path.clone(),
            _ if skip_model_loader => self.uri.raw.clone(),
            _ => {
                let leaf = self.leaf();
                if leaf.ends_with(".gguf") {
                    format!("{CONTAINER_MODEL_PATH}{leaf}")
                } else {
                    format!("{CONTAINER_MODEL_PATH}models--{leaf}")
                }
            }
        }
    }

    fn inject_model_loader(&self, template: &mut PodTemplateSpec, index: usize) {
        match self.uri.protocol {
            // ollama pulls at runtime
            Protocol::Ollama => {}
            Protocol::Host => {
                let volume = Volume {
                    name: MODEL_VOLUME_NAME.to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: self.uri.path.clone(),
                        type_: None,
                    }),
                    ..Default::default()
                };
                mount_on_runner(template, volume, &self.uri.path);
            }
            Protocol::Oss | Protocol::S3 | Protocol::Gcs => {
                let mut loader = new_loader_container(template, index);
                let envs = loader.env.get_or_insert_with(Vec::new);
                envs.push(env("MODEL_SOURCE_TYPE", MODEL_SOURCE_OBJ_STORE));
                envs.push(env("PROVIDER", self.uri.protocol.as_str()));
                if let Some(endpoint) = &self.uri.endpoint {
                    envs.push(env("ENDPOINT", endpoint.as_str()));
                }
                if let Some(bucket) = &self.uri.bucket {
                    envs.push(env("BUCKET", bucket.as_str()));
                }
                envs.push(env("MODEL_PATH", self.uri.path.as_str()));
                envs.extend(self.credential_envs());

                push_init_container(template, loader);
                if index == 0 {
                    inject_model_volume(template);
                }
            }
        }
    }

    fn inject_model_env_vars(&self, template: &mut PodTemplateSpec) {
        add_runner_envs_if_absent(template, self.credential_envs());
    }
}
