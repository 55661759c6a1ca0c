// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Where model weights come from and how a pod gets them.
//!
//! Every [`OpenModel`] source maps to a [`ModelSourceProvider`] that knows the path the runner
//! should load the weights from and how to wire the `model-loader` init container, volumes and
//! credentials into a pod template.

mod hub;
mod uri;

pub use hub::ModelHubProvider;
pub use uri::UriProvider;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume, VolumeMount,
};
use llmaz_api::constants::{
    CONTAINER_MODEL_PATH, MODEL_LOADER_CONTAINER_NAME, MODEL_RUNNER_CONTAINER_NAME,
    MODEL_VOLUME_NAME,
};
use llmaz_api::model::SourceError;
use llmaz_api::{ModelSource, OpenModel};
use llmaz_runtime::config::environment_names;

/// Overrides the loader image
pub const MODEL_LOADER_IMAGE_ENV: &str = environment_names::model_loader::MODEL_LOADER_IMAGE;
pub const DEFAULT_MODEL_LOADER_IMAGE: &str = "inftyai/model-loader:v0.0.10";

pub const MODEL_SOURCE_MODELHUB: &str = "modelhub";
pub const MODEL_SOURCE_OBJ_STORE: &str = "objstore";

pub const MODELHUB_SECRET_NAME: &str = "modelhub-secret";
pub const HUGGING_FACE_TOKEN_KEY: &str = "HF_TOKEN";
pub const HUGGING_FACE_HUB_TOKEN: &str = "HUGGING_FACE_HUB_TOKEN";

pub const OSS_ACCESS_SECRET_NAME: &str = "oss-access-secret";
pub const OSS_ACCESS_KEY_ID: &str = "OSS_ACCESS_KEY_ID";
pub const OSS_ACCESS_KEY_SECRET: &str = "OSS_ACCESS_KEY_SECRET";

pub const AWS_ACCESS_SECRET_NAME: &str = "aws-access-secret";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Runner envs that are never copied into the loader; the loader wires its own credentials
const CREDENTIAL_DENY_LIST: &[&str] = &[
    HUGGING_FACE_HUB_TOKEN,
    HUGGING_FACE_TOKEN_KEY,
    OSS_ACCESS_KEY_ID,
    OSS_ACCESS_KEY_SECRET,
    AWS_ACCESS_KEY_ID,
    AWS_SECRET_ACCESS_KEY,
];

pub trait ModelSourceProvider: Send + Sync {
    /// Name the runner serves the model under
    fn model_name(&self) -> String;

    /// Path, id or URI the runner loads the weights from
    fn model_path(&self, skip_model_loader: bool) -> String;

    /// Add the init container (and for `index == 0` the shared model volume) that downloads
    /// the weights before the runner starts. `index` suffixes the init container name.
    fn inject_model_loader(&self, template: &mut PodTemplateSpec, index: usize);

    /// Give the runner the credentials it needs to fetch weights itself
    fn inject_model_env_vars(&self, template: &mut PodTemplateSpec);
}

pub fn provider_for(model: &OpenModel) -> Result<Box<dyn ModelSourceProvider>, SourceError> {
    let name = model.metadata.name.clone().unwrap_or_default();
    Ok(match model.source()? {
        ModelSource::Hub(hub) => Box::new(ModelHubProvider::new(name, hub)),
        ModelSource::Uri(uri) => Box::new(UriProvider::new(name, uri)),
    })
}

pub fn loader_image() -> String {
    std::env::var(MODEL_LOADER_IMAGE_ENV)
        .ok()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_LOADER_IMAGE.to_string())
}

fn loader_container_name(index: usize) -> String {
    if index == 0 {
        MODEL_LOADER_CONTAINER_NAME.to_string()
    } else {
        format!("{MODEL_LOADER_CONTAINER_NAME}-{index}")
    }
}

/// A fresh init container with the model volume mounted and the runner's non-credential envs
fn new_loader_container(template: &PodTemplateSpec, index: usize) -> Container {
    let env = template
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|runner| runner.env.as_ref())
        .map(|envs| {
            envs.iter()
                .filter(|e| !CREDENTIAL_DENY_LIST.contains(&e.name.as_str()))
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    Container {
        name: loader_container_name(index),
        image: Some(loader_image()),
        env: Some(env),
        volume_mounts: Some(vec![VolumeMount {
            name: MODEL_VOLUME_NAME.to_string(),
            mount_path: CONTAINER_MODEL_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn pod_spec(template: &mut PodTemplateSpec) -> &mut PodSpec {
    template.spec.get_or_insert_with(Default::default)
}

fn push_init_container(template: &mut PodTemplateSpec, container: Container) {
    let spec = pod_spec(template);
    let init = spec.init_containers.get_or_insert_with(Vec::new);
    init.retain(|c| c.name != container.name);
    init.push(container);
}

pub(crate) fn runner_mut(template: &mut PodTemplateSpec) -> Option<&mut Container> {
    template
        .spec
        .as_mut()?
        .containers
        .iter_mut()
        .find(|c| c.name == MODEL_RUNNER_CONTAINER_NAME)
}

fn has_volume(template: &PodTemplateSpec, name: &str) -> bool {
    template
        .spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .is_some_and(|v| v.iter().any(|v| v.name == name))
}

/// Add `volume` to the pod and mount it read-only on the runner. No-op when a volume of the
/// same name exists.
fn mount_on_runner(template: &mut PodTemplateSpec, volume: Volume, mount_path: &str) {
    if has_volume(template, &volume.name) {
        return;
    }
    if let Some(runner) = runner_mut(template) {
        runner.volume_mounts.get_or_insert_with(Vec::new).push(VolumeMount {
            name: volume.name.clone(),
            mount_path: mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    pod_spec(template).volumes.get_or_insert_with(Vec::new).push(volume);
}

/// The emptyDir the loaders download into, shared with the runner
fn inject_model_volume(template: &mut PodTemplateSpec) {
    let volume = Volume {
        name: MODEL_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    };
    mount_on_runner(template, volume, CONTAINER_MODEL_PATH);
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

/// An env read from an optional secret; the env is empty when the secret does not exist
fn secret_env(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: Some(true),
            }),
            ..Default::default()
        }),
    }
}

/// Append `envs` to the runner, skipping names it already sets
fn add_runner_envs_if_absent(template: &mut PodTemplateSpec, envs: Vec<EnvVar>) {
    let Some(runner) = runner_mut(template) else {
        return;
    };
    let existing = runner.env.get_or_insert_with(Vec::new);
    for e in envs {
        if !existing.iter().any(|x| x.name == e.name) {
            existing.push(e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use llmaz_api::model::{ModelSourceSpec, ModelSpec};

    pub(crate) fn runner_template(envs: Vec<EnvVar>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: MODEL_RUNNER_CONTAINER_NAME.to_string(),
                    env: Some(envs),
                    ..Default::default()
                }],
                ..Default::default()
            }),
        }
    }

    pub(crate) fn model(name: &str, source: ModelSourceSpec) -> OpenModel {
        OpenModel::new(
            name,
            ModelSpec {
                family_name: "qwen2".to_string(),
                source,
                ..Default::default()
            },
        )
    }

    pub(crate) fn init_containers(template: &PodTemplateSpec) -> &[Container] {
        template
            .spec
            .as_ref()
            .and_then(|s| s.init_containers.as_deref())
            .unwrap_or_default()
    }

    pub(crate) fn volumes(template: &PodTemplateSpec) -> &[Volume] {
        template
            .spec
            .as_ref()
            .and_then(|s| s.volumes.as_deref())
            .unwrap_or_default()
    }

    pub(crate) fn env_names(container: &Container) -> Vec<&str> {
        container
            .env
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|e| e.name.as_str())
            .collect()
    }

    #[test]
    fn test_loader_image_env_override() {
        temp_env::with_var(MODEL_LOADER_IMAGE_ENV, Some("registry/loader:dev"), || {
            assert_eq!(loader_image(), "registry/loader:dev");
        });
        temp_env::with_var(MODEL_LOADER_IMAGE_ENV, None::<&str>, || {
            assert_eq!(loader_image(), DEFAULT_MODEL_LOADER_IMAGE);
        });
    }

    #[test]
    fn test_loader_spreads_runner_envs_without_credentials() {
        let template = runner_template(vec![
            env("VLLM_USE_V1", "1"),
            secret_env(HUGGING_FACE_TOKEN_KEY, "user-secret", "token"),
            env(AWS_ACCESS_KEY_ID, "plain"),
        ]);
        let loader = new_loader_container(&template, 2);
        assert_eq!(loader.name, "model-loader-2");
        assert_eq!(env_names(&loader), ["VLLM_USE_V1"]);
    }

    #[test]
    fn test_model_volume_injected_once() {
        let mut template = runner_template(vec![]);
        inject_model_volume(&mut template);
        inject_model_volume(&mut template);
        assert_eq!(volumes(&template).len(), 1);
        let runner = runner_mut(&mut template).unwrap();
        let mounts = runner.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_path, CONTAINER_MODEL_PATH);
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn test_provider_for_empty_source() {
        assert!(provider_for(&model("m", ModelSourceSpec::default())).is_err());
    }
}
