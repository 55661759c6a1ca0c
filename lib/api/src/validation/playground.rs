// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{FieldErrors, limits_below_requests, validate_name};
use crate::backend_runtime::InferenceMode;
use crate::constants::labels;
use crate::model::ModelRole;
use crate::playground::Playground;

/// Default `replicas` to 1 and label the Playground with its main model
pub fn default_playground(playground: &mut Playground) {
    playground.spec.replicas.get_or_insert(1);
    let model_name = playground
        .model_refs()
        .into_iter()
        .find(|m| m.role() == ModelRole::Main)
        .map(|m| m.name)
        .unwrap_or_default();
    playground
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(labels::MODEL_NAME.to_string(), model_name);
}

pub fn validate_playground_create(playground: &Playground) -> FieldErrors {
    let mut errs = validate_playground_update(playground);
    validate_name(playground.metadata.name.as_deref(), &mut errs);
    errs
}

pub fn validate_playground_update(playground: &Playground) -> FieldErrors {
    let mut errs = FieldErrors::default();
    let spec = &playground.spec;

    match (&spec.model_claim, &spec.model_claims) {
        (None, None) => errs.push("spec", "modelClaim and modelClaims couldn't be both nil"),
        (Some(_), Some(_)) => {
            errs.push("spec", "modelClaim and modelClaims are mutually exclusive")
        }
        _ => {}
    }

    if let Some(claims) = &spec.model_claims {
        let mains = claims.count_role(ModelRole::Main);
        if mains > 1 {
            errs.push("spec.modelClaims.models", "only one main model is allowed");
        } else if mains == 0 && !claims.models.is_empty() {
            errs.push("spec.modelClaims.models", "main model is required");
        }
    }

    if playground.config_name() == InferenceMode::SpeculativeDecoding.as_str()
        && playground.model_refs().len() != 2
    {
        errs.push(
            "spec.modelClaims.models",
            "only two models are allowed in speculativeDecoding mode",
        );
    }

    if let Some(resources) = spec
        .backend_runtime_config
        .as_ref()
        .and_then(|c| c.resources.as_ref())
    {
        let (limits, requests) = (resources.limits.as_ref(), resources.requests.as_ref());
        for (_, msg) in limits_below_requests(limits, requests) {
            errs.push("spec.backendRuntimeConfig.resources", msg);
        }
    }

    if let Some(elastic) = &spec.elastic_config {
        if elastic.min_replicas == Some(0) {
            errs.push("spec.elasticConfig.minReplicas", "minReplicas couldn't be 0");
        }
        match (elastic.min_replicas, elastic.max_replicas) {
            (Some(min), Some(max)) if min >= max => errs.push(
                "spec.elasticConfig.minReplicas",
                format!("{min}: minReplicas must be less than maxReplicas"),
            ),
            _ => {}
        }
        if elastic.scale_trigger.as_ref().is_some_and(|t| t.hpa.is_none()) {
            errs.push("spec.elasticConfig.scaleTrigger.hpa", "hpa couldn't be nil");
        }
    }

    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_runtime::{BackendRuntimeConfig, ResourceRequirements, ScaleTrigger};
    use crate::model::{ModelClaim, ModelClaims, ModelRef};
    use crate::playground::{ElasticConfig, PlaygroundSpec};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn single(name: &str) -> Playground {
        Playground::new(
            "qwen",
            PlaygroundSpec {
                model_claim: Some(ModelClaim {
                    model_name: name.to_string(),
                    inference_flavors: None,
                }),
                ..Default::default()
            },
        )
    }

    fn multi(models: Vec<ModelRef>) -> Playground {
        Playground::new(
            "multi",
            PlaygroundSpec {
                model_claims: Some(ModelClaims {
                    models,
                    inference_flavors: None,
                }),
                ..Default::default()
            },
        )
    }

    fn messages(playground: &Playground) -> Vec<String> {
        validate_playground_create(playground)
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    #[test]
    fn test_claims_required() {
        let playground = Playground::new("empty", PlaygroundSpec::default());
        assert_eq!(
            messages(&playground),
            ["modelClaim and modelClaims couldn't be both nil"]
        );
    }

    #[test]
    fn test_speculative_decoding_layout() {
        let ok = multi(vec![
            ModelRef::new("llama3-8b", ModelRole::Main),
            ModelRef::new("opt-125m", ModelRole::Draft),
        ]);
        assert!(messages(&ok).is_empty());

        let two_mains = multi(vec![
            ModelRef::new("llama3-8b", ModelRole::Main),
            ModelRef::new("opt-125m", ModelRole::Main),
        ]);
        assert_eq!(messages(&two_mains), ["only one main model is allowed"]);

        let three = multi(vec![
            ModelRef::new("llama3-8b", ModelRole::Main),
            ModelRef::new("opt-125m", ModelRole::Draft),
            ModelRef::new("opt-350m", ModelRole::Draft),
        ]);
        assert_eq!(
            messages(&three),
            ["only two models are allowed in speculativeDecoding mode"]
        );
    }

    #[test]
    fn test_resources_and_elastic_config() {
        let mut playground = single("qwen2-0--5b");
        playground.spec.backend_runtime_config = Some(BackendRuntimeConfig {
            resources: Some(ResourceRequirements {
                limits: Some([("memory".to_string(), Quantity("1Gi".to_string()))].into()),
                requests: Some([("memory".to_string(), Quantity("2Gi".to_string()))].into()),
            }),
            ..Default::default()
        });
        playground.spec.elastic_config = Some(ElasticConfig {
            min_replicas: Some(0),
            max_replicas: Some(0),
            scale_trigger: Some(ScaleTrigger { hpa: None }),
        });
        let paths: Vec<_> = validate_playground_update(&playground)
            .iter()
            .map(|e| e.path.clone())
            .collect();
        assert_eq!(
            paths,
            [
                "spec.backendRuntimeConfig.resources",
                "spec.elasticConfig.minReplicas",
                "spec.elasticConfig.minReplicas",
                "spec.elasticConfig.scaleTrigger.hpa",
            ]
        );
    }

    #[test]
    fn test_default_playground() {
        let mut playground = multi(vec![
            ModelRef::new("opt-125m", ModelRole::Draft),
            ModelRef {
                name: "llama3-8b".to_string(),
                role: None,
            },
        ]);
        default_playground(&mut playground);
        assert_eq!(playground.spec.replicas, Some(1));
        assert_eq!(
            playground.metadata.labels.as_ref().unwrap()[labels::MODEL_NAME],
            "llama3-8b"
        );

        let mut playground = single("qwen2-0--5b");
        playground.spec.replicas = Some(0);
        default_playground(&mut playground);
        assert_eq!(playground.spec.replicas, Some(0));
    }
}
