// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use super::{FieldErrors, limits_below_requests};
use crate::backend_runtime::BackendRuntime;

/// Same rules on create and update
pub fn validate_backend_runtime(backend: &BackendRuntime) -> FieldErrors {
    let mut errs = FieldErrors::default();

    for (i, config) in backend.spec.recommended_configs.iter().enumerate() {
        let Some(resources) = &config.resources else {
            continue;
        };
        let (limits, requests) = (resources.limits.as_ref(), resources.requests.as_ref());
        for (_, msg) in limits_below_requests(limits, requests) {
            errs.push(format!("spec.recommendedConfigs[{i}].resources"), msg);
        }
    }

    let mut names = HashSet::new();
    for (i, config) in backend.spec.recommended_configs.iter().enumerate() {
        if !names.insert(config.name.as_str()) {
            errs.push(
                format!("spec.recommendedConfigs[{i}].name"),
                format!("duplicated name {}", config.name),
            );
        }
    }

    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_runtime::{BackendRuntimeSpec, RecommendedConfig, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

    fn config(name: &str, limit_cpu: &str, request_cpu: &str) -> RecommendedConfig {
        RecommendedConfig {
            name: name.to_string(),
            resources: Some(ResourceRequirements {
                limits: Some([("cpu".to_string(), Quantity(limit_cpu.to_string()))].into()),
                requests: Some([("cpu".to_string(), Quantity(request_cpu.to_string()))].into()),
            }),
            ..Default::default()
        }
    }

    fn backend(configs: Vec<RecommendedConfig>) -> BackendRuntime {
        BackendRuntime::new(
            "vllm",
            BackendRuntimeSpec {
                image: "vllm/vllm-openai".to_string(),
                version: "v0.7.3".to_string(),
                recommended_configs: configs,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_valid_backend() {
        let errs = validate_backend_runtime(&backend(vec![
            config("default", "8", "4"),
            config("speculative-decoding", "8", "8000m"),
        ]));
        assert!(errs.is_empty(), "{errs}");
    }

    #[test]
    fn test_limit_below_request() {
        let errs = validate_backend_runtime(&backend(vec![config("default", "2", "4")]));
        assert_eq!(errs.len(), 1);
        assert!(errs.to_string().contains("limit (2) for cpu"));
    }

    #[test]
    fn test_duplicate_names() {
        let errs = validate_backend_runtime(&backend(vec![
            config("default", "8", "4"),
            config("default", "8", "4"),
        ]));
        assert_eq!(errs.len(), 1);
        assert_eq!(errs.iter().next().unwrap().message, "duplicated name default");
    }
}
