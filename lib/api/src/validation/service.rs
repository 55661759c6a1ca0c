// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{FieldErrors, validate_name};
use crate::constants::MODEL_RUNNER_CONTAINER_NAME;
use crate::model::ModelRole;
use crate::service::InferenceService;

pub fn validate_service_create(service: &InferenceService) -> FieldErrors {
    let mut errs = validate_service_update(service);
    validate_name(service.metadata.name.as_deref(), &mut errs);

    let has_runner = service
        .spec
        .workload_template
        .worker_template
        .spec
        .as_ref()
        .is_some_and(|spec| {
            spec.containers
                .iter()
                .any(|c| c.name == MODEL_RUNNER_CONTAINER_NAME)
        });
    if !has_runner {
        errs.push(
            "spec.workloadTemplate.workerTemplate.spec.containers",
            "model-runner container doesn't exist",
        );
    }
    errs
}

pub fn validate_service_update(service: &InferenceService) -> FieldErrors {
    let mut errs = FieldErrors::default();
    let claims = &service.spec.model_claims;
    let mains = claims.count_role(ModelRole::Main);

    if claims.has_role(ModelRole::Draft) {
        if claims.models.len() != 2 {
            errs.push(
                "spec.modelClaims.models",
                "only two models are allowed in speculativeDecoding mode",
            );
        }
        if mains != 1 {
            errs.push("spec.modelClaims.models", "main model is required");
        }
    } else if claims.models.len() > 1 && mains != 1 {
        errs.push("spec.modelClaims.models", "exactly one main model is required");
    }
    errs
}
