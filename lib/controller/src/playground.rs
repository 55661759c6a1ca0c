// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Playground → inference Service (+ HPA) translation and its reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EmptyDirVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements as CoreResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use llmaz_api::condition::{
    STATUS_FALSE, find_status_condition, is_status_condition_true, new_condition,
    set_status_condition,
};
use llmaz_api::constants::{
    DEFAULT_BACKEND_PORT, MODEL_RUNNER_CONTAINER_NAME, annotations, conditions, labels,
};
use llmaz_api::{
    BackendRuntime, InferenceService, LeaderWorkerTemplate, ModelClaims, ModelRef, OpenModel,
    Playground, PlaygroundStatus, ResourceRequirements, RolloutStrategy, ServiceSpec,
};
use serde_json::json;

use crate::backend_runtime::{BackendRuntimeParser, ParserError};
use crate::error::{ReconcileError, Result};
use crate::reconciler::{Action, Reconciler};
use crate::util::{self, ResourceList, merge_envs, merge_resources, raise_limits_to_requests};

pub const TERMINATION_GRACE_PERIOD_SECONDS: i64 = 130;

const SHM_VOLUME_NAME: &str = "dshm";
const SHM_MOUNT_PATH: &str = "/dev/shm";
const PORT_NAME: &str = "http";

/// How long to wait before looking for missing models again
const MODEL_WAIT: Duration = Duration::from_secs(10);

pub mod reasons {
    pub const ABORT_PROCESSING: &str = "AbortProcessing";
    pub const PENDING: &str = "Pending";
    pub const PLAYGROUND_READY: &str = "PlaygroundReady";
    pub const PLAYGROUND_IN_PROGRESS: &str = "PlaygroundInProgress";
    pub const PLAYGROUND_NOT_READY: &str = "PlaygroundNotReady";
}

const SERVICE_CONFLICT_MESSAGE: &str = "Playground owns the same name with an existing Service";
const WAITING_FOR_MODEL_MESSAGE: &str = "Waiting for model creation";

/// The inference Service a Playground expands into
pub fn build_service(
    playground: &Playground,
    parser: &BackendRuntimeParser<'_>,
) -> Result<InferenceService, ParserError> {
    let template = build_template(playground, parser)?;

    let claims = playground.claims().unwrap_or_default();
    let model_claims = ModelClaims {
        models: claims
            .models
            .iter()
            .map(|m| ModelRef::new(m.name.clone(), m.role()))
            .collect(),
        inference_flavors: claims.inference_flavors.clone(),
    };

    let mut service = InferenceService::new(
        &playground.name_any(),
        ServiceSpec {
            model_claims,
            replicas: Some(playground.replicas()),
            workload_template: LeaderWorkerTemplate {
                leader_template: None,
                worker_template: template,
                size: Some(1),
                restart_policy: None,
            },
            rollout_strategy: Some(RolloutStrategy::rolling_update()),
        },
    );
    service.metadata.namespace = playground.namespace();
    service.metadata.labels = Some(BTreeMap::from([(
        labels::MANAGED.to_string(),
        labels::MANAGED_VALUE.to_string(),
    )]));
    if playground.skip_model_loader() {
        service.metadata.annotations = Some(BTreeMap::from([(
            annotations::SKIP_MODEL_LOADER.to_string(),
            "true".to_string(),
        )]));
    }
    service.metadata.owner_references = playground.controller_owner_ref(&()).map(|o| vec![o]);
    Ok(service)
}

/// The single `model-runner` pod template
pub fn build_template(
    playground: &Playground,
    parser: &BackendRuntimeParser<'_>,
) -> Result<PodTemplateSpec, ParserError> {
    let overrides = playground.spec.backend_runtime_config.as_ref();

    let mut args = parser.args()?;
    if let Some(o) = overrides {
        args.extend(o.args.iter().cloned());
    }

    let version = overrides
        .and_then(|o| o.version.as_deref())
        .unwrap_or(parser.version());
    let envs = merge_envs(
        parser.envs(),
        overrides.map(|o| o.envs.as_slice()).unwrap_or_default(),
    );

    let mut runner = Container {
        name: MODEL_RUNNER_CONTAINER_NAME.to_string(),
        image: Some(parser.image(version)),
        command: Some(parser.command().to_vec()),
        args: Some(args),
        env: (!envs.is_empty()).then_some(envs),
        resources: runner_resources(
            parser.resources(),
            overrides.and_then(|o| o.resources.as_ref()),
        ),
        lifecycle: parser.lifecycle().cloned(),
        liveness_probe: parser.liveness_probe().cloned(),
        readiness_probe: parser.readiness_probe().cloned(),
        startup_probe: parser.startup_probe().cloned(),
        ports: Some(vec![ContainerPort {
            name: Some(PORT_NAME.to_string()),
            container_port: DEFAULT_BACKEND_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    let mut volumes = Vec::new();
    let shm = overrides
        .and_then(|o| o.shared_memory_size.as_ref())
        .or(parser.shared_memory_size());
    if let Some(size) = shm {
        volumes.push(Volume {
            name: SHM_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                size_limit: Some(size.clone()),
            }),
            ..Default::default()
        });
        runner.volume_mounts = Some(vec![VolumeMount {
            name: SHM_VOLUME_NAME.to_string(),
            mount_path: SHM_MOUNT_PATH.to_string(),
            ..Default::default()
        }]);
    }

    Ok(PodTemplateSpec {
        metadata: None,
        spec: Some(PodSpec {
            containers: vec![runner],
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECONDS),
            volumes: (!volumes.is_empty()).then_some(volumes),
            ..Default::default()
        }),
    })
}

/// Playground overrides fill first and the recommended config fills what they leave unset.
/// Without overrides the recommended resources are used as they are.
fn runner_resources(
    recommended: Option<&ResourceRequirements>,
    overrides: Option<&ResourceRequirements>,
) -> Option<CoreResourceRequirements> {
    let (limits, requests) = match overrides {
        Some(o) => {
            let requests = merge_resources(
                o.requests.as_ref(),
                recommended.and_then(|r| r.requests.as_ref()),
            );
            let mut limits = merge_resources(
                o.limits.as_ref(),
                recommended.and_then(|r| r.limits.as_ref()),
            );
            raise_limits_to_requests(&mut limits, &requests);
            (limits, requests)
        }
        None => {
            let r = recommended?;
            (
                r.limits.clone().unwrap_or_default(),
                r.requests.clone().unwrap_or_default(),
            )
        }
    };
    if limits.is_empty() && requests.is_empty() {
        return None;
    }
    Some(CoreResourceRequirements {
        limits: non_empty(limits),
        requests: non_empty(requests),
        ..Default::default()
    })
}

fn non_empty(list: ResourceList) -> Option<ResourceList> {
    (!list.is_empty()).then_some(list)
}

/// The HPA scaling the Playground, or `None` when it has no elastic config or no trigger
pub fn build_hpa(
    playground: &Playground,
    parser: &BackendRuntimeParser<'_>,
) -> Option<HorizontalPodAutoscaler> {
    let elastic = playground.spec.elastic_config.as_ref()?;
    let trigger = elastic
        .scale_trigger
        .as_ref()
        .or(parser.scale_trigger())?
        .hpa
        .as_ref()?;

    let name = playground.name_any();
    Some(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: playground.namespace(),
            labels: Some(BTreeMap::from([(
                labels::MANAGED.to_string(),
                labels::MANAGED_VALUE.to_string(),
            )])),
            owner_references: playground.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some(Playground::api_version(&()).to_string()),
                kind: Playground::kind(&()).to_string(),
                name,
            },
            min_replicas: elastic.min_replicas,
            // unset means unbounded
            max_replicas: elastic.max_replicas.unwrap_or(i32::MAX),
            metrics: trigger.metrics.clone(),
            behavior: trigger.behavior.clone(),
        }),
        status: None,
    })
}

/// Advance the Playground conditions from the state of its Service and mirror the scale
/// fields. Returns whether the conditions changed.
pub fn set_playground_condition(status: &mut PlaygroundStatus, service: &InferenceService) -> bool {
    let service_status = service.status.clone().unwrap_or_default();
    status.replicas = service_status.replicas;
    status.selector = service_status.selector.clone();

    let progressing_false = find_status_condition(&status.conditions, conditions::PROGRESSING)
        .is_some_and(|c| c.status == STATUS_FALSE);
    if status.conditions.is_empty() || progressing_false {
        return set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::PROGRESSING,
                true,
                reasons::PENDING,
                "Waiting for inference Service ready",
            ),
        );
    }

    if is_status_condition_true(&service_status.conditions, conditions::AVAILABLE) {
        return set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::AVAILABLE,
                true,
                reasons::PLAYGROUND_READY,
                "Playground is ready",
            ),
        );
    }

    if find_status_condition(&status.conditions, conditions::AVAILABLE).is_some() {
        let progressing = set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::PROGRESSING,
                true,
                reasons::PLAYGROUND_IN_PROGRESS,
                "Waiting for inference Service progressing",
            ),
        );
        let available = set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::AVAILABLE,
                false,
                reasons::PLAYGROUND_NOT_READY,
                "Waiting for inference Service ready",
            ),
        );
        return progressing || available;
    }
    false
}

fn abort(status: &mut PlaygroundStatus, message: &str) {
    set_status_condition(
        &mut status.conditions,
        new_condition(conditions::PROGRESSING, false, reasons::ABORT_PROCESSING, message),
    );
}

fn pending(status: &mut PlaygroundStatus, message: String) {
    set_status_condition(
        &mut status.conditions,
        new_condition(conditions::PROGRESSING, true, reasons::PENDING, message),
    );
}

/// The models `refs` name in the same order, or `None` if any does not exist yet
pub(crate) async fn fetch_models(
    client: &Client,
    refs: &[ModelRef],
) -> Result<Option<Vec<OpenModel>>> {
    let api: Api<OpenModel> = Api::all(client.clone());
    let mut models = Vec::with_capacity(refs.len());
    for r in refs {
        match api.get_opt(&r.name).await? {
            Some(model) => models.push(model),
            None => {
                tracing::debug!(model = %r.name, "model not found");
                return Ok(None);
            }
        }
    }
    Ok(Some(models))
}

pub struct PlaygroundReconciler {
    client: Client,
}

impl PlaygroundReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn sync(
        &self,
        playground: &Playground,
        ns: &str,
        status: &mut PlaygroundStatus,
    ) -> Result<Action> {
        let name = playground.name_any();
        let services: Api<InferenceService> = Api::namespaced(self.client.clone(), ns);

        if let Some(existing) = services.get_opt(&name).await? {
            if !util::is_controlled_by(&existing, playground) {
                tracing::warn!(playground = %name, namespace = ns, "service name taken");
                abort(status, SERVICE_CONFLICT_MESSAGE);
                return Ok(Action::Done);
            }
        }

        let Some(models) = fetch_models(&self.client, &playground.model_refs()).await? else {
            abort(status, WAITING_FOR_MODEL_MESSAGE);
            return Ok(Action::RequeueAfter(MODEL_WAIT));
        };

        let backends: Api<BackendRuntime> = Api::all(self.client.clone());
        let backend = backends.get(playground.backend_name()).await?;
        let parser = BackendRuntimeParser::new(&backend, &models, playground);

        let service = match build_service(playground, &parser) {
            Ok(service) => service,
            Err(e) => {
                tracing::info!(
                    playground = %name,
                    namespace = ns,
                    error = %e,
                    "failed to build service"
                );
                pending(status, e.to_string());
                return Ok(Action::Done);
            }
        };
        let applied = util::apply(&services, &service).await?;

        if let Some(hpa) = build_hpa(playground, &parser) {
            let hpas: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), ns);
            util::apply(&hpas, &hpa).await?;
        }

        set_playground_condition(status, &applied);
        Ok(Action::Done)
    }
}

#[async_trait]
impl Reconciler for PlaygroundReconciler {
    type Object = Playground;

    fn name(&self) -> &'static str {
        "playground"
    }

    async fn reconcile(&self, playground: Arc<Playground>) -> Result<Action> {
        let ns = playground
            .namespace()
            .ok_or_else(|| ReconcileError::missing("Playground", "metadata.namespace"))?;
        let original = playground.status.clone().unwrap_or_default();
        let mut status = original.clone();

        let action = self.sync(&playground, &ns, &mut status).await;

        if status != original {
            let api: Api<Playground> = Api::namespaced(self.client.clone(), &ns);
            api.patch_status(
                &playground.name_any(),
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
        }
        action
    }
}
