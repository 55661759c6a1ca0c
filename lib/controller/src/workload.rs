// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Inference Service → LeaderWorkerSet synthesis, the leader load-balancing Service and the
//! Service reconciler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec as CoreServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use llmaz_api::condition::{
    find_status_condition, is_status_condition_true, new_condition, set_status_condition,
};
use llmaz_api::constants::{DEFAULT_BACKEND_PORT, annotations, conditions, labels};
use llmaz_api::lws::{LeaderWorkerSetSpec, STARTUP_POLICY_LEADER_READY};
use llmaz_api::{InferenceService, LeaderWorkerSet, OpenModel, ServiceStatus};
use serde_json::json;

use crate::error::{ReconcileError, Result};
use crate::model_source::{provider_for, runner_mut};
use crate::playground::fetch_models;
use crate::reconciler::{Action, Reconciler};
use crate::util::{self, merge_kvs};

const MODEL_WAIT: Duration = Duration::from_secs(10);

pub mod reasons {
    pub const SERVICE_READY: &str = "ServiceReady";
    pub const SERVICE_IN_PROGRESS: &str = "ServiceInProgress";
    pub const SERVICE_NOT_READY: &str = "ServiceNotReady";
}

/// Name of the Service fronting the leader pods of `service`
pub fn lb_service_name(service: &str) -> String {
    format!("{service}-lb")
}

/// The LeaderWorkerSet serving `service`. `models` follow the claims, main model first.
pub fn build_workload(service: &InferenceService, models: &[OpenModel]) -> Result<LeaderWorkerSet> {
    let main = models.first().ok_or_else(|| {
        ReconcileError::Invalid(format!("service {} claims no model", service.name_any()))
    })?;

    let mut template = service.spec.workload_template.clone();
    let skip_loader = service.skip_model_loader();
    for (index, model) in models.iter().enumerate() {
        let provider = provider_for(model).map_err(|source| ReconcileError::ModelSource {
            model: model.name_any(),
            source,
        })?;
        if let Some(leader) = template.leader_template.as_mut() {
            if skip_loader {
                provider.inject_model_env_vars(leader);
            } else {
                provider.inject_model_loader(leader, index);
            }
        }
        if skip_loader {
            provider.inject_model_env_vars(&mut template.worker_template);
        } else {
            provider.inject_model_loader(&mut template.worker_template, index);
        }
    }

    let model_labels = BTreeMap::from([
        (labels::MODEL_NAME.to_string(), main.name_any()),
        (labels::MODEL_FAMILY_NAME.to_string(), main.spec.family_name.clone()),
    ]);
    let mut model_annotations = BTreeMap::new();
    let flavors = service
        .spec
        .model_claims
        .inference_flavors
        .as_deref()
        .unwrap_or_default();
    if !flavors.is_empty() {
        model_annotations.insert(
            annotations::INFERENCE_SERVICE_FLAVORS.to_string(),
            flavors.join(","),
        );
    }
    // the leader is the entry point of a multi-host group
    let labelled = match template.leader_template.as_mut() {
        Some(leader) => leader,
        None => &mut template.worker_template,
    };
    let meta = labelled.metadata.get_or_insert_with(Default::default);
    meta.labels = merge_kvs(meta.labels.take(), &model_labels);
    meta.annotations = merge_kvs(meta.annotations.take(), &model_annotations);

    inject_model_flavor(&mut template.worker_template, main, flavors);
    if let Some(leader) = template.leader_template.as_mut() {
        inject_model_flavor(leader, main, flavors);
    }

    template.size = Some(template.size());
    let mut lws = LeaderWorkerSet::new(
        &service.name_any(),
        LeaderWorkerSetSpec {
            replicas: Some(service.replicas()),
            leader_worker_template: template,
            rollout_strategy: service.spec.rollout_strategy.clone(),
            startup_policy: Some(STARTUP_POLICY_LEADER_READY.to_string()),
        },
    );
    lws.metadata.namespace = service.namespace();
    lws.metadata.labels = Some(BTreeMap::from([(
        labels::MANAGED.to_string(),
        labels::MANAGED_VALUE.to_string(),
    )]));
    lws.metadata.owner_references = service.controller_owner_ref(&()).map(|o| vec![o]);
    Ok(lws)
}

/// Write the limits of the selected flavor into the runner's requests and limits. The
/// claimed flavor wins over the model's first one.
fn inject_model_flavor(template: &mut PodTemplateSpec, model: &OpenModel, claimed: &[String]) {
    let flavors = model.flavors();
    let flavor = match claimed.first() {
        Some(name) => flavors.iter().find(|f| &f.name == name),
        None => flavors.first(),
    };
    let Some(limits) = flavor.and_then(|f| f.limits.as_ref()) else {
        return;
    };
    let Some(runner) = runner_mut(template) else {
        return;
    };

    let resources = runner.resources.get_or_insert_with(ResourceRequirements::default);
    let requests = resources.requests.get_or_insert_with(BTreeMap::new);
    for (name, value) in limits {
        requests.insert(name.clone(), value.clone());
    }
    let resource_limits = resources.limits.get_or_insert_with(BTreeMap::new);
    for (name, value) in limits {
        resource_limits.insert(name.clone(), value.clone());
    }
}

/// ClusterIP Service selecting the leader pod of every group
pub fn build_lb_service(service: &InferenceService) -> Service {
    let name = service.name_any();
    Service {
        metadata: ObjectMeta {
            name: Some(lb_service_name(&name)),
            namespace: service.namespace(),
            labels: Some(BTreeMap::from([(
                labels::MANAGED.to_string(),
                labels::MANAGED_VALUE.to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                annotations::MODEL_ACTIVATOR.to_string(),
                name.clone(),
            )])),
            owner_references: service.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        },
        spec: Some(CoreServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: DEFAULT_BACKEND_PORT,
                target_port: Some(IntOrString::Int(DEFAULT_BACKEND_PORT)),
                ..Default::default()
            }]),
            selector: Some(BTreeMap::from([
                (labels::LWS_NAME.to_string(), name),
                (labels::LWS_WORKER_INDEX.to_string(), "0".to_string()),
            ])),
            ..Default::default()
        }),
        status: None,
    }
}

/// Advance the Service conditions from its LeaderWorkerSet and mirror the scale fields.
/// Returns whether the conditions changed.
pub fn set_service_condition(status: &mut ServiceStatus, lws: &LeaderWorkerSet) -> bool {
    let lws_status = lws.status.clone().unwrap_or_default();
    status.replicas = lws_status.replicas;
    status.selector = lws_status.hpa_pod_selector.clone();

    if is_status_condition_true(&lws_status.conditions, conditions::AVAILABLE) {
        return set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::AVAILABLE,
                true,
                reasons::SERVICE_READY,
                "Inference Service is ready",
            ),
        );
    }

    let mut changed = set_status_condition(
        &mut status.conditions,
        new_condition(
            conditions::PROGRESSING,
            true,
            reasons::SERVICE_IN_PROGRESS,
            "Inference Service is progressing",
        ),
    );
    if find_status_condition(&status.conditions, conditions::AVAILABLE).is_some() {
        changed |= set_status_condition(
            &mut status.conditions,
            new_condition(
                conditions::AVAILABLE,
                false,
                reasons::SERVICE_NOT_READY,
                "Waiting for leaderWorkerSet ready",
            ),
        );
    }
    changed
}

pub struct ServiceReconciler {
    client: Client,
}

impl ServiceReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn ensure_lb_service(&self, service: &InferenceService, ns: &str) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), ns);
        let name = lb_service_name(&service.name_any());
        if api.get_opt(&name).await?.is_some() {
            return Ok(());
        }
        match api.create(&PostParams::default(), &build_lb_service(service)).await {
            Ok(_) => {
                tracing::info!(service = %name, namespace = ns, "created leader service");
                Ok(())
            }
            // lost a race with another worker
            Err(e) if util::is_conflict(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Reconciler for ServiceReconciler {
    type Object = InferenceService;

    fn name(&self) -> &'static str {
        "service"
    }

    async fn reconcile(&self, service: Arc<InferenceService>) -> Result<Action> {
        let ns = service
            .namespace()
            .ok_or_else(|| ReconcileError::missing("Service", "metadata.namespace"))?;
        let name = service.name_any();

        let refs = service.spec.model_claims.main_first();
        let Some(models) = fetch_models(&self.client, &refs).await? else {
            tracing::info!(service = %name, namespace = %ns, "waiting for models");
            return Ok(Action::RequeueAfter(MODEL_WAIT));
        };

        let lws = build_workload(&service, &models)?;
        let lws_api: Api<LeaderWorkerSet> = Api::namespaced(self.client.clone(), &ns);
        let applied = util::apply(&lws_api, &lws).await?;

        self.ensure_lb_service(&service, &ns).await?;

        let original = service.status.clone().unwrap_or_default();
        let mut status = original.clone();
        set_service_condition(&mut status, &applied);
        if status != original {
            let api: Api<InferenceService> = Api::namespaced(self.client.clone(), &ns);
            api.patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await?;
        }
        Ok(Action::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_runtime::parser::tests::hub_model;
    use crate::model_source::tests::{env_names, init_containers, runner_template, volumes};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use llmaz_api::condition::STATUS_FALSE;
    use llmaz_api::lws::LeaderWorkerSetStatus;
    use llmaz_api::model::{Flavor, InferenceConfig};
    use llmaz_api::{LeaderWorkerTemplate, ModelClaims, ModelRef, ModelRole, ServiceSpec};

    fn service(leader: bool, flavors: Option<Vec<String>>) -> InferenceService {
        let mut svc = InferenceService::new(
            "llama3",
            ServiceSpec {
                model_claims: ModelClaims {
                    models: vec![ModelRef::new("llama3-8b", ModelRole::Main)],
                    inference_flavors: flavors,
                },
                replicas: Some(2),
                workload_template: LeaderWorkerTemplate {
                    leader_template: leader.then(|| runner_template(vec![])),
                    worker_template: runner_template(vec![]),
                    size: leader.then_some(2),
                    restart_policy: None,
                },
                rollout_strategy: None,
            },
        );
        svc.metadata.namespace = Some("default".to_string());
        svc
    }

    fn flavored_model() -> OpenModel {
        let mut model = hub_model("llama3-8b", "meta-llama/Meta-Llama-3-8B");
        let flavor = |name: &str, gpu: &str| Flavor {
            name: name.to_string(),
            limits: Some([("nvidia.com/gpu".to_string(), Quantity(gpu.to_string()))].into()),
            ..Default::default()
        };
        model.spec.inference_config = Some(InferenceConfig {
            flavors: vec![flavor("a10", "1"), flavor("a100", "2")],
        });
        model
    }

    fn labels_of(template: &PodTemplateSpec) -> BTreeMap<String, String> {
        template
            .metadata
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_default()
    }

    fn gpu_of(template: &PodTemplateSpec) -> (Option<Quantity>, Option<Quantity>) {
        let resources = template.spec.as_ref().unwrap().containers[0]
            .resources
            .clone()
            .unwrap_or_default();
        let get = |list: Option<BTreeMap<String, Quantity>>| {
            list.and_then(|l| l.get("nvidia.com/gpu").cloned())
        };
        (get(resources.requests), get(resources.limits))
    }

    #[test]
    fn test_single_host_workload() {
        let svc = service(false, None);
        let lws = build_workload(&svc, &[flavored_model()]).unwrap();

        assert_eq!(lws.name_any(), "llama3");
        assert_eq!(lws.namespace().as_deref(), Some("default"));
        assert_eq!(lws.spec.replicas, Some(2));
        assert_eq!(lws.spec.startup_policy.as_deref(), Some("LeaderReady"));

        let template = &lws.spec.leader_worker_template;
        assert_eq!(template.size, Some(1));
        let worker = &template.worker_template;
        assert_eq!(init_containers(worker).len(), 1);
        assert_eq!(volumes(worker).len(), 1);

        let labels = labels_of(worker);
        assert_eq!(labels[labels::MODEL_NAME], "llama3-8b");
        assert_eq!(labels[labels::MODEL_FAMILY_NAME], "llama3");

        // first flavor by default
        let one = Some(Quantity("1".to_string()));
        assert_eq!(gpu_of(worker), (one.clone(), one));
    }

    #[test]
    fn test_multi_host_workload() {
        let svc = service(true, Some(vec!["a100".to_string(), "a10".to_string()]));
        let lws = build_workload(&svc, &[flavored_model()]).unwrap();
        let template = &lws.spec.leader_worker_template;
        let leader = template.leader_template.as_ref().unwrap();
        let worker = &template.worker_template;

        assert_eq!(template.size, Some(2));
        assert_eq!(init_containers(leader).len(), 1);
        assert_eq!(init_containers(worker).len(), 1);

        // model labels go on the leader only
        assert_eq!(labels_of(leader)[labels::MODEL_NAME], "llama3-8b");
        assert!(labels_of(worker).is_empty());
        let annos = leader.metadata.as_ref().unwrap().annotations.clone().unwrap();
        assert_eq!(annos[annotations::INFERENCE_SERVICE_FLAVORS], "a100,a10");

        let two = Some(Quantity("2".to_string()));
        assert_eq!(gpu_of(worker), (two.clone(), two.clone()));
        assert_eq!(gpu_of(leader), (two.clone(), two));
    }

    #[test]
    fn test_skip_model_loader() {
        let mut svc = service(false, None);
        svc.metadata.annotations = Some(
            [(annotations::SKIP_MODEL_LOADER.to_string(), "true".to_string())].into(),
        );
        let lws = build_workload(&svc, &[flavored_model()]).unwrap();
        let worker = &lws.spec.leader_worker_template.worker_template;
        assert!(init_containers(worker).is_empty());
        assert!(volumes(worker).is_empty());
        let runner = &worker.spec.as_ref().unwrap().containers[0];
        assert!(env_names(runner).contains(&"HF_TOKEN"));
    }

    #[test]
    fn test_draft_model_gets_second_loader() {
        let mut svc = service(false, None);
        svc.spec.model_claims.models.push(ModelRef::new("opt-125m", ModelRole::Draft));
        let models = [flavored_model(), hub_model("opt-125m", "facebook/opt-125m")];
        let lws = build_workload(&svc, &models).unwrap();
        let worker = &lws.spec.leader_worker_template.worker_template;
        let names: Vec<_> = init_containers(worker).iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["model-loader", "model-loader-1"]);
        assert_eq!(volumes(worker).len(), 1);
    }

    #[test]
    fn test_no_models() {
        let svc = service(false, None);
        assert!(matches!(
            build_workload(&svc, &[]),
            Err(ReconcileError::Invalid(_))
        ));
    }

    #[test]
    fn test_lb_service() {
        let lb = build_lb_service(&service(false, None));
        assert_eq!(lb.name_any(), "llama3-lb");
        assert_eq!(lb.annotations()[annotations::MODEL_ACTIVATOR], "llama3");
        let spec = lb.spec.unwrap();
        let selector = spec.selector.unwrap();
        assert_eq!(selector[labels::LWS_NAME], "llama3");
        assert_eq!(selector[labels::LWS_WORKER_INDEX], "0");
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    fn lws_with(available: bool) -> LeaderWorkerSet {
        let mut lws = LeaderWorkerSet::new("llama3", LeaderWorkerSetSpec::default());
        let mut status = LeaderWorkerSetStatus {
            replicas: 2,
            hpa_pod_selector: Some("leaderworkerset.sigs.k8s.io/name=llama3".to_string()),
            ..Default::default()
        };
        if available {
            status
                .conditions
                .push(new_condition(conditions::AVAILABLE, true, "AllGroupsReady", ""));
        }
        lws.status = Some(status);
        lws
    }

    #[test]
    fn test_service_condition() {
        let mut status = ServiceStatus::default();
        assert!(set_service_condition(&mut status, &lws_with(false)));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].reason, reasons::SERVICE_IN_PROGRESS);
        assert_eq!(status.replicas, 2);
        assert!(status.selector.is_some());
        assert!(!set_service_condition(&mut status, &lws_with(false)));

        assert!(set_service_condition(&mut status, &lws_with(true)));
        assert!(is_status_condition_true(&status.conditions, conditions::AVAILABLE));

        assert!(set_service_condition(&mut status, &lws_with(false)));
        let available = find_status_condition(&status.conditions, conditions::AVAILABLE).unwrap();
        assert_eq!(available.status, STATUS_FALSE);
        assert_eq!(available.reason, reasons::SERVICE_NOT_READY);
    }
}
