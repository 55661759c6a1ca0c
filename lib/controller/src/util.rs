// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;

use llmaz_api::quantity;

/// Field manager for every server-side apply the controller issues
pub const FIELD_MANAGER: &str = "llmaz-controller";

pub type ResourceList = BTreeMap<String, Quantity>;

/// `base` with `overrides` applied by name. Names keep their position in `base`; new names
/// from `overrides` are appended in their order.
pub fn merge_envs(base: &[EnvVar], overrides: &[EnvVar]) -> Vec<EnvVar> {
    let mut merged = base.to_vec();
    for env in overrides {
        match merged.iter_mut().find(|e| e.name == env.name) {
            Some(existing) => *existing = env.clone(),
            None => merged.push(env.clone()),
        }
    }
    merged
}

/// `preferred` plus every entry of `fallback` it does not set
pub fn merge_resources(
    preferred: Option<&ResourceList>,
    fallback: Option<&ResourceList>,
) -> ResourceList {
    let mut merged = preferred.cloned().unwrap_or_default();
    for (name, value) in fallback.into_iter().flatten() {
        merged.entry(name.clone()).or_insert_with(|| value.clone());
    }
    merged
}

/// Raise cpu and memory limits that are missing or below their request to the request
pub fn raise_limits_to_requests(limits: &mut ResourceList, requests: &ResourceList) {
    for name in ["cpu", "memory"] {
        let Some(request) = requests.get(name) else {
            continue;
        };
        let raise = match limits.get(name) {
            None => true,
            Some(limit) => matches!(
                quantity::compare(request, limit),
                Ok(std::cmp::Ordering::Greater)
            ),
        };
        if raise {
            limits.insert(name.to_string(), request.clone());
        }
    }
}

/// `base` with every entry of `overrides` written over it
pub fn merge_kvs(
    base: Option<BTreeMap<String, String>>,
    overrides: &BTreeMap<String, String>,
) -> Option<BTreeMap<String, String>> {
    if overrides.is_empty() {
        return base;
    }
    let mut merged = base.unwrap_or_default();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    Some(merged)
}

/// Create or update `obj` with a forced server-side apply
pub async fn apply<K>(api: &Api<K>, obj: &K) -> kube::Result<K>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let applied = api.patch(&obj.name_any(), &params, &Patch::Apply(obj)).await?;
    tracing::debug!(name = %obj.name_any(), namespace = ?obj.namespace(), "applied");
    Ok(applied)
}

/// Whether `owner` is the controller of `obj`
pub fn is_controlled_by<K: Resource, O: Resource>(obj: &K, owner: &O) -> bool {
    let Some(uid) = owner.meta().uid.as_deref() else {
        return false;
    };
    obj.owner_references()
        .iter()
        .any(|o| o.controller == Some(true) && o.uid == uid)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            value_from: None,
        }
    }

    fn resources(pairs: &[(&str, &str)]) -> ResourceList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn test_merge_envs_override_wins() {
        let merged = merge_envs(
            &[env("A", "1"), env("B", "2")],
            &[env("B", "20"), env("C", "30")],
        );
        assert_eq!(merged, [env("A", "1"), env("B", "20"), env("C", "30")]);
    }

    #[test]
    fn test_merge_resources_prefers_first() {
        let merged = merge_resources(
            Some(&resources(&[("cpu", "8")])),
            Some(&resources(&[("cpu", "4"), ("memory", "16Gi")])),
        );
        assert_eq!(merged, resources(&[("cpu", "8"), ("memory", "16Gi")]));
        assert!(merge_resources(None, None).is_empty());
    }

    #[test]
    fn test_raise_limits_to_requests() {
        let mut limits = resources(&[("cpu", "2"), ("memory", "32Gi"), ("nvidia.com/gpu", "1")]);
        let requests = resources(&[("cpu", "4"), ("memory", "16Gi"), ("nvidia.com/gpu", "2")]);
        raise_limits_to_requests(&mut limits, &requests);
        assert_eq!(
            limits,
            resources(&[("cpu", "4"), ("memory", "32Gi"), ("nvidia.com/gpu", "1")])
        );

        let mut empty = ResourceList::new();
        raise_limits_to_requests(&mut empty, &resources(&[("memory", "1Gi")]));
        assert_eq!(empty, resources(&[("memory", "1Gi")]));
    }

    #[test]
    fn test_merge_kvs() {
        let overrides: BTreeMap<_, _> = [("a".to_string(), "2".to_string())].into();
        let base: BTreeMap<_, _> = [
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "1".to_string()),
        ]
        .into();
        let merged = merge_kvs(Some(base), &overrides).unwrap();
        assert_eq!(merged["a"], "2");
        assert_eq!(merged["b"], "1");
        assert_eq!(merge_kvs(None, &BTreeMap::new()), None);
    }

    #[test]
    fn test_is_controlled_by() {
        use k8s_openapi::api::core::v1::ConfigMap;
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

        let mut owner = ConfigMap::default();
        let mut obj = ConfigMap::default();
        assert!(!is_controlled_by(&obj, &owner));

        owner.metadata.uid = Some("abc".to_string());
        obj.metadata.owner_references = Some(vec![OwnerReference {
            uid: "abc".to_string(),
            controller: Some(false),
            ..Default::default()
        }]);
        assert!(!is_controlled_by(&obj, &owner));

        obj.metadata.owner_references.as_mut().unwrap()[0].controller = Some(true);
        assert!(is_controlled_by(&obj, &owner));
    }
}
