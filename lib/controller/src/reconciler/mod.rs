// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A small controller runtime: watches feed a deduplicating [`WorkQueue`] and a fixed pool of
//! workers reconciles one key at a time.
//!
//! [`WorkQueue`]: llmaz_runtime::WorkQueue

mod controller;

pub use controller::{Controller, ReconcileMetrics};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;

use crate::error::ReconcileError;

/// Identity of a watched object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn from_object<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// What to do with a key after a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    RequeueAfter(Duration),
}

#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Object: Resource<DynamicType = ()>
        + Clone
        + fmt::Debug
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    fn name(&self) -> &'static str;

    async fn reconcile(&self, obj: Arc<Self::Object>) -> Result<Action, ReconcileError>;

    /// The object is gone
    async fn cleanup(&self, _key: &ObjectKey) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// Keys of the `R`-kind controllers of `obj`
pub fn controller_keys<R, K>(obj: &K) -> Vec<ObjectKey>
where
    R: Resource<DynamicType = ()>,
    K: Resource,
{
    let kind = R::kind(&());
    let api_version = R::api_version(&());
    obj.owner_references()
        .iter()
        .filter(|o| o.controller == Some(true) && o.kind == kind && o.api_version == api_version)
        .map(|o| ObjectKey::new(obj.meta().namespace.as_deref(), &o.name))
        .collect()
}
