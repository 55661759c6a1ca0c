// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Lease based leader election.
//!
//! Only the holder of the `coordination.k8s.io/v1` Lease runs reconcilers. The holder renews
//! every [`RENEW_INTERVAL`]; if it can not renew before the lease expires it cancels the token
//! it was handed and the process winds down.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::PostParams;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::util;

pub const LEASE_NAME: &str = "llmaz-manager-leader";
pub const LEASE_DURATION: Duration = Duration::from_secs(15);
pub const RENEW_INTERVAL: Duration = Duration::from_secs(5);

pub struct LeaderElector {
    api: Api<Lease>,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity: identity.into(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Block until the lease is ours. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    tracing::info!(identity = %self.identity, lease = LEASE_NAME, "became leader");
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(lease = LEASE_NAME, "lease held by another replica")
                }
                Err(e) => {
                    tracing::warn!(lease = LEASE_NAME, error = %e, "failed to acquire lease")
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.renew_interval) => {}
            }
        }
    }

    /// Keep renewing in the background. Cancels `cancel` once the lease is lost.
    pub fn spawn_renewal(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.renew_interval);
            let mut last_renewed = tokio::time::Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }
                match self.try_acquire_or_renew().await {
                    Ok(true) => last_renewed = tokio::time::Instant::now(),
                    Ok(false) => {
                        tracing::error!(lease = LEASE_NAME, "leadership taken over, shutting down");
                        cancel.cancel();
                        return;
                    }
                    Err(e) if last_renewed.elapsed() >= self.lease_duration => {
                        tracing::error!(
                            lease = LEASE_NAME,
                            error = %e,
                            "lease expired, shutting down"
                        );
                        cancel.cancel();
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(lease = LEASE_NAME, error = %e, "failed to renew lease")
                    }
                }
            }
        })
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let now = Utc::now();
        let Some(mut lease) = self.api.get_opt(LEASE_NAME).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(LEASE_NAME.to_string()),
                    ..Default::default()
                },
                spec: Some(claim(None, &self.identity, self.lease_duration, now)),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(e) if util::is_conflict(&e) => Ok(false),
                Err(e) => Err(e),
            };
        };

        if !can_take(lease.spec.as_ref(), &self.identity, now) {
            return Ok(false);
        }
        let spec = claim(lease.spec.as_ref(), &self.identity, self.lease_duration, now);
        lease.spec = Some(spec);
        // the resource version guards against a concurrent taker
        match self.api.replace(LEASE_NAME, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if util::is_conflict(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// True if `identity` already holds the lease or the current holder let it expire.
fn can_take(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    match spec.holder_identity.as_deref() {
        None | Some("") => true,
        Some(holder) if holder == identity => true,
        Some(_) => {
            let seconds = spec.lease_duration_seconds.unwrap_or(0);
            let duration = chrono::Duration::seconds(seconds.into());
            spec.renew_time
                .as_ref()
                .or(spec.acquire_time.as_ref())
                .is_none_or(|MicroTime(at)| *at + duration < now)
        }
    }
}

fn claim(
    previous: Option<&LeaseSpec>,
    identity: &str,
    duration: Duration,
    now: DateTime<Utc>,
) -> LeaseSpec {
    let held = previous.and_then(|s| s.holder_identity.as_deref()) == Some(identity);
    let transitions = previous.and_then(|s| s.lease_transitions).unwrap_or(0);
    LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(duration.as_secs() as i32),
        acquire_time: if held {
            previous.and_then(|s| s.acquire_time.clone())
        } else {
            Some(MicroTime(now))
        },
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(if held || previous.is_none() {
            transitions
        } else {
            transitions + 1
        }),
        ..Default::default()
    }
}
