// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The llmaz control loop.
//!
//! A [`Playground`](llmaz_api::Playground) is translated into an
//! [`InferenceService`](llmaz_api::InferenceService), which in turn becomes a
//! [`LeaderWorkerSet`](llmaz_api::LeaderWorkerSet) with model loading wired into its pod
//! templates. Each translation is a [`reconciler::Reconciler`] driven by a
//! [`reconciler::Controller`]. The [`activator`] parks idle Services behind local listeners and
//! wakes their workload on the first connection; [`webhook`] serves admission checks.

pub mod activator;
pub mod backend_runtime;
pub mod error;
pub mod leader;
pub mod model_source;
pub mod playground;
pub mod reconciler;
pub mod util;
pub mod webhook;
pub mod workload;

pub use activator::{ActivatorReconciler, PlaygroundScaler, PortManager};
pub use error::ReconcileError;
pub use leader::LeaderElector;
pub use playground::PlaygroundReconciler;
pub use reconciler::{Action, Controller, ObjectKey, Reconciler};
pub use workload::ServiceReconciler;
