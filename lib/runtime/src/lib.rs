// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process runtime shared by the llmaz control-plane binaries.
//!
//! Everything a long-running controller or router process needs before it can do
//! useful work lives here: layered configuration, logging, the cancellation tree,
//! a keyed work queue for reconcilers and the health/metrics HTTP server.

pub use anyhow::{
    Context as ErrorContext, Error, Ok as OK, Result, anyhow as error, bail as raise,
};

pub mod config;
pub use config::RuntimeConfig;

pub mod logging;
pub mod metrics;
pub mod runtime;
pub mod system_health;
pub mod system_status_server;
pub mod utils;
pub mod worker;
pub mod workqueue;

pub use runtime::Runtime;
pub use system_health::SystemHealth;
pub use system_status_server::SystemStatusServerInfo;
pub use tokio_util::sync::CancellationToken;
pub use worker::Worker;
pub use workqueue::WorkQueue;
