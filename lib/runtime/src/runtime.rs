// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [Runtime] owns the Tokio thread pool and the root of the cancellation tree.
//!
//! Every long-running task of a process (reconcilers, the aggregator ticker, activator accept
//! loops, HTTP servers) hangs off a token handed out by the [Runtime]. Shutdown happens in two
//! phases: the task token is cancelled first so loops stop picking up new work, then, once all
//! tracked tasks have drained, the primary token is cancelled.

use super::utils::GracefulShutdownTracker;
use crate::config::{self, RuntimeConfig};

use std::sync::Arc;

pub use tokio_util::sync::CancellationToken;

/// Types of Tokio runtimes that can be used to construct a [Runtime].
#[derive(Clone, Debug)]
enum RuntimeType {
    Shared(Arc<tokio::runtime::Runtime>),
    External(tokio::runtime::Handle),
}

/// Local [Runtime] which provides access to shared resources local to the process.
#[derive(Debug, Clone)]
pub struct Runtime {
    id: Arc<String>,
    primary: RuntimeType,
    cancellation_token: CancellationToken,
    task_shutdown_token: CancellationToken,
    graceful_shutdown_tracker: Arc<GracefulShutdownTracker>,
}

impl Runtime {
    fn new(runtime: RuntimeType) -> Runtime {
        let id = Arc::new(uuid::Uuid::new_v4().to_string());
        let cancellation_token = CancellationToken::new();
        let task_shutdown_token = cancellation_token.child_token();

        Runtime {
            id,
            primary: runtime,
            cancellation_token,
            task_shutdown_token,
            graceful_shutdown_tracker: Arc::new(GracefulShutdownTracker::new()),
        }
    }

    pub fn from_current() -> anyhow::Result<Runtime> {
        Runtime::from_handle(tokio::runtime::Handle::current())
    }

    pub fn from_handle(handle: tokio::runtime::Handle) -> anyhow::Result<Runtime> {
        Ok(Runtime::new(RuntimeType::External(handle)))
    }

    /// Create a [`Runtime`] instance from the settings
    /// See [`config::RuntimeConfig::from_settings`]
    pub fn from_settings() -> anyhow::Result<Runtime> {
        let config = config::RuntimeConfig::from_settings()?;
        Runtime::from_config(&config)
    }

    pub fn from_config(config: &RuntimeConfig) -> anyhow::Result<Runtime> {
        let runtime = Arc::new(config.create_runtime()?);
        Ok(Runtime::new(RuntimeType::Shared(runtime)))
    }

    /// Create a [`Runtime`] with a single-threaded async tokio runtime
    pub fn single_threaded() -> anyhow::Result<Runtime> {
        let config = config::RuntimeConfig::single_threaded();
        Runtime::from_config(&config)
    }

    /// Returns the unique identifier for the [`Runtime`]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns a [`tokio::runtime::Handle`] for the primary thread pool
    pub fn primary(&self) -> tokio::runtime::Handle {
        self.primary.handle()
    }

    /// Access the primary [`CancellationToken`] for the [`Runtime`]
    pub fn primary_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Creates a child [`CancellationToken`] that fires in the first shutdown phase.
    pub fn child_token(&self) -> CancellationToken {
        self.task_shutdown_token.child_token()
    }

    /// Tracker used by tasks that must finish their current unit of work before exit
    pub fn graceful_shutdown_tracker(&self) -> Arc<GracefulShutdownTracker> {
        self.graceful_shutdown_tracker.clone()
    }

    /// Shuts down the [`Runtime`] instance
    pub fn shutdown(&self) {
        tracing::info!("Runtime shutdown initiated");

        let tracker = self.graceful_shutdown_tracker.clone();
        let main_token = self.cancellation_token.clone();
        let task_token = self.task_shutdown_token.clone();

        self.primary().spawn(async move {
            tracing::info!("Phase 1: Cancelling task shutdown token");
            task_token.cancel();

            let count = tracker.get_count();
            tracing::info!("Phase 2: Waiting for {} tracked tasks to complete", count);
            if count != 0 {
                tracker.wait_for_completion().await;
            }

            tracing::info!("Phase 3: All tracked tasks ended, cancelling primary token");
            main_token.cancel();
        });
    }
}

impl RuntimeType {
    /// Get [`tokio::runtime::Handle`] to runtime
    pub fn handle(&self) -> tokio::runtime::Handle {
        match self {
            RuntimeType::External(rt) => rt.clone(),
            RuntimeType::Shared(rt) => rt.handle().clone(),
        }
    }
}
