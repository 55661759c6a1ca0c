// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! A [Worker] drives a process' main future on a [Runtime], wiring SIGINT/SIGTERM to a graceful
//! runtime shutdown.
//!
//! ```no_run
//! use llmaz_runtime::{Runtime, Worker};
//!
//! fn main() -> anyhow::Result<()> {
//!     let worker = Worker::from_settings()?;
//!     worker.execute(app)
//! }
//!
//! async fn app(runtime: Runtime) -> anyhow::Result<()> {
//!     runtime.child_token().cancelled().await;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use anyhow::Result;

use crate::config::{RuntimeConfig, WorkerConfig};
use crate::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct Worker {
    runtime: Runtime,
    config: WorkerConfig,
}

impl Worker {
    /// Create a [Worker] from [`RuntimeConfig::from_settings`] and [`WorkerConfig::from_settings`]
    pub fn from_settings() -> Result<Worker> {
        let config = RuntimeConfig::from_settings()?;
        Worker::from_config(config)
    }

    pub fn from_config(config: RuntimeConfig) -> Result<Worker> {
        tracing::debug!("Runtime config: {config}");
        Ok(Worker {
            runtime: Runtime::from_config(&config)?,
            config: WorkerConfig::from_settings()?,
        })
    }

    /// Wrap an already running runtime; used by tests and embedders
    pub fn from_current() -> Result<Worker> {
        Ok(Worker {
            runtime: Runtime::from_current()?,
            config: WorkerConfig::from_settings()?,
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Block the calling thread until `f` completes and the runtime has shut down
    pub fn execute<F, Fut>(self, f: F) -> Result<()>
    where
        F: FnOnce(Runtime) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = self.runtime.primary();
        handle.block_on(self.execute_async(f))
    }

    pub async fn execute_async<F, Fut>(self, f: F) -> Result<()>
    where
        F: FnOnce(Runtime) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let runtime = self.runtime.clone();
        let primary = runtime.primary_token();

        let signal_runtime = runtime.clone();
        let signal_token = primary.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = wait_for_signal() => {
                    match result {
                        Ok(()) => tracing::info!("Received shutdown signal"),
                        Err(e) => tracing::error!("Failed to install signal handler: {e}"),
                    }
                    signal_runtime.shutdown();
                }
                _ = signal_token.cancelled() => {}
            }
        });

        let app = tokio::spawn(f(runtime.clone()));
        let result = match app.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("application task panicked: {e}")),
        };
        if let Err(e) = &result {
            tracing::error!("Application exited with error: {e:#}");
        }

        runtime.shutdown();
        let timeout = Duration::from_secs(self.config.graceful_shutdown_timeout);
        if tokio::time::timeout(timeout, primary.cancelled())
            .await
            .is_err()
        {
            tracing::warn!(
                "Graceful shutdown did not complete within {}s",
                self.config.graceful_shutdown_timeout
            );
        }

        result
    }
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_async_returns_app_result() {
        let worker = Worker::from_current().unwrap();
        let token = worker.runtime().primary_token();
        let result = worker
            .execute_async(|_runtime| async { anyhow::bail!("boom") })
            .await;
        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_async_app_observes_child_token() {
        let worker = Worker::from_current().unwrap();
        let result = worker
            .execute_async(|runtime| async move {
                let child = runtime.child_token();
                runtime.shutdown();
                child.cancelled().await;
                Ok(())
            })
            .await;
        assert!(result.is_ok());
    }
}
