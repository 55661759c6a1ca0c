// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Tracks tasks that must finish their in-flight work before the process exits
pub struct GracefulShutdownTracker {
    active_tasks: AtomicUsize,
    shutdown_complete: Notify,
}

impl std::fmt::Debug for GracefulShutdownTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GracefulShutdownTracker")
            .field("active_tasks", &self.active_tasks.load(Ordering::SeqCst))
            .finish()
    }
}

/// Unregisters its task when dropped
#[must_use = "the task is unregistered as soon as the guard is dropped"]
pub struct TaskGuard {
    tracker: Arc<GracefulShutdownTracker>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.tracker.unregister_task();
    }
}

impl GracefulShutdownTracker {
    pub(crate) fn new() -> Self {
        Self {
            active_tasks: AtomicUsize::new(0),
            shutdown_complete: Notify::new(),
        }
    }

    /// Register a task; the returned guard unregisters it on drop.
    pub fn register(self: &Arc<Self>) -> TaskGuard {
        let count = self.active_tasks.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Task registered, total active: {} -> {}", count, count + 1);
        TaskGuard {
            tracker: self.clone(),
        }
    }

    fn unregister_task(&self) {
        let prev = self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            "Task unregistered, remaining active: {} -> {}",
            prev,
            prev - 1
        );
        if prev == 1 {
            tracing::info!("Last tracked task completed, notifying all waiters");
            self.shutdown_complete.notify_waiters();
        }
    }

    /// Get the current count of active tasks
    pub fn get_count(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    pub async fn wait_for_completion(&self) {
        loop {
            // Create the waiter BEFORE checking the condition
            let notified = self.shutdown_complete.notified();

            let count = self.active_tasks.load(Ordering::SeqCst);
            if count == 0 {
                tracing::debug!("All tracked tasks completed");
                break;
            }

            tracing::debug!("Waiting for {} tasks to complete", count);
            notified.await;
        }
    }
}
