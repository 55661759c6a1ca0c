// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Environment variable name constants for centralized management across the codebase
//!
//! Environment variables are organized by functional area:
//! - **Logging**: log level, configuration file and output format
//! - **Runtime**: Tokio runtime settings
//! - **Worker**: process lifecycle and shutdown
//! - **Manager**: controller-manager settings
//! - **Router**: smart-router settings
//! - **Model loader**: the init container injected into inference pods

/// Logging and tracing environment variables
pub mod logging {
    /// Log filter directives (e.g., "debug", "llmaz_router=trace")
    pub const LLMAZ_LOG: &str = "LLMAZ_LOG";

    /// Path to logging configuration file
    pub const LLMAZ_LOGGING_CONFIG_PATH: &str = "LLMAZ_LOGGING_CONFIG_PATH";

    /// Enable JSONL logging format
    pub const LLMAZ_LOGGING_JSONL: &str = "LLMAZ_LOGGING_JSONL";

    /// Disable ANSI terminal colors in logs
    pub const LLMAZ_DISABLE_ANSI_LOGGING: &str = "LLMAZ_DISABLE_ANSI_LOGGING";

    /// Use local timezone for logging timestamps (default is UTC)
    pub const LLMAZ_LOG_USE_LOCAL_TZ: &str = "LLMAZ_LOG_USE_LOCAL_TZ";
}

/// Runtime configuration environment variables
pub mod runtime {
    /// Number of async worker threads for Tokio runtime
    pub const LLMAZ_RUNTIME_NUM_WORKER_THREADS: &str = "LLMAZ_RUNTIME_NUM_WORKER_THREADS";

    /// Maximum number of blocking threads for Tokio runtime
    pub const LLMAZ_RUNTIME_MAX_BLOCKING_THREADS: &str = "LLMAZ_RUNTIME_MAX_BLOCKING_THREADS";
}

/// Worker lifecycle environment variables
pub mod worker {
    /// Prefix for every worker setting read through figment
    pub const PREFIX: &str = "LLMAZ_WORKER_";

    /// Graceful shutdown timeout in seconds
    pub const LLMAZ_WORKER_GRACEFUL_SHUTDOWN_TIMEOUT: &str =
        "LLMAZ_WORKER_GRACEFUL_SHUTDOWN_TIMEOUT";
}

/// Controller-manager environment variables
pub mod manager {
    /// Prefix for every manager setting read through figment
    pub const PREFIX: &str = "LLMAZ_MANAGER_";

    /// Pod IP of the manager, used by the activator as the interception address
    pub const POD_IP: &str = "POD_IP";
}

/// Router environment variables
pub mod router {
    /// Prefix for every router setting read through figment
    pub const PREFIX: &str = "LLMAZ_ROUTER_";
}

/// Model loader environment variables
pub mod model_loader {
    /// Container image used for the model-loader init container
    pub const MODEL_LOADER_IMAGE: &str = "MODEL_LOADER_IMAGE";
}
