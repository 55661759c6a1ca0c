// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use llmaz_api::model::SourceError;

use crate::activator::ActivatorError;
use crate::backend_runtime::ParserError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Activator(#[from] ActivatorError),

    #[error("invalid source of model {model}: {source}")]
    ModelSource {
        model: String,
        #[source]
        source: SourceError,
    },

    #[error("{kind} has no {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl ReconcileError {
    pub fn missing(kind: &'static str, field: &'static str) -> Self {
        ReconcileError::MissingField { kind, field }
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;
