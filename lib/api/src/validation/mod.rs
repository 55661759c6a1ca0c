// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Admission rules. Each kind has a `validate_create`, a `validate_update` (same rules minus the
//! name check) and, where the kind has one, a `default_*` mutation.

mod backend_runtime;
mod model;
mod playground;
mod service;

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use once_cell::sync::Lazy;
use regex::Regex;

pub use backend_runtime::validate_backend_runtime;
pub use model::{default_model, validate_model_create, validate_model_update};
pub use playground::{default_playground, validate_playground_create, validate_playground_update};
pub use service::{validate_service_create, validate_service_update};

use crate::quantity;

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(Vec<FieldError>);

impl std::error::Error for FieldErrors {}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", joined.join(", "))
    }
}

impl FieldErrors {
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn extend(&mut self, other: FieldErrors) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

const DNS1123_LABEL_MAX_LENGTH: usize = 63;

static DNS1123_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap_or_else(|_| unreachable!())
});

/// Messages for every way `value` fails to be an RFC 1123 label
pub fn is_dns1123_label(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_LABEL_MAX_LENGTH {
        errs.push(format!(
            "must be no more than {DNS1123_LABEL_MAX_LENGTH} characters"
        ));
    }
    if !DNS1123_LABEL.is_match(value) {
        errs.push(
            "a lowercase RFC 1123 label must consist of lower case alphanumeric characters or '-', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

fn validate_name(name: Option<&str>, errs: &mut FieldErrors) {
    let name = name.unwrap_or_default();
    for msg in is_dns1123_label(name) {
        errs.push("metadata.name", format!("Invalid value: {name:?}: {msg}"));
    }
}

/// Names of resources whose limit is below the request
fn limits_below_requests(
    limits: Option<&BTreeMap<String, Quantity>>,
    requests: Option<&BTreeMap<String, Quantity>>,
) -> Vec<(String, String)> {
    let (Some(limits), Some(requests)) = (limits, requests) else {
        return Vec::new();
    };
    let mut bad = Vec::new();
    for (name, limit) in limits {
        let Some(request) = requests.get(name) else {
            continue;
        };
        match quantity::compare(limit, request) {
            Ok(std::cmp::Ordering::Less) => bad.push((name.clone(), format!(
                "limit ({}) for {name} must be greater than or equal to request ({})",
                limit.0, request.0
            ))),
            Ok(_) => {}
            Err(e) => bad.push((name.clone(), e.to_string())),
        }
    }
    bad
}
