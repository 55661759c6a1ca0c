// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plugin contracts for the filter → score pipeline.

use std::fmt;

use crate::store::{DataStore, Indicator};

pub const MAX_SCORE: f64 = 100.0;
pub const MIN_SCORE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Success,
    /// The replica must not receive the request
    Unschedulable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: Code,
    pub reason: Option<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: Code::Success,
            reason: None,
        }
    }

    pub fn unschedulable(reason: impl Into<String>) -> Self {
        Self {
            code: Code::Unschedulable,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.reason) {
            (Code::Success, _) => f.write_str("success"),
            (Code::Unschedulable, Some(reason)) => write!(f, "unschedulable: {reason}"),
            (Code::Unschedulable, None) => f.write_str("unschedulable"),
        }
    }
}

/// A named pipeline stage. A plugin opts into a stage by returning itself from
/// [`Plugin::as_filter`] or [`Plugin::as_score`]; one plugin may serve both.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn as_filter(&self) -> Option<&dyn FilterPlugin> {
        None
    }

    fn as_score(&self) -> Option<&dyn ScorePlugin> {
        None
    }
}

pub trait FilterPlugin: Plugin {
    fn filter(&self, indicator: &Indicator) -> Status;
}

pub trait ScorePlugin: Plugin {
    /// Raw score in `[MIN_SCORE, MAX_SCORE]`; the dispatcher weights and clamps it
    fn score(&self, indicator: &Indicator, data: &DataStore) -> f64;

    fn weight(&self) -> f64;
}

/// Clamp a weighted score into the valid range
pub fn standardize(score: f64) -> f64 {
    if score.is_nan() {
        return MIN_SCORE;
    }
    score.clamp(MIN_SCORE, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(-5.0, 0.0)]
    #[case(42.0, 42.0)]
    #[case(250.0, 100.0)]
    #[case(f64::NAN, 0.0)]
    #[case(f64::INFINITY, 100.0)]
    fn test_standardize(#[case] raw: f64, #[case] expected: f64) {
        assert_eq!(standardize(raw), expected);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::success().to_string(), "success");
        assert_eq!(
            Status::unschedulable("queue full").to_string(),
            "unschedulable: queue full"
        );
        assert!(!Status::unschedulable("x").is_success());
    }

    proptest! {
        #[test]
        fn prop_standardize_bounds(raw in proptest::num::f64::ANY) {
            let s = standardize(raw);
            prop_assert!((MIN_SCORE..=MAX_SCORE).contains(&s));
        }
    }
}
