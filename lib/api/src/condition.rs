// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `metav1.Condition` helpers with apimachinery semantics: `lastTransitionTime` only moves when
//! the status flips.

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const STATUS_TRUE: &str = "True";
pub const STATUS_FALSE: &str = "False";

pub fn new_condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { STATUS_TRUE } else { STATUS_FALSE }.to_string(),
        reason: reason.to_string(),
        message: message.into(),
        last_transition_time: Time(Utc::now()),
        observed_generation: None,
    }
}

/// Insert or update `new` by type. Returns whether the list changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == new.type_) else {
        conditions.push(new);
        return true;
    };

    let mut changed = false;
    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = new.last_transition_time;
        changed = true;
    }
    if existing.reason != new.reason {
        existing.reason = new.reason;
        changed = true;
    }
    if existing.message != new.message {
        existing.message = new.message;
        changed = true;
    }
    if existing.observed_generation != new.observed_generation {
        existing.observed_generation = new.observed_generation;
        changed = true;
    }
    changed
}

pub fn find_status_condition<'a>(
    conditions: &'a [Condition],
    type_: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_status_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_status_condition(conditions, type_).is_some_and(|c| c.status == STATUS_TRUE)
}

/// Returns whether a condition was removed
pub fn remove_status_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_transition_time_moves_only_on_flip() {
        let mut conditions = Vec::new();
        let mut first = new_condition("Available", false, "Pending", "");
        first.last_transition_time = Time(Utc::now() - Duration::minutes(5));
        let original_time = first.last_transition_time.clone();
        assert!(set_status_condition(&mut conditions, first));

        // same status, new reason: time kept
        assert!(set_status_condition(
            &mut conditions,
            new_condition("Available", false, "PlaygroundNotReady", "waiting")
        ));
        assert_eq!(conditions[0].last_transition_time, original_time);
        assert_eq!(conditions[0].reason, "PlaygroundNotReady");

        // identical update: no change
        let mut same = conditions[0].clone();
        same.last_transition_time = Time(Utc::now());
        assert!(!set_status_condition(&mut conditions, same));
        assert_eq!(conditions[0].last_transition_time, original_time);

        // flip: time moves
        assert!(set_status_condition(
            &mut conditions,
            new_condition("Available", true, "PlaygroundReady", "ready")
        ));
        assert_ne!(conditions[0].last_transition_time, original_time);
        assert!(is_status_condition_true(&conditions, "Available"));
    }

    #[test]
    fn test_find_and_remove() {
        let mut conditions = vec![
            new_condition("Progressing", true, "Pending", ""),
            new_condition("Available", false, "Pending", ""),
        ];
        assert!(find_status_condition(&conditions, "Progressing").is_some());
        assert!(!is_status_condition_true(&conditions, "Available"));
        assert!(remove_status_condition(&mut conditions, "Progressing"));
        assert!(!remove_status_condition(&mut conditions, "Progressing"));
        assert_eq!(conditions.len(), 1);
    }
}
