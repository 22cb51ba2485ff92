//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::{Condition, CONDITION_STATUS_TRUE};

/// Update or add a condition to the conditions list
///
/// If a condition with the same type exists and has different status/reason/message,
/// it will be updated with a new transition time. Otherwise, it will be added.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        // Update transition time only if status changed
        let should_update_time = existing.status != status;

        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();

        if should_update_time {
            existing.last_transition_time = now;
        }
    } else {
        // Add new condition
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        });
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Remove a condition by type
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}
