//! Structural checks on a workflow definition, applied before scheduling
//! and again before execution.
//!
//! Rules enforced:
//! 1. Every action names an action type.
//! 2. Output variable names are identifiers, so `{{name}}` can reach them.
//! 3. Schedule triggers carry a standard five-field cron expression whose
//!    fields are in range.
//! 4. The trigger type is one the engine supports.

use std::sync::LazyLock;

use regex::Regex;

use crate::{
    models::{Action, Trigger, Workflow},
    EngineError,
};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Validate trigger and actions.
///
/// # Errors
/// - [`EngineError::UnsupportedTrigger`] for an unknown trigger type.
/// - [`EngineError::InvalidCron`] for a bad schedule.
/// - [`EngineError::InvalidAction`] for the first malformed action.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), EngineError> {
    validate_trigger(&workflow.trigger)?;
    validate_actions(&workflow.actions)
}

pub fn validate_trigger(trigger: &Trigger) -> Result<(), EngineError> {
    match trigger {
        Trigger::Schedule { cron } => validate_cron(cron).map(|_| ()),
        Trigger::Manual | Trigger::Webhook { .. } => Ok(()),
        Trigger::Unsupported => Err(EngineError::UnsupportedTrigger),
    }
}

pub fn validate_actions(actions: &[Action]) -> Result<(), EngineError> {
    for (step, action) in actions.iter().enumerate() {
        if action.action_type.trim().is_empty() {
            return Err(EngineError::InvalidAction {
                step,
                reason: "action type is empty".into(),
            });
        }
        if let Some(name) = &action.output_variable {
            if !IDENTIFIER.is_match(name) {
                return Err(EngineError::InvalidAction {
                    step,
                    reason: format!("output variable '{name}' is not a valid identifier"),
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const FIELDS: [FieldSpec; 5] = [
    FieldSpec { name: "minute", min: 0, max: 59, names: &[] },
    FieldSpec { name: "hour", min: 0, max: 23, names: &[] },
    FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] },
    FieldSpec {
        name: "month",
        min: 1,
        max: 12,
        names: &["JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC"],
    },
    FieldSpec {
        name: "day-of-week",
        min: 0,
        max: 7,
        names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
    },
];

/// Check a five-field cron expression and return it in the six-field
/// (seconds-first) form the scheduler consumes, firing at second 0.
pub fn validate_cron(expr: &str) -> Result<String, EngineError> {
    let invalid = |reason: String| EngineError::InvalidCron {
        expr: expr.to_owned(),
        reason,
    };

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != FIELDS.len() {
        return Err(invalid(format!(
            "expected 5 fields (minute hour day-of-month month day-of-week), found {}",
            fields.len()
        )));
    }

    for (field, spec) in fields.iter().zip(FIELDS.iter()) {
        validate_field(field, spec).map_err(invalid)?;
    }

    Ok(format!("0 {}", fields.join(" ")))
}

fn validate_field(field: &str, spec: &FieldSpec) -> Result<(), String> {
    for part in field.split(',') {
        let (base, step) = match part.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (part, None),
        };

        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if n > 0 => {}
                _ => return Err(format!("invalid step '{step}' in {} field", spec.name)),
            }
        }

        if base == "*" {
            continue;
        }

        let (start, end) = match base.split_once('-') {
            Some((start, end)) => (start, Some(end)),
            None => (base, None),
        };

        let start = parse_value(start, spec)?;
        if let Some(end) = end {
            let end = parse_value(end, spec)?;
            if end < start {
                return Err(format!("range {base} runs backwards in {} field", spec.name));
            }
        }
    }
    Ok(())
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let upper = raw.to_ascii_uppercase();
    if let Some(pos) = spec.names.iter().position(|n| *n == upper) {
        // Month names are 1-based, weekday names 0-based.
        let offset = u32::try_from(pos).unwrap_or(0);
        return Ok(offset + spec.min);
    }

    let value: u32 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not valid in {} field", spec.name))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{value} is out of range {}-{} in {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn common_cron_expressions_are_accepted() {
        for expr in [
            "0 9 * * *",
            "*/15 * * * *",
            "0 9-17 * * MON-FRI",
            "30 8 1,15 * *",
            "0 0 1 JAN *",
            "5 4 * * 0",
            "5 4 * * 7",
        ] {
            assert!(validate_cron(expr).is_ok(), "{expr} should be valid");
        }
    }

    #[test]
    fn scheduler_form_prefixes_seconds() {
        assert_eq!(validate_cron("0 9 * * *").unwrap(), "0 0 9 * * *");
        assert_eq!(validate_cron("  */5   *  * * *  ").unwrap(), "0 */5 * * * *");
    }

    #[test]
    fn wrong_field_count_is_rejected() {
        assert!(matches!(
            validate_cron("0 0 9 * * *"),
            Err(EngineError::InvalidCron { reason, .. }) if reason.contains("found 6")
        ));
        assert!(validate_cron("").is_err());
    }

    #[test]
    fn out_of_range_and_garbage_fields_are_rejected() {
        for expr in ["60 * * * *", "* 24 * * *", "* * 0 * *", "* * * 13 *", "* * * * 8", "a b c d e", "*/0 * * * *", "5-1 * * * *"] {
            assert!(validate_cron(expr).is_err(), "{expr} should be invalid");
        }
    }

    #[test]
    fn unsupported_trigger_is_rejected() {
        assert!(matches!(
            validate_trigger(&Trigger::Unsupported),
            Err(EngineError::UnsupportedTrigger)
        ));
    }

    #[test]
    fn malformed_actions_are_reported_with_their_step() {
        let actions = vec![
            Action::new("log", json!({})),
            Action::new("log", json!({})).output_to("not valid"),
        ];
        assert!(matches!(
            validate_actions(&actions),
            Err(EngineError::InvalidAction { step: 1, .. })
        ));

        let workflow = Workflow::new(
            "empty-type",
            Uuid::new_v4(),
            Trigger::Manual,
            vec![Action::new("  ", json!({}))],
        );
        assert!(matches!(
            validate_workflow(&workflow),
            Err(EngineError::InvalidAction { step: 0, .. })
        ));
    }
}
