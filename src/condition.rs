//! Conditional predicates for jobs (if:)
//!
//! Minimal expression grammar, evaluated once every needs: entry is terminal:
//! - `success()`  - every dependency succeeded (the default when if: is absent)
//! - `failure()`  - at least one dependency failed
//! - `always()`   - run regardless of dependency outcomes
//! - `true` / `false` literals
//! - `env.NAME == 'value'` / `env.NAME != 'value'`

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

/// Pattern for env.NAME == 'value' comparisons
static ENV_CMP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^env\.([A-Za-z_][A-Za-z0-9_]*)\s*(==|!=)\s*'([^']*)'$").unwrap()
});

/// Outcomes of a job's dependencies, as seen by the scheduler
#[derive(Debug, Clone, Copy, Default)]
pub struct DepsOutcome {
    /// Every dependency is satisfied (Succeeded, or Failed with
    /// continue-on-error)
    pub all_satisfied: bool,
    /// At least one dependency failed hard
    pub any_failed: bool,
}

impl DepsOutcome {
    /// Outcome for a job with no dependencies
    pub fn root() -> Self {
        Self {
            all_satisfied: true,
            any_failed: false,
        }
    }
}

/// A parsed if: expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Success,
    Failure,
    Always,
    Literal(bool),
    EnvCompare {
        name: String,
        value: String,
        negated: bool,
    },
}

impl Condition {
    /// Parse an if: expression, rejecting anything outside the grammar
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        let trimmed = expr.trim();

        match trimmed {
            "success()" => return Ok(Condition::Success),
            "failure()" => return Ok(Condition::Failure),
            "always()" => return Ok(Condition::Always),
            "true" => return Ok(Condition::Literal(true)),
            "false" => return Ok(Condition::Literal(false)),
            _ => {}
        }

        if let Some(caps) = ENV_CMP_PATTERN.captures(trimmed) {
            return Ok(Condition::EnvCompare {
                name: caps[1].to_string(),
                value: caps[3].to_string(),
                negated: &caps[2] == "!=",
            });
        }

        Err(EngineError::InvalidCondition {
            job_id: String::new(),
            expr: expr.to_string(),
        })
    }

    /// Evaluate against dependency outcomes and the effective environment
    pub fn evaluate(&self, deps: &DepsOutcome, env: &HashMap<String, String>) -> bool {
        match self {
            Condition::Success => deps.all_satisfied,
            Condition::Failure => deps.any_failed,
            Condition::Always => true,
            Condition::Literal(value) => *value,
            Condition::EnvCompare {
                name,
                value,
                negated,
            } => {
                let matches = env.get(name).map(|v| v == value).unwrap_or(false);
                matches != *negated
            }
        }
    }

    /// Jobs with always() run even when a dependency failed or was skipped
    pub fn runs_on_failure(&self) -> bool {
        matches!(self, Condition::Always | Condition::Failure)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Condition::Success
    }
}
