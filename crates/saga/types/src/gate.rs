//! Gate decisions as plain data
//!
//! The rules and policy gates are external collaborators; the engine only
//! sees their decisions.

use serde::{Deserialize, Serialize};

/// Decision returned by the rules gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RuleOutcome {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    pub fn violation(error: impl Into<String>) -> Self {
        Self::invalid(vec![error.into()])
    }
}

/// Decision returned by the policy gate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PolicyOutcome {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}
