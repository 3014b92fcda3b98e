//! Step results: the uniform outcome of one workflow step
//!
//! Every forward or compensating handler produces a StepResult. Failure is
//! captured here as data (`success = false` + `error`) rather than being
//! propagated as an error past the instance boundary. An approval gate is a
//! *success* with `requires_approval = true` — it halts forward progress but
//! must never trigger rollback.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a single workflow step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResult {
    /// Name of the step that produced this result
    pub step_name: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Human-readable description; carries `[APPROVED]`/`[REJECTED]` tags
    /// appended when a paused step is resumed or rejected
    pub message: String,
    /// Error description, present iff `success == false`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step-specific payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    /// Whether this step halted the workflow pending an external decision
    #[serde(default)]
    pub requires_approval: bool,
    /// Data supporting the approval decision, present iff `requires_approval`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_data: Option<Value>,
}

impl StepResult {
    /// A successful step outcome.
    pub fn ok(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            success: true,
            message: message.into(),
            error: None,
            data: Value::Null,
            requires_approval: false,
            approval_data: None,
        }
    }

    /// A failed step outcome. The error text doubles as the message.
    pub fn failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            step_name: step_name.into(),
            success: false,
            message: error.clone(),
            error: Some(error),
            data: Value::Null,
            requires_approval: false,
            approval_data: None,
        }
    }

    /// A successful outcome that pauses the workflow for approval.
    ///
    /// Distinct from failure: later steps are not attempted, but nothing
    /// is rolled back.
    pub fn needs_approval(
        step_name: impl Into<String>,
        message: impl Into<String>,
        approval_data: Value,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            success: true,
            message: message.into(),
            error: None,
            data: Value::Null,
            requires_approval: true,
            approval_data: Some(approval_data),
        }
    }

    /// Attach a step-specific payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ok_result() {
        let r = StepResult::ok("create_account", "account created");
        assert!(r.success);
        assert!(r.error.is_none());
        assert!(!r.requires_approval);
    }

    #[test]
    fn test_failed_result_carries_error() {
        let r = StepResult::failed("setup_billing", "billing service unavailable");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("billing service unavailable"));
        assert_eq!(r.message, "billing service unavailable");
    }

    #[test]
    fn test_approval_result_is_success() {
        let r = StepResult::needs_approval(
            "setup_billing",
            "monthly value exceeds threshold",
            json!({"monthly_value": 1500.0, "approval_threshold": 1000.0}),
        );
        assert!(r.success);
        assert!(r.requires_approval);
        assert!(r.approval_data.is_some());
    }

    #[test]
    fn test_with_data() {
        let r = StepResult::ok("validate_data", "valid").with_data(json!({"email": "a@b.c"}));
        assert_eq!(r.data["email"], "a@b.c");
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let r = StepResult::ok("step", "done");
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("error").is_none());
        assert!(v.get("data").is_none());
        assert!(v.get("approval_data").is_none());
    }
}
