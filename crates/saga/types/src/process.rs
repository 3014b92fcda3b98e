//! Process definitions: higher-level compositions of typed steps
//!
//! A process strings together sub-workflows, rule checks, policy checks,
//! and custom steps. Execution is strictly ordered and stops at the first
//! failing step.

use crate::StepResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registered process: an id plus its ordered steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessDefinition {
    pub process_id: String,
    pub steps: Vec<ProcessStep>,
}

impl ProcessDefinition {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: ProcessStep) -> Self {
        self.steps.push(step);
        self
    }
}

/// One typed step of a process definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessStep {
    #[serde(rename = "type")]
    pub step_type: ProcessStepType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

impl ProcessStep {
    /// A step that starts a sub-workflow. `name` is the workflow type unless
    /// `parameters.workflow_type` overrides it.
    pub fn workflow(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            step_type: ProcessStepType::Workflow,
            name: name.into(),
            parameters,
        }
    }

    /// A step that evaluates a named business rule.
    pub fn rule_check(name: impl Into<String>) -> Self {
        Self {
            step_type: ProcessStepType::RuleCheck,
            name: name.into(),
            parameters: Value::Null,
        }
    }

    /// A step that evaluates a named policy.
    pub fn policy_check(name: impl Into<String>) -> Self {
        Self {
            step_type: ProcessStepType::PolicyCheck,
            name: name.into(),
            parameters: Value::Null,
        }
    }

    /// A step dispatched to a registered custom handler.
    pub fn custom(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            step_type: ProcessStepType::Custom,
            name: name.into(),
            parameters,
        }
    }
}

/// The kind of a process step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStepType {
    Workflow,
    RuleCheck,
    PolicyCheck,
    Custom,
}

/// Terminal status of one process execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Completed,
    Failed,
}

/// The record of one process execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessResult {
    pub process_id: String,
    pub status: ProcessStatus,
    /// Steps attempted, including the failing one
    pub steps_completed: usize,
    pub total_steps: usize,
    pub results: Vec<StepResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_builder() {
        let def = ProcessDefinition::new("tenant_setup")
            .with_step(ProcessStep::rule_check("tenant_quota"))
            .with_step(ProcessStep::workflow(
                "customer_onboarding",
                json!({"plan": "standard"}),
            ));

        assert_eq!(def.process_id, "tenant_setup");
        assert_eq!(def.steps.len(), 2);
        assert_eq!(def.steps[0].step_type, ProcessStepType::RuleCheck);
        assert_eq!(def.steps[1].step_type, ProcessStepType::Workflow);
    }

    #[test]
    fn test_step_type_serialization() {
        let step = ProcessStep::policy_check("spend_limit");
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "policy_check");
        assert_eq!(v["name"], "spend_limit");
        assert!(v.get("parameters").is_none());
    }

    #[test]
    fn test_definition_round_trip() {
        let def = ProcessDefinition::new("p")
            .with_step(ProcessStep::custom("notify_ops", json!({"channel": "#ops"})));
        let text = serde_json::to_string(&def).unwrap();
        let back: ProcessDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(back.steps[0].name, "notify_ops");
        assert_eq!(back.steps[0].parameters["channel"], "#ops");
    }
}
