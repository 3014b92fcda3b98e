//! Error types for the saga engine
//!
//! These are caller-facing contract violations and gate rejections. Step
//! failures are never surfaced here — they are captured as `StepResult`
//! data inside the instance.

use crate::{WorkflowId, WorkflowStatus};

/// Errors surfaced to callers of the process engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workflow type not registered: {0}")]
    WorkflowTypeNotRegistered(String),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Workflow id already in use: {0}")]
    DuplicateWorkflowId(WorkflowId),

    #[error("Already registered: {0}")]
    DuplicateRegistration(String),

    #[error("Workflow {id} is not waiting for approval (status: {status})")]
    NotWaitingApproval { id: WorkflowId, status: WorkflowStatus },

    #[error("Workflow {id} already reached a terminal status ({status})")]
    AlreadyTerminal { id: WorkflowId, status: WorkflowStatus },

    #[error("Business rules rejected workflow '{workflow_type}': {}", errors.join("; "))]
    RulesRejected {
        workflow_type: String,
        errors: Vec<String>,
    },

    #[error("Policy denied workflow '{workflow_type}': {reason}")]
    PolicyDenied {
        workflow_type: String,
        reason: String,
    },
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::RulesRejected {
            workflow_type: "customer_onboarding".into(),
            errors: vec!["missing email".into(), "unknown plan".into()],
        };
        let text = err.to_string();
        assert!(text.contains("customer_onboarding"));
        assert!(text.contains("missing email; unknown plan"));

        let err = EngineError::NotWaitingApproval {
            id: WorkflowId::new("wf-1"),
            status: WorkflowStatus::Running,
        };
        assert!(err.to_string().contains("running"));
    }
}
