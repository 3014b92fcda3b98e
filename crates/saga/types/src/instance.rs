//! Workflow instances: one saga execution
//!
//! A WorkflowInstance owns the ordered step list (fixed at construction),
//! the append-only result list, and the caller-supplied business context.
//! Its status moves monotonically:
//!
//! ```text
//! Pending → Running → {Completed | Failed | WaitingApproval | Cancelled}
//! WaitingApproval → Running → {Completed | Failed}
//! WaitingApproval → Cancelled
//! ```
//!
//! The paused state is self-contained data: the gating step's result (with
//! `requires_approval = true`) is the last entry in `results`, so resuming
//! is a plain call that picks up at `results.len()`.

use crate::{StepResult, TenantId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied key/value context, read/write to step handlers.
pub type BusinessContext = serde_json::Map<String, Value>;

/// The lifecycle status of a workflow instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Constructed but no step attempted yet
    #[default]
    Pending,
    /// Actively executing steps
    Running,
    /// Halted at an approval gate, pending an external decision
    WaitingApproval,
    /// All steps succeeded
    Completed,
    /// A step failed (covers both plain failure and failure after
    /// compensation ran — see `WorkflowInstance::compensations`)
    Failed,
    /// Cancelled by the caller or rejected at an approval gate
    Cancelled,
}

impl WorkflowStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One saga execution. Serializing the instance yields the projection
/// exposed to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique instance identifier
    pub workflow_id: WorkflowId,
    /// Tenant this instance belongs to
    pub tenant_id: TenantId,
    /// Tag selecting which dispatch table applies
    pub workflow_type: String,
    /// Current status
    pub status: WorkflowStatus,
    /// Ordered step names, fixed at construction
    pub steps: Vec<String>,
    /// Append-only results, one per executed step
    pub results: Vec<StepResult>,
    /// Outcomes of compensating actions run after a failure. Kept apart
    /// from `results` so `results.len() <= steps.len()` always holds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compensations: Vec<StepResult>,
    /// Caller-supplied context, read/write to step handlers
    pub business_context: BusinessContext,
    /// When the instance was created
    pub start_time: DateTime<Utc>,
    /// When the instance reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whether a step failure triggers compensation of prior steps
    pub rollback_on_failure: bool,
}

impl WorkflowInstance {
    /// Create a new instance in `Pending` status.
    pub fn new(
        workflow_id: WorkflowId,
        tenant_id: TenantId,
        workflow_type: impl Into<String>,
        steps: Vec<String>,
        business_context: BusinessContext,
    ) -> Self {
        Self {
            workflow_id,
            tenant_id,
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Pending,
            steps,
            results: Vec::new(),
            compensations: Vec::new(),
            business_context,
            start_time: Utc::now(),
            end_time: None,
            rollback_on_failure: true,
        }
    }

    pub fn with_rollback_on_failure(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Begin executing (Pending or WaitingApproval → Running).
    pub fn begin(&mut self) {
        self.status = WorkflowStatus::Running;
    }

    /// Append a step result. Never exceeds the step count.
    pub fn record_result(&mut self, result: StepResult) {
        debug_assert!(self.results.len() < self.steps.len());
        self.results.push(result);
    }

    /// Record a compensating action's outcome.
    pub fn record_compensation(&mut self, result: StepResult) {
        self.compensations.push(result);
    }

    /// Halt at an approval gate.
    pub fn wait_for_approval(&mut self) {
        self.status = WorkflowStatus::WaitingApproval;
    }

    /// Mark the paused step approved: tag its message, store the approval
    /// data, and transition back to Running.
    pub fn approve_last(&mut self, approval_data: Value) {
        if let Some(last) = self.results.last_mut() {
            last.message.push_str(" [APPROVED]");
            last.approval_data = Some(approval_data);
        }
        self.status = WorkflowStatus::Running;
    }

    /// Mark the paused step rejected: tag its message, record the reason as
    /// its error, and cancel the instance. Later steps are never attempted.
    pub fn reject_last(&mut self, reason: impl Into<String>) {
        if let Some(last) = self.results.last_mut() {
            last.message.push_str(" [REJECTED]");
            last.error = Some(reason.into());
        }
        self.status = WorkflowStatus::Cancelled;
        self.end_time = Some(Utc::now());
    }

    /// All steps succeeded.
    pub fn complete(&mut self) {
        self.status = WorkflowStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    /// A step failed.
    pub fn fail(&mut self) {
        self.status = WorkflowStatus::Failed;
        self.end_time = Some(Utc::now());
    }

    /// Force any non-terminal instance to Cancelled. Does not compensate.
    pub fn cancel(&mut self) {
        if !self.is_terminal() {
            self.status = WorkflowStatus::Cancelled;
            self.end_time = Some(Utc::now());
        }
    }

    // ── Query methods ────────────────────────────────────────────────

    /// Check if the instance reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the next unexecuted step.
    pub fn next_step_index(&self) -> usize {
        self.results.len()
    }

    /// Name of the next unexecuted step, if any remain.
    pub fn next_step(&self) -> Option<&str> {
        self.steps.get(self.results.len()).map(String::as_str)
    }

    /// The result currently awaiting an approval decision.
    pub fn pending_approval(&self) -> Option<&StepResult> {
        if self.status != WorkflowStatus::WaitingApproval {
            return None;
        }
        self.results.last().filter(|r| r.requires_approval)
    }

    /// Age of the instance since it reached a terminal status.
    pub fn terminal_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.end_time
            .filter(|_| self.is_terminal())
            .map(|end| now.signed_duration_since(end))
    }
}
