//! The saga executor: drives one instance through its dispatch table
//!
//! Steps run strictly sequentially. A handler error is caught and converted
//! into a failing result — no failure escapes `execute`. On failure the
//! executor compensates prior successful steps in reverse completion order;
//! compensation is best effort, not ACID: a failing compensating action is
//! logged and recorded, and the instance stays `Failed`.

use crate::dispatch::{DispatchTable, StepContext};
use crate::gate::RulesGate;
use saga_types::{EngineError, EngineResult, StepResult, WorkflowInstance, WorkflowStatus};
use serde_json::Value;

/// Drives workflow instances. Stateless; all state lives on the instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct SagaExecutor;

impl SagaExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run steps in order starting at the first unexecuted step, until the
    /// instance completes, fails, or pauses at an approval gate. Returns the
    /// results produced by this call.
    ///
    /// On the very first run (no results yet) the business rules gate is
    /// consulted before any step side effect; a rejection is recorded as a
    /// single failing result.
    pub async fn execute(
        &self,
        instance: &mut WorkflowInstance,
        table: &DispatchTable,
        rules: &dyn RulesGate,
    ) -> Vec<StepResult> {
        if instance.status == WorkflowStatus::Pending {
            instance.begin();
        }
        if instance.status != WorkflowStatus::Running {
            return Vec::new();
        }

        if instance.results.is_empty() {
            let outcome = rules
                .validate_business_rules(
                    &instance.workflow_type,
                    &instance.business_context,
                    &instance.tenant_id,
                )
                .await;
            if !outcome.valid {
                let result = StepResult::failed(
                    "business_rules",
                    format!("business rules rejected: {}", outcome.errors.join("; ")),
                );
                instance.record_result(result.clone());
                instance.fail();
                tracing::info!(
                    workflow_id = %instance.workflow_id,
                    workflow_type = %instance.workflow_type,
                    "workflow rejected by business rules"
                );
                return vec![result];
            }
        }

        let mut produced = Vec::new();

        while instance.next_step_index() < instance.steps.len() {
            let step_name = instance.steps[instance.next_step_index()].clone();
            tracing::debug!(
                workflow_id = %instance.workflow_id,
                step = %step_name,
                "dispatching step"
            );

            let result = self.run_forward(instance, table, &step_name).await;
            let failed = !result.success;
            let pauses = result.requires_approval;
            instance.record_result(result.clone());
            produced.push(result);

            if failed {
                instance.fail();
                tracing::info!(
                    workflow_id = %instance.workflow_id,
                    step = %step_name,
                    "workflow failed"
                );
                if instance.rollback_on_failure {
                    self.rollback_completed(instance, table).await;
                }
                return produced;
            }

            if pauses {
                instance.wait_for_approval();
                tracing::info!(
                    workflow_id = %instance.workflow_id,
                    step = %step_name,
                    "workflow waiting for approval"
                );
                return produced;
            }
        }

        instance.complete();
        tracing::info!(workflow_id = %instance.workflow_id, "workflow completed");
        produced
    }

    /// Approve the paused step and resume from the next unexecuted one.
    /// Valid only in `WaitingApproval`.
    pub async fn approve_and_continue(
        &self,
        instance: &mut WorkflowInstance,
        table: &DispatchTable,
        rules: &dyn RulesGate,
        approval_data: Value,
    ) -> EngineResult<Vec<StepResult>> {
        if instance.status != WorkflowStatus::WaitingApproval {
            return Err(EngineError::NotWaitingApproval {
                id: instance.workflow_id.clone(),
                status: instance.status,
            });
        }
        instance.approve_last(approval_data);
        tracing::info!(workflow_id = %instance.workflow_id, "approval granted, resuming");
        Ok(self.execute(instance, table, rules).await)
    }

    /// Reject the paused step: records the reason as its error and cancels
    /// the instance. Valid only in `WaitingApproval`. Does not roll back.
    pub fn reject_and_cancel(
        &self,
        instance: &mut WorkflowInstance,
        reason: &str,
    ) -> EngineResult<()> {
        if instance.status != WorkflowStatus::WaitingApproval {
            return Err(EngineError::NotWaitingApproval {
                id: instance.workflow_id.clone(),
                status: instance.status,
            });
        }
        instance.reject_last(reason);
        tracing::info!(
            workflow_id = %instance.workflow_id,
            reason = %reason,
            "approval rejected, workflow cancelled"
        );
        Ok(())
    }

    /// Execute the compensating action for one step. Safe to call for a
    /// step whose forward action never ran: with no compensating handler
    /// registered this is a successful no-op, and registered compensators
    /// are idempotent (they key off context markers written by the forward
    /// handler).
    pub async fn rollback_step(
        &self,
        instance: &mut WorkflowInstance,
        table: &DispatchTable,
        step_name: &str,
    ) -> StepResult {
        let Some(handler) = table.compensating_handler(step_name) else {
            return StepResult::ok(
                format!("rollback_{step_name}"),
                "no compensating action registered",
            );
        };

        let outcome = {
            let mut ctx = StepContext {
                workflow_id: &instance.workflow_id,
                tenant_id: &instance.tenant_id,
                business_context: &mut instance.business_context,
            };
            handler.run(&mut ctx).await
        };

        match outcome {
            Ok(result) => result,
            Err(err) => StepResult::failed(format!("rollback_{step_name}"), format!("{err:#}")),
        }
    }

    /// Compensate every prior successful step, strictly before the failing
    /// one, in reverse completion order. Failures are logged and recorded,
    /// never re-raised.
    async fn rollback_completed(&self, instance: &mut WorkflowInstance, table: &DispatchTable) {
        let executed = instance.results.len();
        let to_undo: Vec<String> = instance.results[..executed.saturating_sub(1)]
            .iter()
            .filter(|r| r.success)
            .rev()
            .map(|r| r.step_name.clone())
            .collect();

        for step_name in to_undo {
            let result = self.rollback_step(instance, table, &step_name).await;
            if !result.success {
                tracing::warn!(
                    workflow_id = %instance.workflow_id,
                    step = %step_name,
                    error = ?result.error,
                    "compensation failed, manual intervention may be required"
                );
            }
            instance.record_compensation(result);
        }
    }

    async fn run_forward(
        &self,
        instance: &mut WorkflowInstance,
        table: &DispatchTable,
        step_name: &str,
    ) -> StepResult {
        let Some(handler) = table.forward_handler(step_name) else {
            return StepResult::failed(step_name, "unknown step");
        };

        let outcome = {
            let mut ctx = StepContext {
                workflow_id: &instance.workflow_id,
                tenant_id: &instance.tenant_id,
                business_context: &mut instance.business_context,
            };
            handler.run(&mut ctx).await
        };

        match outcome {
            Ok(result) => result,
            // A description, never a raw panic/backtrace payload
            Err(err) => StepResult::failed(step_name, format!("{err:#}")),
        }
    }
}
