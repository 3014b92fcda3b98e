//! The process engine: registry and supervisor of workflow instances
//!
//! Owns the dispatch-table, process-definition, and custom-step registries
//! plus the active-instance registry. Concurrent operations against the
//! same workflow id are serialized through a per-instance mutex; distinct
//! ids proceed independently. Lock order is always registry, then instance,
//! and registry guards are never held across handler awaits.

use crate::dispatch::{DispatchTable, StepContext, StepHandler};
use crate::executor::SagaExecutor;
use crate::gate::{PolicyGate, RulesGate};
use saga_types::{
    BusinessContext, EngineError, EngineResult, ProcessDefinition, ProcessResult, ProcessStatus,
    ProcessStepType, StepResult, TenantId, WorkflowId, WorkflowInstance, WorkflowStatus,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Options for starting a workflow instance.
#[derive(Clone, Debug)]
pub struct StartOptions {
    /// Caller-supplied id; generated when absent
    pub workflow_id: Option<WorkflowId>,
    /// Whether a step failure compensates prior steps
    pub rollback_on_failure: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            workflow_id: None,
            rollback_on_failure: true,
        }
    }
}

/// Filters for listing active workflow instances.
#[derive(Clone, Debug, Default)]
pub struct WorkflowFilter {
    pub tenant: Option<TenantId>,
    pub workflow_type: Option<String>,
    pub status: Option<WorkflowStatus>,
}

impl WorkflowFilter {
    pub fn tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn workflow_type(mut self, workflow_type: impl Into<String>) -> Self {
        self.workflow_type = Some(workflow_type.into());
        self
    }

    pub fn status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.tenant
            .as_ref()
            .map_or(true, |t| &instance.tenant_id == t)
            && self
                .workflow_type
                .as_ref()
                .map_or(true, |t| &instance.workflow_type == t)
            && self.status.map_or(true, |s| instance.status == s)
    }
}

/// Registry + supervisor of workflow instances and process definitions.
pub struct ProcessEngine {
    rules: Arc<dyn RulesGate>,
    policies: Arc<dyn PolicyGate>,
    executor: SagaExecutor,
    /// Dispatch tables keyed by workflow type
    workflows: RwLock<HashMap<String, Arc<DispatchTable>>>,
    /// Process definitions keyed by process id
    processes: RwLock<HashMap<String, ProcessDefinition>>,
    /// Handlers for custom process steps, keyed by step name
    custom_steps: RwLock<HashMap<String, Arc<dyn StepHandler>>>,
    /// Live instances; one entry per id, each behind its own mutex
    active: RwLock<HashMap<WorkflowId, Arc<Mutex<WorkflowInstance>>>>,
    /// Terminal instances swept out of the active registry
    history: Mutex<Vec<WorkflowInstance>>,
}

impl ProcessEngine {
    pub fn new(rules: Arc<dyn RulesGate>, policies: Arc<dyn PolicyGate>) -> Self {
        Self {
            rules,
            policies,
            executor: SagaExecutor::new(),
            workflows: RwLock::new(HashMap::new()),
            processes: RwLock::new(HashMap::new()),
            custom_steps: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register a workflow type's dispatch table. Registration only — no
    /// runtime side effects.
    pub async fn register_workflow(&self, table: DispatchTable) -> EngineResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow_type = table.workflow_type().to_string();
        if workflows.contains_key(&workflow_type) {
            return Err(EngineError::DuplicateRegistration(workflow_type));
        }
        tracing::info!(workflow_type = %workflow_type, "workflow type registered");
        workflows.insert(workflow_type, Arc::new(table));
        Ok(())
    }

    /// Register a process definition.
    pub async fn register_process(&self, definition: ProcessDefinition) -> EngineResult<()> {
        let mut processes = self.processes.write().await;
        if processes.contains_key(&definition.process_id) {
            return Err(EngineError::DuplicateRegistration(
                definition.process_id.clone(),
            ));
        }
        processes.insert(definition.process_id.clone(), definition);
        Ok(())
    }

    /// Register a handler for a custom process step.
    pub async fn register_custom_step(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> EngineResult<()> {
        let name = name.into();
        let mut custom = self.custom_steps.write().await;
        if custom.contains_key(&name) {
            return Err(EngineError::DuplicateRegistration(name));
        }
        custom.insert(name, handler);
        Ok(())
    }

    // ── Workflow lifecycle ───────────────────────────────────────────

    /// Start a workflow instance. Rules and policy gates run before the
    /// instance is constructed — a rejection is an error with zero side
    /// effects. On success the instance is registered and driven through
    /// one `execute` before its snapshot is returned.
    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        business_context: BusinessContext,
        tenant_id: TenantId,
        options: StartOptions,
    ) -> EngineResult<WorkflowInstance> {
        let table = self
            .workflows
            .read()
            .await
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowTypeNotRegistered(workflow_type.to_string()))?;

        let rules = self
            .rules
            .validate_workflow_rules(workflow_type, &business_context, &tenant_id)
            .await;
        if !rules.valid {
            return Err(EngineError::RulesRejected {
                workflow_type: workflow_type.to_string(),
                errors: rules.errors,
            });
        }

        let policy = self
            .policies
            .check_workflow_policies(workflow_type, &business_context, &tenant_id)
            .await;
        if !policy.allowed {
            return Err(EngineError::PolicyDenied {
                workflow_type: workflow_type.to_string(),
                reason: policy.reason.unwrap_or_else(|| "policy denied".into()),
            });
        }

        let workflow_id = options.workflow_id.unwrap_or_else(WorkflowId::generate);
        let instance = WorkflowInstance::new(
            workflow_id.clone(),
            tenant_id,
            workflow_type,
            table.steps().to_vec(),
            business_context,
        )
        .with_rollback_on_failure(options.rollback_on_failure);

        let entry = Arc::new(Mutex::new(instance));
        {
            let mut active = self.active.write().await;
            if active.contains_key(&workflow_id) {
                return Err(EngineError::DuplicateWorkflowId(workflow_id));
            }
            active.insert(workflow_id.clone(), entry.clone());
        }

        tracing::info!(
            workflow_id = %workflow_id,
            workflow_type = %workflow_type,
            "workflow instance started"
        );

        let mut instance = entry.lock().await;
        self.executor
            .execute(&mut instance, &table, self.rules.as_ref())
            .await;
        Ok(instance.clone())
    }

    /// Approve a paused instance and resume it.
    pub async fn resume_workflow(
        &self,
        workflow_id: &WorkflowId,
        approval_data: Value,
    ) -> EngineResult<WorkflowInstance> {
        let entry = self.lookup(workflow_id).await?;
        let mut instance = entry.lock().await;
        let table = self.table_for(&instance.workflow_type).await?;
        self.executor
            .approve_and_continue(&mut instance, &table, self.rules.as_ref(), approval_data)
            .await?;
        Ok(instance.clone())
    }

    /// Reject a paused instance, cancelling it.
    pub async fn reject_workflow(
        &self,
        workflow_id: &WorkflowId,
        reason: &str,
    ) -> EngineResult<WorkflowInstance> {
        let entry = self.lookup(workflow_id).await?;
        let mut instance = entry.lock().await;
        self.executor.reject_and_cancel(&mut instance, reason)?;
        Ok(instance.clone())
    }

    /// Cancel a non-terminal instance. Does not compensate.
    pub async fn cancel_workflow(&self, workflow_id: &WorkflowId) -> EngineResult<WorkflowInstance> {
        let entry = self.lookup(workflow_id).await?;
        let mut instance = entry.lock().await;
        if instance.is_terminal() {
            return Err(EngineError::AlreadyTerminal {
                id: workflow_id.clone(),
                status: instance.status,
            });
        }
        instance.cancel();
        tracing::info!(workflow_id = %workflow_id, "workflow cancelled");
        Ok(instance.clone())
    }

    // ── Query ────────────────────────────────────────────────────────

    /// Current status of an instance.
    pub async fn get_workflow_status(&self, workflow_id: &WorkflowId) -> EngineResult<WorkflowStatus> {
        let entry = self.lookup(workflow_id).await?;
        let instance = entry.lock().await;
        Ok(instance.status)
    }

    /// Full serializable snapshot of an instance.
    pub async fn get_workflow(&self, workflow_id: &WorkflowId) -> EngineResult<WorkflowInstance> {
        let entry = self.lookup(workflow_id).await?;
        let instance = entry.lock().await;
        Ok(instance.clone())
    }

    /// Snapshots of registry instances matching the filter. The registry
    /// guard is released before any instance lock is taken, so an instance
    /// mid-step never stalls the registry.
    pub async fn list_active_workflows(&self, filter: &WorkflowFilter) -> Vec<WorkflowInstance> {
        let entries: Vec<Arc<Mutex<WorkflowInstance>>> =
            self.active.read().await.values().cloned().collect();

        let mut matching = Vec::new();
        for entry in entries {
            let instance = entry.lock().await;
            if filter.matches(&instance) {
                matching.push(instance.clone());
            }
        }
        matching
    }

    /// Number of instances in the active registry.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Snapshots of instances swept to history.
    pub async fn history(&self) -> Vec<WorkflowInstance> {
        self.history.lock().await.clone()
    }

    // ── Process composition ──────────────────────────────────────────

    /// Walk a process definition's steps in order, dispatching each by its
    /// declared type. Stops at the first failing step; `steps_completed`
    /// counts attempted steps including the failing one.
    pub async fn execute_process(
        &self,
        process_id: &str,
        business_context: BusinessContext,
        tenant_id: TenantId,
    ) -> EngineResult<ProcessResult> {
        let definition = self
            .processes
            .read()
            .await
            .get(process_id)
            .cloned()
            .ok_or_else(|| EngineError::ProcessNotFound(process_id.to_string()))?;

        let total_steps = definition.steps.len();
        let mut context = business_context;
        let mut results = Vec::new();
        let mut failed = false;

        for step in &definition.steps {
            let result = match step.step_type {
                ProcessStepType::Workflow => {
                    self.run_workflow_step(step.name.as_str(), &step.parameters, &context, &tenant_id)
                        .await
                }
                ProcessStepType::RuleCheck => {
                    let outcome = self.rules.evaluate_rule(&step.name, &context, &tenant_id).await;
                    if outcome.valid {
                        StepResult::ok(&step.name, "rule satisfied")
                    } else {
                        StepResult::failed(
                            &step.name,
                            format!("rule violated: {}", outcome.errors.join("; ")),
                        )
                    }
                }
                ProcessStepType::PolicyCheck => {
                    let outcome = self
                        .policies
                        .evaluate_policy(&step.name, &context, &tenant_id)
                        .await;
                    if outcome.allowed {
                        StepResult::ok(&step.name, "policy allowed")
                    } else {
                        StepResult::failed(
                            &step.name,
                            format!(
                                "policy denied: {}",
                                outcome.reason.unwrap_or_else(|| "no reason given".into())
                            ),
                        )
                    }
                }
                ProcessStepType::Custom => {
                    self.run_custom_step(&step.name, &mut context, process_id, &tenant_id)
                        .await
                }
            };

            let step_failed = !result.success;
            results.push(result);
            if step_failed {
                failed = true;
                break;
            }
        }

        let steps_completed = results.len();
        let status = if failed {
            ProcessStatus::Failed
        } else {
            ProcessStatus::Completed
        };
        tracing::info!(
            process_id = %process_id,
            status = ?status,
            steps_completed,
            total_steps,
            "process executed"
        );

        Ok(ProcessResult {
            process_id: process_id.to_string(),
            status,
            steps_completed,
            total_steps,
            results,
        })
    }

    /// Sweep the active registry: terminal instances whose `end_time` is
    /// older than `max_age` move to the append-only history. Returns the
    /// number swept. This bounds the registry's memory growth.
    pub async fn cleanup_completed_workflows(&self, max_age: chrono::Duration) -> usize {
        let cutoff = chrono::Utc::now() - max_age;

        // Inspect without the registry guard held: instance locks may be
        // busy mid-step, and terminal status is final so the later removal
        // cannot race with a status change.
        let entries: Vec<(WorkflowId, Arc<Mutex<WorkflowInstance>>)> = self
            .active
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();

        let mut expired = Vec::new();
        for (id, entry) in entries {
            let instance = entry.lock().await;
            if instance.is_terminal() && instance.end_time.is_some_and(|end| end < cutoff) {
                expired.push((id, instance.clone()));
            }
        }

        let mut swept = 0;
        if !expired.is_empty() {
            let mut active = self.active.write().await;
            let mut history = self.history.lock().await;
            for (id, snapshot) in expired {
                // A concurrent sweep may have removed it already
                if active.remove(&id).is_some() {
                    tracing::info!(workflow_id = %id, "terminal workflow moved to history");
                    history.push(snapshot);
                    swept += 1;
                }
            }
        }
        swept
    }

    // ── Internal helpers ─────────────────────────────────────────────

    async fn lookup(&self, workflow_id: &WorkflowId) -> EngineResult<Arc<Mutex<WorkflowInstance>>> {
        self.active
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.clone()))
    }

    async fn table_for(&self, workflow_type: &str) -> EngineResult<Arc<DispatchTable>> {
        self.workflows
            .read()
            .await
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowTypeNotRegistered(workflow_type.to_string()))
    }

    /// A process step that starts a sub-workflow. Gate rejections and start
    /// errors become failing step results here; a sub-workflow paused for
    /// approval is in flight, not failed.
    async fn run_workflow_step(
        &self,
        step_name: &str,
        parameters: &Value,
        context: &BusinessContext,
        tenant_id: &TenantId,
    ) -> StepResult {
        let workflow_type = parameters
            .get("workflow_type")
            .and_then(Value::as_str)
            .unwrap_or(step_name)
            .to_string();

        // Step parameters overlay the shared process context
        let mut sub_context = context.clone();
        if let Value::Object(params) = parameters {
            for (key, value) in params {
                if key != "workflow_type" {
                    sub_context.insert(key.clone(), value.clone());
                }
            }
        }

        match self
            .start_workflow(
                &workflow_type,
                sub_context,
                tenant_id.clone(),
                StartOptions::default(),
            )
            .await
        {
            Ok(instance) => {
                let data = json!({
                    "workflow_id": instance.workflow_id,
                    "status": instance.status,
                });
                if instance.status == WorkflowStatus::Failed {
                    let error = instance
                        .results
                        .last()
                        .and_then(|r| r.error.clone())
                        .unwrap_or_else(|| "workflow failed".into());
                    StepResult::failed(step_name, error).with_data(data)
                } else {
                    StepResult::ok(
                        step_name,
                        format!("workflow {} {}", instance.workflow_id.short(), instance.status),
                    )
                    .with_data(data)
                }
            }
            Err(err) => StepResult::failed(step_name, err.to_string()),
        }
    }

    async fn run_custom_step(
        &self,
        step_name: &str,
        context: &mut BusinessContext,
        process_id: &str,
        tenant_id: &TenantId,
    ) -> StepResult {
        let Some(handler) = self.custom_steps.read().await.get(step_name).cloned() else {
            return StepResult::failed(step_name, "unknown custom step");
        };

        let process_scope = WorkflowId::new(format!("process:{process_id}"));
        let outcome = {
            let mut ctx = StepContext {
                workflow_id: &process_scope,
                tenant_id,
                business_context: context,
            };
            handler.run(&mut ctx).await
        };

        match outcome {
            Ok(result) => result,
            Err(err) => StepResult::failed(step_name, format!("{err:#}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Unrestricted;
    use async_trait::async_trait;
    use saga_types::{PolicyOutcome, ProcessStep, RuleOutcome};
    use std::sync::Mutex as StdMutex;

    type Journal = Arc<StdMutex<Vec<String>>>;

    struct Record(&'static str, Journal);

    #[async_trait]
    impl StepHandler for Record {
        async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
            self.1.lock().unwrap().push(self.0.to_string());
            ctx.insert(format!("{}_done", self.0), json!(true));
            Ok(StepResult::ok(self.0, "done"))
        }
    }

    /// Holds its step (and the instance lock) until released.
    struct Stall(Arc<tokio::sync::Notify>);

    #[async_trait]
    impl StepHandler for Stall {
        async fn run(&self, _ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
            self.0.notified().await;
            Ok(StepResult::ok("stall", "released"))
        }
    }

    struct GateOn(&'static str);

    #[async_trait]
    impl StepHandler for GateOn {
        async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
            let value = ctx.f64_value("value").unwrap_or(0.0);
            let threshold = ctx.f64_value("approval_threshold").unwrap_or(f64::INFINITY);
            if value > threshold {
                return Ok(StepResult::needs_approval(
                    self.0,
                    "over threshold",
                    json!({"value": value, "approval_threshold": threshold}),
                ));
            }
            Ok(StepResult::ok(self.0, "under threshold"))
        }
    }

    /// Rules gate driven by rule name; rejects rules listed as failing.
    struct NamedRules {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl RulesGate for NamedRules {
        async fn validate_workflow_rules(
            &self,
            workflow_type: &str,
            _c: &BusinessContext,
            _t: &TenantId,
        ) -> RuleOutcome {
            if self.failing.iter().any(|f| *f == workflow_type) {
                RuleOutcome::violation("workflow type blocked")
            } else {
                RuleOutcome::valid()
            }
        }

        async fn validate_business_rules(
            &self,
            _w: &str,
            _c: &BusinessContext,
            _t: &TenantId,
        ) -> RuleOutcome {
            RuleOutcome::valid()
        }

        async fn evaluate_rule(
            &self,
            rule: &str,
            _c: &BusinessContext,
            _t: &TenantId,
        ) -> RuleOutcome {
            if self.failing.iter().any(|f| *f == rule) {
                RuleOutcome::violation(format!("rule '{rule}' failed"))
            } else {
                RuleOutcome::valid()
            }
        }
    }

    #[async_trait]
    impl PolicyGate for NamedRules {
        async fn check_workflow_policies(
            &self,
            _w: &str,
            _c: &BusinessContext,
            _t: &TenantId,
        ) -> PolicyOutcome {
            PolicyOutcome::allowed()
        }

        async fn evaluate_policy(
            &self,
            policy: &str,
            _c: &BusinessContext,
            _t: &TenantId,
        ) -> PolicyOutcome {
            if self.failing.iter().any(|f| *f == policy) {
                PolicyOutcome::denied(format!("policy '{policy}' denied"))
            } else {
                PolicyOutcome::allowed()
            }
        }
    }

    fn simple_table(journal: &Journal) -> DispatchTable {
        DispatchTable::builder("simple")
            .step("one", Arc::new(Record("one", journal.clone())))
            .step("two", Arc::new(Record("two", journal.clone())))
            .build()
    }

    fn gated_table() -> DispatchTable {
        DispatchTable::builder("gated")
            .step("check", Arc::new(GateOn("check")))
            .build()
    }

    fn unrestricted_engine() -> ProcessEngine {
        ProcessEngine::new(Arc::new(Unrestricted), Arc::new(Unrestricted))
    }

    fn tenant() -> TenantId {
        TenantId::new("acme")
    }

    #[tokio::test]
    async fn start_unknown_type_fails() {
        let engine = unrestricted_engine();
        let err = engine
            .start_workflow("nope", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowTypeNotRegistered(_)));
    }

    #[tokio::test]
    async fn start_runs_to_completion() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let instance = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap();

        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.results.len(), 2);
        assert_eq!(engine.active_count().await, 1);
        assert_eq!(
            engine.get_workflow_status(&instance.workflow_id).await.unwrap(),
            WorkflowStatus::Completed
        );
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();
        let err = engine
            .register_workflow(simple_table(&journal))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateRegistration(_)));
    }

    #[tokio::test]
    async fn duplicate_workflow_id_rejected() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let options = StartOptions {
            workflow_id: Some(WorkflowId::new("wf-dup")),
            ..Default::default()
        };
        engine
            .start_workflow("simple", BusinessContext::new(), tenant(), options.clone())
            .await
            .unwrap();
        let err = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), options)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateWorkflowId(_)));
    }

    #[tokio::test]
    async fn gate_rejection_creates_nothing() {
        let journal: Journal = Default::default();
        let rules = Arc::new(NamedRules {
            failing: vec!["simple"],
        });
        let engine = ProcessEngine::new(rules.clone(), rules);
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let err = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::RulesRejected { .. }));
        assert_eq!(engine.active_count().await, 0);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_resume_through_engine() {
        let engine = unrestricted_engine();
        engine.register_workflow(gated_table()).await.unwrap();

        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(1500.0));
        context.insert("approval_threshold".into(), json!(1000.0));

        let instance = engine
            .start_workflow("gated", context, tenant(), StartOptions::default())
            .await
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::WaitingApproval);

        let resumed = engine
            .resume_workflow(&instance.workflow_id, json!({"approver": "ops"}))
            .await
            .unwrap();
        assert_eq!(resumed.status, WorkflowStatus::Completed);
        assert!(resumed.results[0].message.contains("[APPROVED]"));
    }

    #[tokio::test]
    async fn reject_through_engine() {
        let engine = unrestricted_engine();
        engine.register_workflow(gated_table()).await.unwrap();

        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(1500.0));
        context.insert("approval_threshold".into(), json!(1000.0));

        let instance = engine
            .start_workflow("gated", context, tenant(), StartOptions::default())
            .await
            .unwrap();

        let rejected = engine
            .reject_workflow(&instance.workflow_id, "too expensive")
            .await
            .unwrap();
        assert_eq!(rejected.status, WorkflowStatus::Cancelled);
        assert!(rejected.results[0].message.contains("[REJECTED]"));
    }

    #[tokio::test]
    async fn resume_errors_are_explicit() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let err = engine
            .resume_workflow(&WorkflowId::new("missing"), json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound(_)));

        let instance = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap();
        let err = engine
            .resume_workflow(&instance.workflow_id, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotWaitingApproval { .. }));
    }

    #[tokio::test]
    async fn cancel_terminal_instance_errors() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let instance = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap();
        let err = engine.cancel_workflow(&instance.workflow_id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn cancel_paused_instance() {
        let engine = unrestricted_engine();
        engine.register_workflow(gated_table()).await.unwrap();

        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(2000.0));
        context.insert("approval_threshold".into(), json!(1000.0));
        let instance = engine
            .start_workflow("gated", context, tenant(), StartOptions::default())
            .await
            .unwrap();

        let cancelled = engine.cancel_workflow(&instance.workflow_id).await.unwrap();
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_filters_by_tenant_type_and_status() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();
        engine.register_workflow(gated_table()).await.unwrap();

        engine
            .start_workflow("simple", BusinessContext::new(), TenantId::new("acme"), StartOptions::default())
            .await
            .unwrap();

        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(2000.0));
        context.insert("approval_threshold".into(), json!(1000.0));
        engine
            .start_workflow("gated", context, TenantId::new("globex"), StartOptions::default())
            .await
            .unwrap();

        let all = engine.list_active_workflows(&WorkflowFilter::default()).await;
        assert_eq!(all.len(), 2);

        let acme = engine
            .list_active_workflows(&WorkflowFilter::default().tenant(TenantId::new("acme")))
            .await;
        assert_eq!(acme.len(), 1);
        assert_eq!(acme[0].workflow_type, "simple");

        let waiting = engine
            .list_active_workflows(
                &WorkflowFilter::default().status(WorkflowStatus::WaitingApproval),
            )
            .await;
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].workflow_type, "gated");

        let none = engine
            .list_active_workflows(
                &WorkflowFilter::default()
                    .tenant(TenantId::new("acme"))
                    .workflow_type("gated"),
            )
            .await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn process_stops_at_failing_rule_check() {
        let rules = Arc::new(NamedRules {
            failing: vec!["tenant_quota"],
        });
        let engine = ProcessEngine::new(rules.clone(), rules);
        engine
            .register_process(
                ProcessDefinition::new("setup")
                    .with_step(ProcessStep::rule_check("tenant_quota"))
                    .with_step(ProcessStep::policy_check("spend_limit")),
            )
            .await
            .unwrap();

        let result = engine
            .execute_process("setup", BusinessContext::new(), tenant())
            .await
            .unwrap();

        assert_eq!(result.status, ProcessStatus::Failed);
        assert_eq!(result.steps_completed, 1);
        assert_eq!(result.total_steps, 2);
        assert!(result.results[0].error.as_deref().unwrap().contains("tenant_quota"));
    }

    #[tokio::test]
    async fn process_composes_workflow_and_custom_steps() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();
        engine
            .register_custom_step("stamp", Arc::new(Record("stamp", journal.clone())))
            .await
            .unwrap();
        engine
            .register_process(
                ProcessDefinition::new("combo")
                    .with_step(ProcessStep::rule_check("anything"))
                    .with_step(ProcessStep::workflow("simple", json!({"plan": "standard"})))
                    .with_step(ProcessStep::custom("stamp", Value::Null)),
            )
            .await
            .unwrap();

        let result = engine
            .execute_process("combo", BusinessContext::new(), tenant())
            .await
            .unwrap();

        assert_eq!(result.status, ProcessStatus::Completed);
        assert_eq!(result.steps_completed, 3);
        assert_eq!(*journal.lock().unwrap(), vec!["one", "two", "stamp"]);
        // The sub-workflow really ran and registered
        assert_eq!(engine.active_count().await, 1);
    }

    #[tokio::test]
    async fn process_unknown_custom_step_fails() {
        let engine = unrestricted_engine();
        engine
            .register_process(
                ProcessDefinition::new("p").with_step(ProcessStep::custom("ghost", Value::Null)),
            )
            .await
            .unwrap();

        let result = engine
            .execute_process("p", BusinessContext::new(), tenant())
            .await
            .unwrap();
        assert_eq!(result.status, ProcessStatus::Failed);
        assert_eq!(result.results[0].error.as_deref(), Some("unknown custom step"));
    }

    #[tokio::test]
    async fn process_not_found() {
        let engine = unrestricted_engine();
        let err = engine
            .execute_process("missing", BusinessContext::new(), tenant())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn cleanup_sweeps_only_old_terminal_instances() {
        let journal: Journal = Default::default();
        let engine = unrestricted_engine();
        engine.register_workflow(simple_table(&journal)).await.unwrap();
        engine.register_workflow(gated_table()).await.unwrap();

        // Terminal instance, end_time just now
        let done = engine
            .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
            .await
            .unwrap();

        // Paused instance, no end_time
        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(2000.0));
        context.insert("approval_threshold".into(), json!(1000.0));
        let paused = engine
            .start_workflow("gated", context, tenant(), StartOptions::default())
            .await
            .unwrap();

        // A generous max_age keeps everything
        let swept = engine
            .cleanup_completed_workflows(chrono::Duration::hours(1))
            .await;
        assert_eq!(swept, 0);
        assert_eq!(engine.active_count().await, 2);

        // Zero max_age sweeps the terminal instance only
        let swept = engine
            .cleanup_completed_workflows(chrono::Duration::zero())
            .await;
        assert_eq!(swept, 1);
        assert_eq!(engine.active_count().await, 1);

        let remaining = engine.list_active_workflows(&WorkflowFilter::default()).await;
        assert_eq!(remaining[0].workflow_id, paused.workflow_id);

        let history = engine.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].workflow_id, done.workflow_id);
    }

    #[tokio::test]
    async fn concurrent_resume_and_cancel_on_same_id() {
        let engine = Arc::new(unrestricted_engine());
        engine.register_workflow(gated_table()).await.unwrap();

        let mut context = BusinessContext::new();
        context.insert("value".into(), json!(2000.0));
        context.insert("approval_threshold".into(), json!(1000.0));
        let paused = engine
            .start_workflow("gated", context, tenant(), StartOptions::default())
            .await
            .unwrap();
        assert_eq!(paused.status, WorkflowStatus::WaitingApproval);
        let id = paused.workflow_id;

        let resume = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.resume_workflow(&id, json!({"approver": "ops"})).await })
        };
        let cancel = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.cancel_workflow(&id).await })
        };

        let resume = resume.await.unwrap();
        let cancel = cancel.await.unwrap();

        // The per-instance mutex serializes the pair: exactly one wins
        assert_ne!(resume.is_ok(), cancel.is_ok());
        let status = engine.get_workflow_status(&id).await.unwrap();
        if resume.is_ok() {
            assert!(matches!(cancel.unwrap_err(), EngineError::AlreadyTerminal { .. }));
            assert_eq!(status, WorkflowStatus::Completed);
        } else {
            assert!(matches!(resume.unwrap_err(), EngineError::NotWaitingApproval { .. }));
            assert_eq!(status, WorkflowStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn busy_instance_does_not_stall_registry() {
        let journal: Journal = Default::default();
        let release = Arc::new(tokio::sync::Notify::new());
        let engine = Arc::new(unrestricted_engine());
        engine
            .register_workflow(
                DispatchTable::builder("stalled")
                    .step("stall", Arc::new(Stall(release.clone())))
                    .build(),
            )
            .await
            .unwrap();
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        // This instance holds its own lock across the handler await
        let stalled = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .start_workflow("stalled", BusinessContext::new(), tenant(), StartOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;

        // Listing blocks on the busy instance's lock, not on the registry
        let listing = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.list_active_workflows(&WorkflowFilter::default()).await })
        };
        tokio::task::yield_now().await;

        // The registry must stay available for new instances meanwhile
        let started = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default()),
        )
        .await
        .expect("registry stalled while an instance was mid-step")
        .unwrap();
        assert_eq!(started.status, WorkflowStatus::Completed);

        release.notify_one();
        assert_eq!(stalled.await.unwrap().unwrap().status, WorkflowStatus::Completed);
        // The listing snapshot was taken before the second start
        assert_eq!(listing.await.unwrap().len(), 1);
        assert_eq!(engine.active_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_operations_on_distinct_ids() {
        let journal: Journal = Default::default();
        let engine = Arc::new(unrestricted_engine());
        engine.register_workflow(simple_table(&journal)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .start_workflow("simple", BusinessContext::new(), tenant(), StartOptions::default())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            let instance = handle.await.unwrap();
            assert_eq!(instance.status, WorkflowStatus::Completed);
        }
        assert_eq!(engine.active_count().await, 8);
    }
}
