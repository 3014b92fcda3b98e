//! Step dispatch: the per-workflow-type command table
//!
//! Each workflow type binds a fixed, ordered list of step names to exactly
//! one forward handler and at most one compensating handler. Dispatch is an
//! explicit name-keyed lookup — an unknown step name yields a failing
//! result, never a panic.

use async_trait::async_trait;
use saga_types::{BusinessContext, StepResult, TenantId, WorkflowId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a handler sees while running: the instance's identity and its
/// mutable business context. The context is read-only to the engine but
/// read/write to handlers.
pub struct StepContext<'a> {
    pub workflow_id: &'a WorkflowId,
    pub tenant_id: &'a TenantId,
    pub business_context: &'a mut BusinessContext,
}

impl<'a> StepContext<'a> {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.business_context.get(key)
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn f64_value(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn bool_value(&self, key: &str) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.business_context.insert(key.into(), value);
    }

    /// Fetch a required string field, failing with a descriptive error.
    pub fn require_str(&self, key: &str) -> anyhow::Result<String> {
        self.str_value(key)
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("missing required context field '{}'", key))
    }
}

/// The single uniform step signature. Handlers either return a result or
/// fail with an error the executor converts into a failing result — no
/// failure crosses the instance boundary as an `Err`.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult>;
}

/// Ordered step names bound to forward and compensating handlers for one
/// workflow type.
#[derive(Clone)]
pub struct DispatchTable {
    workflow_type: String,
    steps: Vec<String>,
    forward: HashMap<String, Arc<dyn StepHandler>>,
    compensating: HashMap<String, Arc<dyn StepHandler>>,
}

impl DispatchTable {
    pub fn builder(workflow_type: impl Into<String>) -> DispatchTableBuilder {
        DispatchTableBuilder {
            workflow_type: workflow_type.into(),
            steps: Vec::new(),
            forward: HashMap::new(),
            compensating: HashMap::new(),
        }
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// The ordered step names. Fixed once built.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn forward_handler(&self, step_name: &str) -> Option<&Arc<dyn StepHandler>> {
        self.forward.get(step_name)
    }

    pub fn compensating_handler(&self, step_name: &str) -> Option<&Arc<dyn StepHandler>> {
        self.compensating.get(step_name)
    }
}

impl std::fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTable")
            .field("workflow_type", &self.workflow_type)
            .field("steps", &self.steps)
            .finish()
    }
}

/// Builds a DispatchTable in declaration order.
pub struct DispatchTableBuilder {
    workflow_type: String,
    steps: Vec<String>,
    forward: HashMap<String, Arc<dyn StepHandler>>,
    compensating: HashMap<String, Arc<dyn StepHandler>>,
}

impl DispatchTableBuilder {
    /// Bind a step with no compensating action.
    pub fn step(self, name: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        self.bind(name.into(), handler, None)
    }

    /// Bind a step with a compensating action.
    pub fn step_with_compensation(
        self,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
        compensation: Arc<dyn StepHandler>,
    ) -> Self {
        self.bind(name.into(), handler, Some(compensation))
    }

    fn bind(
        mut self,
        name: String,
        handler: Arc<dyn StepHandler>,
        compensation: Option<Arc<dyn StepHandler>>,
    ) -> Self {
        self.steps.push(name.clone());
        self.forward.insert(name.clone(), handler);
        if let Some(compensation) = compensation {
            self.compensating.insert(name, compensation);
        }
        self
    }

    pub fn build(self) -> DispatchTable {
        DispatchTable {
            workflow_type: self.workflow_type,
            steps: self.steps,
            forward: self.forward,
            compensating: self.compensating,
        }
    }
}
