//! Rules and policy gate contracts
//!
//! Both gates are external collaborators. The engine consults them at two
//! points: `validate_workflow_rules` and `check_workflow_policies` run
//! before an instance is constructed (a rejection there is an error with
//! zero side effects), while `validate_business_rules` runs inside the
//! first `execute` call and a rejection there is recorded as a failing
//! step result on the instance.

use async_trait::async_trait;
use saga_types::{BusinessContext, PolicyOutcome, RuleOutcome, TenantId};

/// Business-rule evaluation, implemented by the embedding application.
#[async_trait]
pub trait RulesGate: Send + Sync {
    /// Structural pre-flight for starting a workflow of the given type.
    /// Evaluated before the instance exists.
    async fn validate_workflow_rules(
        &self,
        workflow_type: &str,
        context: &BusinessContext,
        tenant: &TenantId,
    ) -> RuleOutcome;

    /// Business pre-flight evaluated inside the instance's first `execute`
    /// call (e.g. duplicate-entity checks). A rejection here produces a
    /// failing step result, not an error.
    async fn validate_business_rules(
        &self,
        workflow_type: &str,
        context: &BusinessContext,
        tenant: &TenantId,
    ) -> RuleOutcome;

    /// Evaluate a single named rule (used by process rule-check steps).
    async fn evaluate_rule(
        &self,
        rule: &str,
        context: &BusinessContext,
        tenant: &TenantId,
    ) -> RuleOutcome;
}

/// Policy evaluation, implemented by the embedding application.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// Check all policies applicable to starting a workflow of this type.
    async fn check_workflow_policies(
        &self,
        workflow_type: &str,
        context: &BusinessContext,
        tenant: &TenantId,
    ) -> PolicyOutcome;

    /// Evaluate a single named policy (used by process policy-check steps).
    async fn evaluate_policy(
        &self,
        policy: &str,
        context: &BusinessContext,
        tenant: &TenantId,
    ) -> PolicyOutcome;
}

/// A gate that permits everything. Useful for embedding without a rules or
/// policy engine, and for tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unrestricted;

#[async_trait]
impl RulesGate for Unrestricted {
    async fn validate_workflow_rules(
        &self,
        _workflow_type: &str,
        _context: &BusinessContext,
        _tenant: &TenantId,
    ) -> RuleOutcome {
        RuleOutcome::valid()
    }

    async fn validate_business_rules(
        &self,
        _workflow_type: &str,
        _context: &BusinessContext,
        _tenant: &TenantId,
    ) -> RuleOutcome {
        RuleOutcome::valid()
    }

    async fn evaluate_rule(
        &self,
        _rule: &str,
        _context: &BusinessContext,
        _tenant: &TenantId,
    ) -> RuleOutcome {
        RuleOutcome::valid()
    }
}

#[async_trait]
impl PolicyGate for Unrestricted {
    async fn check_workflow_policies(
        &self,
        _workflow_type: &str,
        _context: &BusinessContext,
        _tenant: &TenantId,
    ) -> PolicyOutcome {
        PolicyOutcome::allowed()
    }

    async fn evaluate_policy(
        &self,
        _policy: &str,
        _context: &BusinessContext,
        _tenant: &TenantId,
    ) -> PolicyOutcome {
        PolicyOutcome::allowed()
    }
}
