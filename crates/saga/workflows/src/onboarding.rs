//! Customer onboarding workflow
//!
//! Six steps: validate the signup data, create the account, set up billing
//! (pausing for approval when the monthly value exceeds the caller's
//! threshold), provision the plan's services, send the welcome message, and
//! finalize. Account creation, billing, and provisioning carry compensating
//! actions; validation and notification do not.

use crate::services::{BillingService, CustomerDirectory, NotificationService, ProvisioningService};
use async_trait::async_trait;
use saga_engine::{DispatchTable, StepContext, StepHandler};
use saga_types::StepResult;
use serde_json::{json, Value};
use std::sync::Arc;

/// Workflow type tag for registration and starting.
pub const WORKFLOW_TYPE: &str = "customer_onboarding";

const KNOWN_PLANS: &[&str] = &["starter", "standard", "premium", "enterprise"];

/// External services the onboarding steps call.
#[derive(Clone)]
pub struct OnboardingServices {
    pub customers: Arc<dyn CustomerDirectory>,
    pub billing: Arc<dyn BillingService>,
    pub provisioning: Arc<dyn ProvisioningService>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Build the onboarding dispatch table over the given services.
pub fn dispatch_table(services: OnboardingServices) -> DispatchTable {
    DispatchTable::builder(WORKFLOW_TYPE)
        .step("validate_data", Arc::new(ValidateData))
        .step_with_compensation(
            "create_account",
            Arc::new(CreateAccount {
                customers: services.customers.clone(),
            }),
            Arc::new(DeleteAccount {
                customers: services.customers.clone(),
            }),
        )
        .step_with_compensation(
            "setup_billing",
            Arc::new(SetupBilling {
                billing: services.billing.clone(),
            }),
            Arc::new(CancelBilling {
                billing: services.billing,
            }),
        )
        .step_with_compensation(
            "provision_services",
            Arc::new(ProvisionServices {
                provisioning: services.provisioning.clone(),
            }),
            Arc::new(DeprovisionServices {
                provisioning: services.provisioning,
            }),
        )
        .step(
            "send_welcome",
            Arc::new(SendWelcome {
                notifications: services.notifications,
            }),
        )
        .step(
            "finalize",
            Arc::new(Finalize {
                customers: services.customers,
            }),
        )
        .build()
}

/// Monthly value implied by a plan when the caller supplies none.
fn plan_monthly_value(plan: &str) -> f64 {
    match plan {
        "starter" => 49.0,
        "standard" => 99.0,
        "premium" => 499.0,
        "enterprise" => 1999.0,
        _ => 99.0,
    }
}

struct ValidateData;

#[async_trait]
impl StepHandler for ValidateData {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let step = "validate_data";

        let Some(email) = ctx.str_value("email").map(str::to_owned) else {
            return Ok(StepResult::failed(step, "missing required field 'email'"));
        };
        if !email.contains('@') {
            return Ok(StepResult::failed(step, format!("invalid email: {email}")));
        }
        if ctx.str_value("name").map_or(true, str::is_empty) {
            return Ok(StepResult::failed(step, "missing required field 'name'"));
        }

        let plan = ctx.str_value("plan").unwrap_or("standard").to_string();
        if !KNOWN_PLANS.contains(&plan.as_str()) {
            return Ok(StepResult::failed(step, format!("unknown plan: {plan}")));
        }
        ctx.insert("plan", json!(plan));

        Ok(StepResult::ok(step, "signup data valid").with_data(json!({"plan": plan})))
    }
}

struct CreateAccount {
    customers: Arc<dyn CustomerDirectory>,
}

#[async_trait]
impl StepHandler for CreateAccount {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let email = ctx.require_str("email")?;
        let name = ctx.require_str("name")?;
        let plan = ctx.require_str("plan")?;

        let customer_id = self
            .customers
            .create_customer(ctx.tenant_id, &email, &name, &plan)
            .await?;
        ctx.insert("customer_id", json!(customer_id));

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            customer_id = %customer_id,
            "customer account created"
        );
        Ok(StepResult::ok("create_account", format!("account {customer_id} created"))
            .with_data(json!({"customer_id": customer_id})))
    }
}

struct DeleteAccount {
    customers: Arc<dyn CustomerDirectory>,
}

#[async_trait]
impl StepHandler for DeleteAccount {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let Some(customer_id) = ctx.str_value("customer_id").map(str::to_owned) else {
            return Ok(StepResult::ok("rollback_create_account", "no account to remove"));
        };
        self.customers.delete_customer(ctx.tenant_id, &customer_id).await?;
        Ok(StepResult::ok(
            "rollback_create_account",
            format!("account {customer_id} removed"),
        ))
    }
}

struct SetupBilling {
    billing: Arc<dyn BillingService>,
}

#[async_trait]
impl StepHandler for SetupBilling {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let customer_id = ctx.require_str("customer_id")?;
        let plan = ctx.require_str("plan")?;
        let monthly_value = ctx
            .f64_value("monthly_value")
            .unwrap_or_else(|| plan_monthly_value(&plan));

        // The subscription exists before any pause, so a later rejection
        // has something concrete to compensate.
        let subscription_id = self
            .billing
            .create_subscription(ctx.tenant_id, &customer_id, &plan, monthly_value)
            .await?;
        ctx.insert("subscription_id", json!(subscription_id));
        ctx.insert("monthly_value", json!(monthly_value));

        let threshold = ctx.f64_value("approval_threshold").unwrap_or(f64::INFINITY);
        if monthly_value > threshold {
            tracing::info!(
                workflow_id = %ctx.workflow_id,
                monthly_value,
                threshold,
                "billing setup paused for approval"
            );
            return Ok(StepResult::needs_approval(
                "setup_billing",
                format!("monthly value {monthly_value:.2} exceeds approval threshold"),
                json!({
                    "monthly_value": monthly_value,
                    "approval_threshold": threshold,
                    "subscription_id": subscription_id,
                }),
            ));
        }

        Ok(StepResult::ok("setup_billing", format!("subscription {subscription_id} created"))
            .with_data(json!({"subscription_id": subscription_id, "monthly_value": monthly_value})))
    }
}

struct CancelBilling {
    billing: Arc<dyn BillingService>,
}

#[async_trait]
impl StepHandler for CancelBilling {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let Some(subscription_id) = ctx.str_value("subscription_id").map(str::to_owned) else {
            return Ok(StepResult::ok("rollback_setup_billing", "no subscription to cancel"));
        };
        self.billing
            .cancel_subscription(ctx.tenant_id, &subscription_id)
            .await?;
        Ok(StepResult::ok(
            "rollback_setup_billing",
            format!("subscription {subscription_id} cancelled"),
        ))
    }
}

struct ProvisionServices {
    provisioning: Arc<dyn ProvisioningService>,
}

#[async_trait]
impl StepHandler for ProvisionServices {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let customer_id = ctx.require_str("customer_id")?;
        let plan = ctx.require_str("plan")?;

        let provisioned = self
            .provisioning
            .provision(ctx.tenant_id, &customer_id, &plan)
            .await?;
        ctx.insert("provisioned_services", json!(provisioned));

        Ok(StepResult::ok(
            "provision_services",
            format!("{} services provisioned", provisioned.len()),
        )
        .with_data(json!({"services": provisioned})))
    }
}

struct DeprovisionServices {
    provisioning: Arc<dyn ProvisioningService>,
}

#[async_trait]
impl StepHandler for DeprovisionServices {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let services: Vec<String> = ctx
            .get("provisioned_services")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        if services.is_empty() {
            return Ok(StepResult::ok("rollback_provision_services", "nothing provisioned"));
        }

        let customer_id = ctx.require_str("customer_id")?;
        self.provisioning
            .deprovision(ctx.tenant_id, &customer_id, &services)
            .await?;
        Ok(StepResult::ok(
            "rollback_provision_services",
            format!("{} services deprovisioned", services.len()),
        ))
    }
}

struct SendWelcome {
    notifications: Arc<dyn NotificationService>,
}

#[async_trait]
impl StepHandler for SendWelcome {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let email = ctx.require_str("email")?;
        let name = ctx.require_str("name")?;
        self.notifications
            .send(
                ctx.tenant_id,
                &email,
                "Welcome aboard",
                &format!("Hi {name}, your account is ready."),
            )
            .await?;
        Ok(StepResult::ok("send_welcome", format!("welcome sent to {email}")))
    }
}

struct Finalize {
    customers: Arc<dyn CustomerDirectory>,
}

#[async_trait]
impl StepHandler for Finalize {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        if !ctx.bool_value("auto_activate") {
            return Ok(StepResult::ok("finalize", "onboarding complete, activation deferred"));
        }
        let customer_id = ctx.require_str("customer_id")?;
        self.customers
            .activate_customer(ctx.tenant_id, &customer_id)
            .await?;
        Ok(StepResult::ok("finalize", format!("account {customer_id} activated")))
    }
}
