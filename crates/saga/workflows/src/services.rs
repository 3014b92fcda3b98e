//! External service contracts the reference workflows depend on
//!
//! Every side effect a workflow step performs goes through one of these
//! traits. Implementations belong to the embedding application (HTTP
//! clients, database writers); tests substitute in-memory fakes. All
//! operations are tenant-scoped and fail with `anyhow::Error` — the
//! executor converts a failed call into a failing step result.

use async_trait::async_trait;
use saga_types::TenantId;
use serde_json::Value;

/// Customer account store.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Create an account and return its id.
    async fn create_customer(
        &self,
        tenant: &TenantId,
        email: &str,
        name: &str,
        plan: &str,
    ) -> anyhow::Result<String>;

    /// Remove an account. Used as a compensating action, so implementations
    /// should tolerate an already-deleted id.
    async fn delete_customer(&self, tenant: &TenantId, customer_id: &str) -> anyhow::Result<()>;

    /// Flip an account to active.
    async fn activate_customer(&self, tenant: &TenantId, customer_id: &str) -> anyhow::Result<()>;
}

/// Subscription and invoice records.
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Create a subscription and return its id.
    async fn create_subscription(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        plan: &str,
        monthly_value: f64,
    ) -> anyhow::Result<String>;

    /// Cancel a subscription. Compensating action; tolerate repeats.
    async fn cancel_subscription(
        &self,
        tenant: &TenantId,
        subscription_id: &str,
    ) -> anyhow::Result<()>;

    /// Create an invoice record and return its id.
    async fn create_invoice(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        amounts: &Value,
    ) -> anyhow::Result<String>;

    /// Void an invoice record. Compensating action; tolerate repeats.
    async fn void_invoice(&self, tenant: &TenantId, invoice_id: &str) -> anyhow::Result<()>;
}

/// Infrastructure provisioning for a customer's plan.
#[async_trait]
pub trait ProvisioningService: Send + Sync {
    /// Provision the plan's services, returning what was provisioned.
    async fn provision(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        plan: &str,
    ) -> anyhow::Result<Vec<String>>;

    /// Tear down previously provisioned services.
    async fn deprovision(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        services: &[String],
    ) -> anyhow::Result<()>;
}

/// Outbound messages (welcome mail, alerts).
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(
        &self,
        tenant: &TenantId,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()>;
}

/// Tax calculation.
#[async_trait]
pub trait TaxService: Send + Sync {
    /// Tax owed on the given taxable amount.
    async fn tax_for(&self, tenant: &TenantId, amount: f64) -> anyhow::Result<f64>;
}

/// Customer discount lookup.
#[async_trait]
pub trait DiscountService: Send + Sync {
    /// Discount applicable to the given subtotal.
    async fn discount_for(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        subtotal: f64,
    ) -> anyhow::Result<f64>;
}

/// Invoice document rendering.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Render the invoice and return a reference to the stored document.
    async fn render_invoice(
        &self,
        tenant: &TenantId,
        invoice_id: &str,
        payload: &Value,
    ) -> anyhow::Result<String>;
}

/// Document delivery over a named channel ("email", "webhook", ...).
#[async_trait]
pub trait DeliveryService: Send + Sync {
    async fn deliver(
        &self,
        tenant: &TenantId,
        channel: &str,
        recipient: &str,
        document_ref: &str,
    ) -> anyhow::Result<()>;
}

/// Payment collection.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// The customer's default payment method, if one is on file.
    async fn default_method(
        &self,
        tenant: &TenantId,
        customer_id: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Charge the method and return the payment id.
    async fn charge(
        &self,
        tenant: &TenantId,
        customer_id: &str,
        method: &str,
        amount: f64,
    ) -> anyhow::Result<String>;

    /// Refund a previous charge. Compensating action; tolerate repeats.
    async fn refund(&self, tenant: &TenantId, payment_id: &str) -> anyhow::Result<()>;
}
