//! Invoice generation workflow
//!
//! Six steps: validate the request, calculate amounts (pausing for approval
//! when the total exceeds the caller's threshold), create the invoice
//! record, render the document, deliver it over the requested channels, and
//! collect payment. The invoice record and the charge carry compensating
//! actions. Delivery is best effort per channel: one successful channel is
//! enough, and a channel failure alone never rolls the invoice back.

use crate::services::{
    BillingService, DeliveryService, DiscountService, DocumentService, PaymentService, TaxService,
};
use async_trait::async_trait;
use saga_engine::{DispatchTable, StepContext, StepHandler};
use saga_types::StepResult;
use serde_json::{json, Value};
use std::sync::Arc;

/// Workflow type tag for registration and starting.
pub const WORKFLOW_TYPE: &str = "invoice_generation";

/// External services the invoicing steps call.
#[derive(Clone)]
pub struct InvoiceServices {
    pub billing: Arc<dyn BillingService>,
    pub taxes: Arc<dyn TaxService>,
    pub discounts: Arc<dyn DiscountService>,
    pub documents: Arc<dyn DocumentService>,
    pub delivery: Arc<dyn DeliveryService>,
    pub payments: Arc<dyn PaymentService>,
}

/// Build the invoicing dispatch table over the given services.
pub fn dispatch_table(services: InvoiceServices) -> DispatchTable {
    DispatchTable::builder(WORKFLOW_TYPE)
        .step("validate_request", Arc::new(ValidateRequest))
        .step(
            "calculate_amounts",
            Arc::new(CalculateAmounts {
                taxes: services.taxes,
                discounts: services.discounts,
            }),
        )
        .step_with_compensation(
            "create_invoice_record",
            Arc::new(CreateInvoiceRecord {
                billing: services.billing.clone(),
            }),
            Arc::new(VoidInvoiceRecord {
                billing: services.billing,
            }),
        )
        .step(
            "generate_document",
            Arc::new(GenerateDocument {
                documents: services.documents,
            }),
        )
        .step(
            "deliver_invoice",
            Arc::new(DeliverInvoice {
                delivery: services.delivery,
            }),
        )
        .step_with_compensation(
            "process_payment",
            Arc::new(ProcessPayment {
                payments: services.payments.clone(),
            }),
            Arc::new(RefundPayment {
                payments: services.payments,
            }),
        )
        .build()
}

struct ValidateRequest;

#[async_trait]
impl StepHandler for ValidateRequest {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let step = "validate_request";

        if ctx.str_value("customer_id").map_or(true, str::is_empty) {
            return Ok(StepResult::failed(step, "missing required field 'customer_id'"));
        }

        let Some(items) = ctx.get("line_items").and_then(Value::as_array) else {
            return Ok(StepResult::failed(step, "missing required field 'line_items'"));
        };
        if items.is_empty() {
            return Ok(StepResult::failed(step, "line_items must not be empty"));
        }
        for (idx, item) in items.iter().enumerate() {
            let quantity = item.get("quantity").and_then(Value::as_f64);
            let unit_price = item.get("unit_price").and_then(Value::as_f64);
            if quantity.is_none() || unit_price.is_none() {
                return Ok(StepResult::failed(
                    step,
                    format!("line item {idx} needs numeric 'quantity' and 'unit_price'"),
                ));
            }
        }

        Ok(StepResult::ok(step, format!("{} line items valid", items.len())))
    }
}

struct CalculateAmounts {
    taxes: Arc<dyn TaxService>,
    discounts: Arc<dyn DiscountService>,
}

#[async_trait]
impl StepHandler for CalculateAmounts {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let customer_id = ctx.require_str("customer_id")?;

        // Validated upstream; missing fields contribute zero.
        let subtotal: f64 = ctx
            .get("line_items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|item| {
                        let quantity = item.get("quantity").and_then(Value::as_f64).unwrap_or(0.0);
                        let unit_price =
                            item.get("unit_price").and_then(Value::as_f64).unwrap_or(0.0);
                        quantity * unit_price
                    })
                    .sum()
            })
            .unwrap_or(0.0);

        let discount = self
            .discounts
            .discount_for(ctx.tenant_id, &customer_id, subtotal)
            .await?;
        let tax = self.taxes.tax_for(ctx.tenant_id, subtotal - discount).await?;
        let total = subtotal - discount + tax;

        ctx.insert("subtotal", json!(subtotal));
        ctx.insert("discount", json!(discount));
        ctx.insert("tax", json!(tax));
        ctx.insert("total", json!(total));

        let threshold = ctx.f64_value("approval_threshold").unwrap_or(f64::INFINITY);
        if total > threshold {
            return Ok(StepResult::needs_approval(
                "calculate_amounts",
                format!("invoice total {total:.2} exceeds approval threshold"),
                json!({"total": total, "approval_threshold": threshold}),
            ));
        }

        Ok(StepResult::ok("calculate_amounts", format!("invoice total {total:.2}"))
            .with_data(json!({
                "subtotal": subtotal,
                "discount": discount,
                "tax": tax,
                "total": total,
            })))
    }
}

struct CreateInvoiceRecord {
    billing: Arc<dyn BillingService>,
}

#[async_trait]
impl StepHandler for CreateInvoiceRecord {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let customer_id = ctx.require_str("customer_id")?;
        let amounts = json!({
            "subtotal": ctx.f64_value("subtotal").unwrap_or(0.0),
            "discount": ctx.f64_value("discount").unwrap_or(0.0),
            "tax": ctx.f64_value("tax").unwrap_or(0.0),
            "total": ctx.f64_value("total").unwrap_or(0.0),
        });

        let invoice_id = self
            .billing
            .create_invoice(ctx.tenant_id, &customer_id, &amounts)
            .await?;
        ctx.insert("invoice_id", json!(invoice_id));

        tracing::info!(
            workflow_id = %ctx.workflow_id,
            invoice_id = %invoice_id,
            "invoice record created"
        );
        Ok(StepResult::ok("create_invoice_record", format!("invoice {invoice_id} created"))
            .with_data(json!({"invoice_id": invoice_id})))
    }
}

struct VoidInvoiceRecord {
    billing: Arc<dyn BillingService>,
}

#[async_trait]
impl StepHandler for VoidInvoiceRecord {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let Some(invoice_id) = ctx.str_value("invoice_id").map(str::to_owned) else {
            return Ok(StepResult::ok("rollback_create_invoice_record", "no invoice to void"));
        };
        self.billing.void_invoice(ctx.tenant_id, &invoice_id).await?;
        Ok(StepResult::ok(
            "rollback_create_invoice_record",
            format!("invoice {invoice_id} voided"),
        ))
    }
}

struct GenerateDocument {
    documents: Arc<dyn DocumentService>,
}

#[async_trait]
impl StepHandler for GenerateDocument {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let invoice_id = ctx.require_str("invoice_id")?;
        let payload = json!({
            "customer_id": ctx.str_value("customer_id"),
            "line_items": ctx.get("line_items"),
            "total": ctx.f64_value("total"),
        });

        let document_ref = self
            .documents
            .render_invoice(ctx.tenant_id, &invoice_id, &payload)
            .await?;
        ctx.insert("document_ref", json!(document_ref));

        Ok(StepResult::ok("generate_document", format!("document {document_ref} rendered")))
    }
}

struct DeliverInvoice {
    delivery: Arc<dyn DeliveryService>,
}

#[async_trait]
impl StepHandler for DeliverInvoice {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let document_ref = ctx.require_str("document_ref")?;
        let recipient = ctx
            .str_value("recipient")
            .map(str::to_owned)
            .unwrap_or(ctx.require_str("customer_id")?);
        let channels: Vec<String> = ctx
            .get("delivery_channels")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_else(|| vec!["email".into()]);

        let mut delivered = Vec::new();
        let mut failed = Vec::new();
        for channel in &channels {
            match self
                .delivery
                .deliver(ctx.tenant_id, channel, &recipient, &document_ref)
                .await
            {
                Ok(()) => delivered.push(channel.clone()),
                Err(err) => {
                    tracing::warn!(
                        workflow_id = %ctx.workflow_id,
                        channel = %channel,
                        error = %err,
                        "invoice delivery failed on channel"
                    );
                    failed.push(channel.clone());
                }
            }
        }

        let data = json!({"delivered": delivered, "failed": failed});
        if delivered.is_empty() {
            return Ok(StepResult::failed(
                "deliver_invoice",
                format!("all {} delivery channels failed", channels.len()),
            )
            .with_data(data));
        }
        Ok(StepResult::ok(
            "deliver_invoice",
            format!("delivered on {} of {} channels", delivered.len(), channels.len()),
        )
        .with_data(data))
    }
}

struct ProcessPayment {
    payments: Arc<dyn PaymentService>,
}

#[async_trait]
impl StepHandler for ProcessPayment {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let step = "process_payment";
        if !ctx.bool_value("auto_payment") {
            return Ok(StepResult::ok(step, "auto payment disabled, awaiting manual payment"));
        }

        let customer_id = ctx.require_str("customer_id")?;
        let Some(method) = self.payments.default_method(ctx.tenant_id, &customer_id).await? else {
            return Ok(StepResult::ok(step, "no default payment method on file"));
        };

        let total = ctx.f64_value("total").unwrap_or(0.0);
        let payment_id = self
            .payments
            .charge(ctx.tenant_id, &customer_id, &method, total)
            .await?;
        ctx.insert("payment_id", json!(payment_id));

        Ok(StepResult::ok(step, format!("payment {payment_id} collected"))
            .with_data(json!({"payment_id": payment_id, "amount": total})))
    }
}

struct RefundPayment {
    payments: Arc<dyn PaymentService>,
}

#[async_trait]
impl StepHandler for RefundPayment {
    async fn run(&self, ctx: &mut StepContext<'_>) -> anyhow::Result<StepResult> {
        let Some(payment_id) = ctx.str_value("payment_id").map(str::to_owned) else {
            return Ok(StepResult::ok("rollback_process_payment", "no payment to refund"));
        };
        self.payments.refund(ctx.tenant_id, &payment_id).await?;
        Ok(StepResult::ok(
            "rollback_process_payment",
            format!("payment {payment_id} refunded"),
        ))
    }
}
