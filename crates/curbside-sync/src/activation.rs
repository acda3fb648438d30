//! Pending-selection activation with an atomic claim, so racing approval
//! paths (auto-approval, individual admin, bulk admin) cannot double-bill.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use curbside_core::{next_business_day, PendingSelection};
use curbside_router::{CreateOrderRequest, OrderType, RouterClient};
use curbside_store::{AuditEntry, AuditLog, BillingGateway, PropertyStore, SelectionStore};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    AutoApproval,
    AdminApproval,
    BulkApproval,
}

impl fmt::Display for ActivationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationSource::AutoApproval => "auto_approval",
            ActivationSource::AdminApproval => "admin_approval",
            ActivationSource::BulkApproval => "bulk_approval",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivationOutcome {
    pub claimed: usize,
    pub activated: usize,
    pub failed: usize,
    pub delivery_orders: usize,
}

impl ActivationOutcome {
    /// Whether it is safe to tell the customer they are live: at least one
    /// selection activated, or there was nothing to activate.
    pub fn worth_notifying(&self) -> bool {
        self.activated >= 1 || self.claimed == 0
    }
}

#[derive(Clone)]
pub struct SelectionActivator {
    selections: Arc<dyn SelectionStore>,
    properties: Arc<dyn PropertyStore>,
    billing: Arc<dyn BillingGateway>,
    router: Arc<dyn RouterClient>,
    audit: Arc<dyn AuditLog>,
}

impl SelectionActivator {
    pub fn new(
        selections: Arc<dyn SelectionStore>,
        properties: Arc<dyn PropertyStore>,
        billing: Arc<dyn BillingGateway>,
        router: Arc<dyn RouterClient>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            selections,
            properties,
            billing,
            router,
            audit,
        }
    }

    /// Validate the billing identity, then claim and activate every pending
    /// selection for the customer. Nothing is claimed when the identity
    /// check fails.
    pub async fn activate_for_customer(
        &self,
        customer_id: Uuid,
        source: ActivationSource,
    ) -> Result<ActivationOutcome> {
        if !self.billing.has_valid_identity(customer_id).await? {
            let outcome = ActivationOutcome::default();
            self.write_audit(customer_id, source, &outcome, false).await;
            return Ok(outcome);
        }

        let claimed = self.selections.claim_for_customer(customer_id).await?;
        let outcome = self.activate(customer_id, claimed).await;
        self.write_audit(customer_id, source, &outcome, true).await;
        Ok(outcome)
    }

    /// Variant for callers that already hold claimed rows inside their own
    /// transaction: a failed identity check restores the rows instead of
    /// losing them.
    pub async fn activate_claimed(
        &self,
        customer_id: Uuid,
        claimed: Vec<PendingSelection>,
        source: ActivationSource,
    ) -> Result<ActivationOutcome> {
        if !self.billing.has_valid_identity(customer_id).await? {
            let outcome = ActivationOutcome {
                claimed: claimed.len(),
                ..Default::default()
            };
            self.selections.restore(claimed).await?;
            self.write_audit(customer_id, source, &outcome, false).await;
            return Ok(outcome);
        }

        let outcome = self.activate(customer_id, claimed).await;
        self.write_audit(customer_id, source, &outcome, true).await;
        Ok(outcome)
    }

    async fn activate(
        &self,
        customer_id: Uuid,
        claimed: Vec<PendingSelection>,
    ) -> ActivationOutcome {
        let mut outcome = ActivationOutcome {
            claimed: claimed.len(),
            ..Default::default()
        };

        for selection in claimed {
            let result = self
                .billing
                .create_subscription(
                    customer_id,
                    &selection.product_code,
                    selection.unit_price_cents,
                    selection.quantity,
                )
                .await;
            match result {
                Ok(()) => {
                    outcome.activated += 1;
                    if selection.requires_delivery {
                        outcome.delivery_orders +=
                            self.schedule_delivery(&selection).await as usize;
                    }
                }
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        %customer_id,
                        product = %selection.product_code,
                        error = %err,
                        "selection activation failed"
                    );
                }
            }
        }
        outcome
    }

    /// Best effort: a failed delivery order never fails the activation.
    async fn schedule_delivery(&self, selection: &PendingSelection) -> bool {
        let address = match self.properties.property_by_id(selection.property_id).await {
            Ok(Some(property)) => property.address,
            Ok(None) | Err(_) => {
                warn!(
                    property_id = %selection.property_id,
                    "skipping equipment delivery: property not found"
                );
                return false;
            }
        };
        let date = next_business_day(Utc::now().date_naive());
        let order_no = format!(
            "DELIVERY-{}-{}",
            selection.property_id.simple().to_string()[..8].to_ascii_uppercase(),
            date.format("%Y%m%d")
        );
        let request = CreateOrderRequest {
            order_no,
            order_type: OrderType::Delivery,
            date,
            address,
            location_name: None,
            duration_minutes: None,
            notes: Some(format!("equipment delivery: {}", selection.product_code)),
        };
        match self.router.create_order(&request).await {
            Ok(()) => true,
            Err(curbside_router::RouterError::OrderExists) => true,
            Err(err) => {
                warn!(
                    property_id = %selection.property_id,
                    error = %err,
                    "equipment delivery order failed"
                );
                false
            }
        }
    }

    async fn write_audit(
        &self,
        customer_id: Uuid,
        source: ActivationSource,
        outcome: &ActivationOutcome,
        identity_valid: bool,
    ) {
        let entry = AuditEntry::system(
            "selection_activation",
            Some(customer_id),
            serde_json::json!({
                "source": source.to_string(),
                "identity_valid": identity_valid,
                "claimed": outcome.claimed,
                "activated": outcome.activated,
                "failed": outcome.failed,
                "delivery_orders": outcome.delivery_orders,
            }),
        );
        if let Err(err) = self.audit.record(entry).await {
            warn!(%customer_id, error = %err, "audit write failed");
        }
    }
}
