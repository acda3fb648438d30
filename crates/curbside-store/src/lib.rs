//! Persistence boundary and external-collaborator contracts.
//!
//! Every store is a trait so the sync layer can run against Postgres in
//! production and in-memory fakes in tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use curbside_core::{
    HistoricalVisit, PendingSelection, PickupDaySource, PickupFrequency, Property, SyncOrder,
};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod pg;

pub use memory::MemoryStores;
pub use pg::PgStores;

pub const CRATE_NAME: &str = "curbside-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Properties eligible for the daily reconciliation pass: approved, with
    /// an active subscription.
    async fn properties_for_sync(&self) -> Result<Vec<Property>, StoreError>;

    async fn property_by_id(&self, id: Uuid) -> Result<Option<Property>, StoreError>;

    /// Approved properties still lacking an assigned pickup day.
    async fn approved_without_pickup_day(&self) -> Result<Vec<Property>, StoreError>;

    /// Persist a pickup day (or clear it) along with its provenance.
    async fn update_pickup_day(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError>;

    /// Admin schedule edit: day, frequency, and provenance in one write.
    async fn update_schedule(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        frequency: PickupFrequency,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError>;

    /// Compare-and-swap approval: flips a pending property to approved and
    /// reports whether this caller won the transition.
    async fn approve_if_pending(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn visit_history(&self, id: Uuid) -> Result<Vec<HistoricalVisit>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn order_by_no(&self, order_no: &str) -> Result<Option<SyncOrder>, StoreError>;

    async fn create_order(&self, order: &SyncOrder) -> Result<(), StoreError>;

    /// Rows are transitioned, never removed, so dedup and audit history
    /// survive.
    async fn mark_deleted(&self, order_no: &str) -> Result<(), StoreError>;

    async fn future_orders_for_property(
        &self,
        property_id: Uuid,
        after: NaiveDate,
    ) -> Result<Vec<SyncOrder>, StoreError>;

    /// Properties whose subscription no longer justifies visits but which
    /// still hold future active ledger rows.
    async fn orphaned_property_ids(&self, after: NaiveDate) -> Result<Vec<Uuid>, StoreError>;
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Whether the customer asked to skip this property on this date.
    async fn skip_requested(&self, property_id: Uuid, date: NaiveDate)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait SelectionStore: Send + Sync {
    /// Atomically read-and-remove every pending selection for a customer.
    /// Whichever caller wins the claim owns activation for those rows.
    async fn claim_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<PendingSelection>, StoreError>;

    /// Put claimed selections back, for callers that claimed before a
    /// validation failure.
    async fn restore(&self, selections: Vec<PendingSelection>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn has_valid_identity(&self, customer_id: Uuid) -> anyhow::Result<bool>;

    async fn create_subscription(
        &self,
        customer_id: Uuid,
        product_code: &str,
        unit_price_cents: i64,
        quantity: u32,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        customer_id: Uuid,
        template: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub subject_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn system(action: &str, subject_id: Option<Uuid>, details: serde_json::Value) -> Self {
        Self {
            actor: "system".to_string(),
            action: action.to_string(),
            subject_id,
            details,
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append-only; implementations must not fail the caller's flow over a
    /// lost audit row beyond returning the error.
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Gateway for deployments without a billing integration configured:
/// every identity check fails, so automatic activation never bills anyone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBilling;

#[async_trait]
impl BillingGateway for DisabledBilling {
    async fn has_valid_identity(&self, _customer_id: Uuid) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn create_subscription(
        &self,
        _customer_id: Uuid,
        _product_code: &str,
        _unit_price_cents: i64,
        _quantity: u32,
    ) -> anyhow::Result<()> {
        anyhow::bail!("billing gateway not configured")
    }
}

/// Notifier that only writes to the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        customer_id: Uuid,
        template: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<()> {
        tracing::info!(%customer_id, template, %context, "notification");
        Ok(())
    }
}
