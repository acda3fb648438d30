//! Postgres-backed store implementations.

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use curbside_core::{
    parse_weekday, weekday_name, HistoricalVisit, OrderStatus, PendingSelection, PickupDaySource,
    PickupFrequency, Property, PropertyStatus, SyncOrder, VisitStatus,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{
    AuditEntry, AuditLog, IntentStore, LedgerStore, PropertyStore, SelectionStore, StoreError,
};

#[derive(Debug, Clone)]
pub struct PgStores {
    pool: PgPool,
}

impl PgStores {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Internal(err.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn property_status_from_text(text: &str) -> PropertyStatus {
    match text {
        "approved" => PropertyStatus::Approved,
        "rejected" => PropertyStatus::Rejected,
        _ => PropertyStatus::Pending,
    }
}

fn property_status_to_text(status: PropertyStatus) -> &'static str {
    match status {
        PropertyStatus::Pending => "pending",
        PropertyStatus::Approved => "approved",
        PropertyStatus::Rejected => "rejected",
    }
}

fn day_source_from_text(text: &str) -> Option<PickupDaySource> {
    match text {
        "manual" => Some(PickupDaySource::Manual),
        "detected" => Some(PickupDaySource::Detected),
        "route_optimized" => Some(PickupDaySource::RouteOptimized),
        "feasibility_confirmed" => Some(PickupDaySource::FeasibilityConfirmed),
        _ => None,
    }
}

fn day_source_to_text(source: PickupDaySource) -> &'static str {
    match source {
        PickupDaySource::Manual => "manual",
        PickupDaySource::Detected => "detected",
        PickupDaySource::RouteOptimized => "route_optimized",
        PickupDaySource::FeasibilityConfirmed => "feasibility_confirmed",
    }
}

fn frequency_to_text(frequency: PickupFrequency) -> &'static str {
    match frequency {
        PickupFrequency::Weekly => "weekly",
        PickupFrequency::BiWeekly => "bi-weekly",
        PickupFrequency::Monthly => "monthly",
    }
}

fn visit_status_from_text(text: &str) -> VisitStatus {
    match text {
        "completed" => VisitStatus::Completed,
        "missed" => VisitStatus::Missed,
        "scheduled" => VisitStatus::Scheduled,
        "cancelled" => VisitStatus::Cancelled,
        _ => VisitStatus::Other,
    }
}

fn row_to_property(row: &PgRow) -> Result<Property, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let pickup_day: Option<String> = row.try_get("pickup_day")?;
    let frequency: String = row.try_get("pickup_frequency")?;
    let source: Option<String> = row.try_get("pickup_day_source")?;
    Ok(Property {
        id: row.try_get("id")?,
        customer_id: row.try_get("customer_id")?,
        address: row.try_get("address")?,
        status: property_status_from_text(&status),
        pickup_day: pickup_day.as_deref().and_then(parse_weekday),
        pickup_frequency: PickupFrequency::parse(&frequency),
        pickup_day_source: source.as_deref().and_then(day_source_from_text),
        zone_id: row.try_get("zone_id")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        subscription_active: row.try_get("subscription_active")?,
    })
}

fn row_to_order(row: &PgRow) -> Result<SyncOrder, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(SyncOrder {
        property_id: row.try_get("property_id")?,
        order_no: row.try_get("order_no")?,
        scheduled_date: row.try_get("scheduled_date")?,
        status: if status == "deleted" {
            OrderStatus::Deleted
        } else {
            OrderStatus::Active
        },
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_selection(row: &PgRow) -> Result<PendingSelection, sqlx::Error> {
    let quantity: i32 = row.try_get("quantity")?;
    Ok(PendingSelection {
        id: row.try_get("id")?,
        property_id: row.try_get("property_id")?,
        customer_id: row.try_get("customer_id")?,
        product_code: row.try_get("product_code")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        quantity: quantity.max(0) as u32,
        requires_delivery: row.try_get("requires_delivery")?,
    })
}

const PROPERTY_COLUMNS: &str = "id, customer_id, address, status, pickup_day, pickup_frequency, \
     pickup_day_source, zone_id, latitude, longitude, subscription_active";

#[async_trait]
impl PropertyStore for PgStores {
    async fn properties_for_sync(&self) -> Result<Vec<Property>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties \
             WHERE status = $1 AND subscription_active ORDER BY id"
        ))
        .bind(property_status_to_text(PropertyStatus::Approved))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_property(r).map_err(StoreError::from))
            .collect()
    }

    async fn property_by_id(&self, id: Uuid) -> Result<Option<Property>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(|r| row_to_property(r).map_err(StoreError::from))
            .transpose()
    }

    async fn approved_without_pickup_day(&self) -> Result<Vec<Property>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties \
             WHERE status = $1 AND pickup_day IS NULL ORDER BY id"
        ))
        .bind(property_status_to_text(PropertyStatus::Approved))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_property(r).map_err(StoreError::from))
            .collect()
    }

    async fn update_pickup_day(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE properties SET pickup_day = $2, pickup_day_source = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(day.map(weekday_name))
        .bind(source.map(day_source_to_text))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        frequency: PickupFrequency,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE properties \
                SET pickup_day = $2, pickup_frequency = $3, pickup_day_source = $4 \
              WHERE id = $1",
        )
        .bind(id)
        .bind(day.map(weekday_name))
        .bind(frequency_to_text(frequency))
        .bind(source.map(day_source_to_text))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn approve_if_pending(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE properties SET status = 'approved' WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn visit_history(&self, id: Uuid) -> Result<Vec<HistoricalVisit>, StoreError> {
        let rows = sqlx::query(
            "SELECT date, status FROM historical_visits WHERE property_id = $1 ORDER BY date",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let mut visits = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status")?;
            visits.push(HistoricalVisit {
                date: row.try_get("date")?,
                status: visit_status_from_text(&status),
            });
        }
        Ok(visits)
    }
}

#[async_trait]
impl LedgerStore for PgStores {
    async fn order_by_no(&self, order_no: &str) -> Result<Option<SyncOrder>, StoreError> {
        let row = sqlx::query(
            "SELECT property_id, order_no, scheduled_date, status, created_at \
             FROM sync_orders WHERE order_no = $1",
        )
        .bind(order_no)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref()
            .map(|r| row_to_order(r).map_err(StoreError::from))
            .transpose()
    }

    async fn create_order(&self, order: &SyncOrder) -> Result<(), StoreError> {
        // Insert-or-reactivate on the natural key; a deleted row for the same
        // (property, date) comes back active rather than duplicating.
        sqlx::query(
            "INSERT INTO sync_orders (order_no, property_id, scheduled_date, status, created_at) \
             VALUES ($1, $2, $3, 'active', $4) \
             ON CONFLICT (order_no) DO UPDATE SET status = 'active'",
        )
        .bind(&order.order_no)
        .bind(order.property_id)
        .bind(order.scheduled_date)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_deleted(&self, order_no: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sync_orders SET status = 'deleted' WHERE order_no = $1")
            .bind(order_no)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn future_orders_for_property(
        &self,
        property_id: Uuid,
        after: NaiveDate,
    ) -> Result<Vec<SyncOrder>, StoreError> {
        let rows = sqlx::query(
            "SELECT property_id, order_no, scheduled_date, status, created_at \
             FROM sync_orders \
             WHERE property_id = $1 AND scheduled_date > $2 AND status = 'active' \
             ORDER BY scheduled_date",
        )
        .bind(property_id)
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_order(r).map_err(StoreError::from))
            .collect()
    }

    async fn orphaned_property_ids(&self, after: NaiveDate) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT o.property_id \
               FROM sync_orders o \
               LEFT JOIN properties p ON p.id = o.property_id \
              WHERE o.status = 'active' AND o.scheduled_date > $1 \
                AND (p.id IS NULL OR NOT p.subscription_active) \
              ORDER BY o.property_id",
        )
        .bind(after)
        .fetch_all(&self.pool)
        .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            ids.push(row.try_get("property_id")?);
        }
        Ok(ids)
    }
}

#[async_trait]
impl IntentStore for PgStores {
    async fn skip_requested(
        &self,
        property_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM collection_intents \
             WHERE property_id = $1 AND date = $2 AND kind = 'skip' LIMIT 1",
        )
        .bind(property_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl SelectionStore for PgStores {
    async fn claim_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<PendingSelection>, StoreError> {
        // Single-statement delete-returning keeps the claim atomic under
        // concurrent approvers.
        let rows = sqlx::query(
            "DELETE FROM pending_selections WHERE customer_id = $1 \
             RETURNING id, property_id, customer_id, product_code, unit_price_cents, \
                       quantity, requires_delivery",
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| row_to_selection(r).map_err(StoreError::from))
            .collect()
    }

    async fn restore(&self, selections: Vec<PendingSelection>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for selection in &selections {
            sqlx::query(
                "INSERT INTO pending_selections \
                 (id, property_id, customer_id, product_code, unit_price_cents, quantity, requires_delivery) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
            )
            .bind(selection.id)
            .bind(selection.property_id)
            .bind(selection.customer_id)
            .bind(&selection.product_code)
            .bind(selection.unit_price_cents)
            .bind(selection.quantity as i32)
            .bind(selection.requires_delivery)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AuditLog for PgStores {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO audit_log (actor, action, subject_id, details, at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(entry.subject_id)
        .bind(&entry.details)
        .bind(entry.at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
