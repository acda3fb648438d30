//! In-memory store implementations for development and testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use curbside_core::{
    CollectionIntent, HistoricalVisit, IntentKind, PendingSelection, PickupDaySource,
    PickupFrequency, Property, PropertyStatus, SyncOrder,
};
use uuid::Uuid;

use crate::{
    AuditEntry, AuditLog, BillingGateway, IntentStore, LedgerStore, Notifier, PropertyStore,
    SelectionStore, StoreError,
};

/// One struct backing every store trait, so a single instance can be shared
/// across the sync layer in tests and dry runs.
#[derive(Default)]
pub struct MemoryStores {
    properties: RwLock<HashMap<Uuid, Property>>,
    visits: RwLock<HashMap<Uuid, Vec<HistoricalVisit>>>,
    orders: RwLock<BTreeMap<String, SyncOrder>>,
    intents: RwLock<Vec<CollectionIntent>>,
    selections: RwLock<Vec<PendingSelection>>,
    audit: RwLock<Vec<AuditEntry>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Internal("store lock poisoned".to_string())
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(&self, property: Property) {
        self.properties
            .write()
            .expect("lock")
            .insert(property.id, property);
    }

    pub fn add_visits(&self, property_id: Uuid, visits: Vec<HistoricalVisit>) {
        self.visits
            .write()
            .expect("lock")
            .entry(property_id)
            .or_default()
            .extend(visits);
    }

    pub fn add_intent(&self, intent: CollectionIntent) {
        self.intents.write().expect("lock").push(intent);
    }

    pub fn add_selection(&self, selection: PendingSelection) {
        self.selections.write().expect("lock").push(selection);
    }

    pub fn property(&self, id: Uuid) -> Option<Property> {
        self.properties.read().expect("lock").get(&id).cloned()
    }

    pub fn orders(&self) -> Vec<SyncOrder> {
        self.orders.read().expect("lock").values().cloned().collect()
    }

    pub fn pending_selections(&self) -> Vec<PendingSelection> {
        self.selections.read().expect("lock").clone()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.read().expect("lock").clone()
    }
}

#[async_trait]
impl PropertyStore for MemoryStores {
    async fn properties_for_sync(&self) -> Result<Vec<Property>, StoreError> {
        let properties = self.properties.read().map_err(poisoned)?;
        Ok(properties
            .values()
            .filter(|p| p.status == PropertyStatus::Approved && p.subscription_active)
            .cloned()
            .collect())
    }

    async fn property_by_id(&self, id: Uuid) -> Result<Option<Property>, StoreError> {
        Ok(self.properties.read().map_err(poisoned)?.get(&id).cloned())
    }

    async fn approved_without_pickup_day(&self) -> Result<Vec<Property>, StoreError> {
        let properties = self.properties.read().map_err(poisoned)?;
        Ok(properties
            .values()
            .filter(|p| p.status == PropertyStatus::Approved && p.pickup_day.is_none())
            .cloned()
            .collect())
    }

    async fn update_pickup_day(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError> {
        let mut properties = self.properties.write().map_err(poisoned)?;
        let property = properties
            .get_mut(&id)
            .ok_or_else(|| StoreError::Internal(format!("unknown property {id}")))?;
        property.pickup_day = day;
        property.pickup_day_source = source;
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: Uuid,
        day: Option<Weekday>,
        frequency: PickupFrequency,
        source: Option<PickupDaySource>,
    ) -> Result<(), StoreError> {
        let mut properties = self.properties.write().map_err(poisoned)?;
        let property = properties
            .get_mut(&id)
            .ok_or_else(|| StoreError::Internal(format!("unknown property {id}")))?;
        property.pickup_day = day;
        property.pickup_frequency = frequency;
        property.pickup_day_source = source;
        Ok(())
    }

    async fn approve_if_pending(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut properties = self.properties.write().map_err(poisoned)?;
        match properties.get_mut(&id) {
            Some(p) if p.status == PropertyStatus::Pending => {
                p.status = PropertyStatus::Approved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn visit_history(&self, id: Uuid) -> Result<Vec<HistoricalVisit>, StoreError> {
        Ok(self
            .visits
            .read()
            .map_err(poisoned)?
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl LedgerStore for MemoryStores {
    async fn order_by_no(&self, order_no: &str) -> Result<Option<SyncOrder>, StoreError> {
        Ok(self.orders.read().map_err(poisoned)?.get(order_no).cloned())
    }

    async fn create_order(&self, order: &SyncOrder) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        // Insert-or-reactivate: the order number is the natural key, and a
        // previously deleted row comes back active when the schedule returns.
        match orders.get_mut(&order.order_no) {
            Some(existing) => existing.status = curbside_core::OrderStatus::Active,
            None => {
                orders.insert(order.order_no.clone(), order.clone());
            }
        }
        Ok(())
    }

    async fn mark_deleted(&self, order_no: &str) -> Result<(), StoreError> {
        let mut orders = self.orders.write().map_err(poisoned)?;
        if let Some(order) = orders.get_mut(order_no) {
            order.status = curbside_core::OrderStatus::Deleted;
        }
        Ok(())
    }

    async fn future_orders_for_property(
        &self,
        property_id: Uuid,
        after: NaiveDate,
    ) -> Result<Vec<SyncOrder>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        Ok(orders
            .values()
            .filter(|o| {
                o.property_id == property_id
                    && o.scheduled_date > after
                    && o.status == curbside_core::OrderStatus::Active
            })
            .cloned()
            .collect())
    }

    async fn orphaned_property_ids(&self, after: NaiveDate) -> Result<Vec<Uuid>, StoreError> {
        let orders = self.orders.read().map_err(poisoned)?;
        let properties = self.properties.read().map_err(poisoned)?;
        let mut ids: HashSet<Uuid> = HashSet::new();
        for order in orders.values() {
            if order.status != curbside_core::OrderStatus::Active || order.scheduled_date <= after {
                continue;
            }
            let still_wanted = properties
                .get(&order.property_id)
                .map(|p| p.subscription_active)
                .unwrap_or(false);
            if !still_wanted {
                ids.insert(order.property_id);
            }
        }
        let mut ids: Vec<Uuid> = ids.into_iter().collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl IntentStore for MemoryStores {
    async fn skip_requested(
        &self,
        property_id: Uuid,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let intents = self.intents.read().map_err(poisoned)?;
        Ok(intents.iter().any(|i| {
            i.property_id == property_id && i.date == date && i.kind == IntentKind::Skip
        }))
    }
}

#[async_trait]
impl SelectionStore for MemoryStores {
    async fn claim_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<PendingSelection>, StoreError> {
        let mut selections = self.selections.write().map_err(poisoned)?;
        let (claimed, remaining): (Vec<_>, Vec<_>) = selections
            .drain(..)
            .partition(|s| s.customer_id == customer_id);
        *selections = remaining;
        Ok(claimed)
    }

    async fn restore(&self, restored: Vec<PendingSelection>) -> Result<(), StoreError> {
        self.selections.write().map_err(poisoned)?.extend(restored);
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryStores {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.audit
            .write()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?
            .push(entry);
        Ok(())
    }
}

/// Scripted billing collaborator for tests: identities and failures are
/// seeded up front, created subscriptions are recorded.
#[derive(Default)]
pub struct MemoryBilling {
    valid_customers: RwLock<HashSet<Uuid>>,
    failing_products: RwLock<HashSet<String>>,
    subscriptions: RwLock<Vec<(Uuid, String, u32)>>,
}

impl MemoryBilling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_customer(&self, customer_id: Uuid) {
        self.valid_customers.write().expect("lock").insert(customer_id);
    }

    pub fn fail_product(&self, product_code: &str) {
        self.failing_products
            .write()
            .expect("lock")
            .insert(product_code.to_string());
    }

    pub fn subscriptions(&self) -> Vec<(Uuid, String, u32)> {
        self.subscriptions.read().expect("lock").clone()
    }
}

#[async_trait]
impl BillingGateway for MemoryBilling {
    async fn has_valid_identity(&self, customer_id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .valid_customers
            .read()
            .expect("lock")
            .contains(&customer_id))
    }

    async fn create_subscription(
        &self,
        customer_id: Uuid,
        product_code: &str,
        _unit_price_cents: i64,
        quantity: u32,
    ) -> anyhow::Result<()> {
        if self
            .failing_products
            .read()
            .expect("lock")
            .contains(product_code)
        {
            anyhow::bail!("billing rejected product {product_code}");
        }
        self.subscriptions
            .write()
            .expect("lock")
            .push((customer_id, product_code.to_string(), quantity));
        Ok(())
    }
}

/// Notifier that records instead of sending.
#[derive(Default)]
pub struct MemoryNotifier {
    sent: RwLock<Vec<(Uuid, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(Uuid, String)> {
        self.sent.read().expect("lock").clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(
        &self,
        customer_id: Uuid,
        template: &str,
        _context: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.sent
            .write()
            .expect("lock")
            .push((customer_id, template.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use curbside_core::{OrderStatus, PickupFrequency};

    fn property(id: Uuid, active: bool) -> Property {
        Property {
            id,
            customer_id: Uuid::new_v4(),
            address: "12 Elm St".into(),
            status: PropertyStatus::Approved,
            pickup_day: Some(Weekday::Thu),
            pickup_frequency: PickupFrequency::Weekly,
            pickup_day_source: Some(PickupDaySource::Detected),
            zone_id: None,
            latitude: None,
            longitude: None,
            subscription_active: active,
        }
    }

    fn order(property_id: Uuid, date: NaiveDate) -> SyncOrder {
        SyncOrder {
            property_id,
            order_no: curbside_core::sync_order_no(property_id, date),
            scheduled_date: date,
            status: OrderStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ledger_keeps_one_row_per_order_no_and_reactivates() {
        let stores = MemoryStores::new();
        let id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap();
        let row = order(id, date);
        stores.create_order(&row).await.unwrap();
        stores.mark_deleted(&row.order_no).await.unwrap();
        stores.create_order(&row).await.unwrap();

        let all = stores.orders();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, OrderStatus::Active);
    }

    #[tokio::test]
    async fn orphan_query_only_reports_inactive_subscriptions() {
        let stores = MemoryStores::new();
        let active = Uuid::new_v4();
        let lapsed = Uuid::new_v4();
        stores.add_property(property(active, true));
        stores.add_property(property(lapsed, false));

        let today = NaiveDate::from_ymd_opt(2026, 8, 28).unwrap();
        let future = NaiveDate::from_ymd_opt(2026, 9, 3).unwrap();
        stores.create_order(&order(active, future)).await.unwrap();
        stores.create_order(&order(lapsed, future)).await.unwrap();

        let orphans = stores.orphaned_property_ids(today).await.unwrap();
        assert_eq!(orphans, vec![lapsed]);
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_restore_puts_rows_back() {
        let stores = MemoryStores::new();
        let customer = Uuid::new_v4();
        stores.add_selection(PendingSelection {
            id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            customer_id: customer,
            product_code: "weekly-tote".into(),
            unit_price_cents: 3500,
            quantity: 1,
            requires_delivery: false,
        });

        let claimed = stores.claim_for_customer(customer).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(stores.claim_for_customer(customer).await.unwrap().is_empty());

        stores.restore(claimed).await.unwrap();
        assert_eq!(stores.pending_selections().len(), 1);
    }

    #[tokio::test]
    async fn approve_if_pending_is_single_winner() {
        let stores = MemoryStores::new();
        let mut p = property(Uuid::new_v4(), true);
        p.status = PropertyStatus::Pending;
        let id = p.id;
        stores.add_property(p);

        assert!(stores.approve_if_pending(id).await.unwrap());
        assert!(!stores.approve_if_pending(id).await.unwrap());
        assert_eq!(stores.property(id).unwrap().status, PropertyStatus::Approved);
    }
}
