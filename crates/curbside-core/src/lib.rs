//! Core domain model and pure scheduling algorithms for Curbside.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod cadence;
pub mod detect;
pub mod geo;

pub use cadence::{generate_pickup_dates, next_business_day, next_occurrence, pickup_dates_for};
pub use detect::{detect_pickup_day, DetectedDay};
pub use geo::{distance_miles, Coordinates};

pub const CRATE_NAME: &str = "curbside-core";

/// How often a property is visited. Unknown inputs collapse to weekly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PickupFrequency {
    #[default]
    Weekly,
    BiWeekly,
    Monthly,
}

impl PickupFrequency {
    /// Days between visits. Monthly is a fixed four-week period, not a
    /// calendar month.
    pub fn interval_days(self) -> i64 {
        match self {
            PickupFrequency::Weekly => 7,
            PickupFrequency::BiWeekly => 14,
            PickupFrequency::Monthly => 28,
        }
    }

    pub fn parse(input: &str) -> Self {
        match input.to_ascii_lowercase().as_str() {
            "bi-weekly" | "biweekly" => PickupFrequency::BiWeekly,
            "monthly" => PickupFrequency::Monthly,
            _ => PickupFrequency::Weekly,
        }
    }
}

/// Who last set a property's pickup day. A `Manual` value is never
/// overwritten by automated detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickupDaySource {
    Manual,
    Detected,
    RouteOptimized,
    FeasibilityConfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Pending,
    Approved,
    Rejected,
}

/// A serviced address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub address: String,
    pub status: PropertyStatus,
    pub pickup_day: Option<Weekday>,
    pub pickup_frequency: PickupFrequency,
    pub pickup_day_source: Option<PickupDaySource>,
    pub zone_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub subscription_active: bool,
}

impl Property {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Completed,
    Missed,
    Scheduled,
    Cancelled,
    #[serde(other)]
    Other,
}

/// One past attempted pickup, sourced from the router's completion data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalVisit {
    pub date: NaiveDate,
    pub status: VisitStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Deleted,
}

/// Ledger row: one order this core has asked the router to service.
/// `order_no` is the natural key; rows are marked deleted, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOrder {
    pub property_id: Uuid,
    pub order_no: String,
    pub scheduled_date: NaiveDate,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Draft,
    Open,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl RouteStatus {
    /// Statuses that make a route usable as insertion-cost input.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RouteStatus::Open
                | RouteStatus::Assigned
                | RouteStatus::InProgress
                | RouteStatus::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub stop_number: u32,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl RouteStop {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }
}

/// An already-scheduled set of visits for one day, read-only input to the
/// insertion-cost optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: String,
    pub date: NaiveDate,
    pub status: RouteStatus,
    pub stops: Vec<RouteStop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Out,
    Skip,
}

/// An explicit customer override for one property on one date. A `Skip`
/// suppresses order creation for that date without changing the cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIntent {
    pub property_id: Uuid,
    pub date: NaiveDate,
    pub kind: IntentKind,
}

/// A not-yet-billed service choice awaiting address approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSelection {
    pub id: Uuid,
    pub property_id: Uuid,
    pub customer_id: Uuid,
    pub product_code: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
    pub requires_delivery: bool,
}

/// Case-insensitive weekday-name parsing. Unknown names are `None`, not an
/// error, so callers can treat a bad day as "no schedule".
pub fn parse_weekday(input: &str) -> Option<Weekday> {
    match input.to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

fn property_id_prefix(property_id: Uuid) -> String {
    property_id.simple().to_string()[..8].to_ascii_uppercase()
}

/// Deterministic order number for a recurring sync order. Doubles as the
/// ledger's natural key, so the same (property, date) can never be
/// scheduled twice.
pub fn sync_order_no(property_id: Uuid, date: NaiveDate) -> String {
    format!(
        "SYNC-{}-{}",
        property_id_prefix(property_id),
        date.format("%Y%m%d")
    )
}

/// Order number for a throwaway feasibility-probe order.
pub fn probe_order_no(property_id: Uuid, at: DateTime<Utc>) -> String {
    format!(
        "FEASIBILITY-{}-{}",
        property_id_prefix(property_id),
        at.timestamp_millis()
    )
}
