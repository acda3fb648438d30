//! Disposable end-to-end probe against the router: create a throwaway
//! order, plan it, poll, classify, and always clean up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Datelike, NaiveDate, Utc, Weekday};
use curbside_core::{
    next_business_day, next_occurrence, probe_order_no, weekday_name, PickupDaySource,
};
use curbside_router::{
    CreateOrderRequest, OrderType, PlanningStatus, RouterClient, StartPlanningRequest,
};
use curbside_store::{AuditEntry, AuditLog, Notifier, PropertyStore};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::activation::{ActivationSource, SelectionActivator};

#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub poll_interval: Duration,
    pub max_poll_attempts: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_poll_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The router would serve this address. `day` is derived from the test
    /// date actually planned, which may differ from the requested target.
    Scheduled {
        day: Weekday,
        driver: Option<String>,
    },
    NotSchedulable,
    InvalidAddress,
    TimedOut,
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub order_no: String,
    pub test_date: NaiveDate,
    pub outcome: ProbeOutcome,
}

/// Run the full probe. The temporary order is force-deleted exactly once on
/// every path out, and a cleanup failure never changes the verdict.
pub async fn probe_feasibility(
    router: &dyn RouterClient,
    property_id: Uuid,
    address: &str,
    target_day: Option<Weekday>,
    config: &ProbeConfig,
    today: NaiveDate,
) -> ProbeReport {
    let test_date = match target_day {
        Some(day) => next_occurrence(day, today),
        None => next_business_day(today),
    };
    let order_no = probe_order_no(property_id, Utc::now());

    let outcome = match run_probe(router, &order_no, address, test_date, config).await {
        Ok(outcome) => outcome,
        Err(err) => ProbeOutcome::Error {
            message: format!("{err:#}"),
        },
    };

    if let Err(err) = router.delete_order(&order_no, true).await {
        warn!(%order_no, error = %err, "probe cleanup failed");
    }

    ProbeReport {
        order_no,
        test_date,
        outcome,
    }
}

async fn run_probe(
    router: &dyn RouterClient,
    order_no: &str,
    address: &str,
    test_date: NaiveDate,
    config: &ProbeConfig,
) -> anyhow::Result<ProbeOutcome> {
    router
        .create_order(&CreateOrderRequest {
            order_no: order_no.to_string(),
            order_type: OrderType::Pickup,
            date: test_date,
            address: address.to_string(),
            location_name: Some("feasibility probe".to_string()),
            duration_minutes: Some(5),
            notes: None,
        })
        .await
        .context("creating probe order")?;

    let planning = router
        .start_planning(&StartPlanningRequest {
            date: test_date,
            use_orders: vec![order_no.to_string()],
            start_with: None,
        })
        .await
        .context("starting probe planning")?;

    if planning
        .orders_with_invalid_location
        .iter()
        .any(|o| o == order_no)
    {
        return Ok(ProbeOutcome::InvalidAddress);
    }

    let mut finished = false;
    for _ in 0..config.max_poll_attempts {
        let status = router
            .get_planning_status(&planning.planning_id)
            .await
            .context("polling probe planning status")?;
        if status == PlanningStatus::Finished {
            finished = true;
            break;
        }
        tokio::time::sleep(config.poll_interval).await;
    }
    if !finished {
        return Ok(ProbeOutcome::TimedOut);
    }

    let info = router
        .get_scheduling_info(order_no)
        .await
        .context("fetching probe scheduling info")?;
    if info.order_scheduled {
        Ok(ProbeOutcome::Scheduled {
            day: test_date.weekday(),
            driver: info.schedule_information.and_then(|s| s.driver_name),
        })
    } else {
        Ok(ProbeOutcome::NotSchedulable)
    }
}

/// Probe-then-approve: audit the verdict, and on a feasible address win the
/// approval race before committing the confirmed day and activating
/// billing.
pub struct ApprovalFlow {
    router: Arc<dyn RouterClient>,
    properties: Arc<dyn PropertyStore>,
    activator: SelectionActivator,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    probe_config: ProbeConfig,
}

impl ApprovalFlow {
    pub fn new(
        router: Arc<dyn RouterClient>,
        properties: Arc<dyn PropertyStore>,
        activator: SelectionActivator,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        probe_config: ProbeConfig,
    ) -> Self {
        Self {
            router,
            properties,
            activator,
            notifier,
            audit,
            probe_config,
        }
    }

    pub async fn run(
        &self,
        property_id: Uuid,
        target_day: Option<Weekday>,
    ) -> anyhow::Result<ProbeReport> {
        let property = self
            .properties
            .property_by_id(property_id)
            .await?
            .with_context(|| format!("unknown property {property_id}"))?;

        let report = probe_feasibility(
            self.router.as_ref(),
            property_id,
            &property.address,
            target_day,
            &self.probe_config,
            Utc::now().date_naive(),
        )
        .await;

        let entry = AuditEntry::system(
            "feasibility_probe",
            Some(property_id),
            serde_json::json!({
                "order_no": report.order_no,
                "test_date": report.test_date,
                "outcome": report.outcome,
            }),
        );
        if let Err(err) = self.audit.record(entry).await {
            warn!(%property_id, error = %err, "audit write failed");
        }

        if let ProbeOutcome::Scheduled { day, .. } = &report.outcome {
            // Approve only if no human decision landed first.
            if self.properties.approve_if_pending(property_id).await? {
                self.properties
                    .update_pickup_day(
                        property_id,
                        Some(*day),
                        Some(PickupDaySource::FeasibilityConfirmed),
                    )
                    .await?;

                let outcome = self
                    .activator
                    .activate_for_customer(property.customer_id, ActivationSource::AutoApproval)
                    .await?;

                if outcome.worth_notifying() {
                    let context = serde_json::json!({
                        "pickup_day": weekday_name(*day),
                        "activated": outcome.activated,
                    });
                    if let Err(err) = self
                        .notifier
                        .send(property.customer_id, "property_approved", context)
                        .await
                    {
                        warn!(%property_id, error = %err, "approval notification failed");
                    }
                }
            }
        }

        Ok(report)
    }
}
