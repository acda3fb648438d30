//! Scripted router fake shared across the sync test modules.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use curbside_core::Route;
use curbside_router::{
    CreateOrderRequest, PlanningStarted, PlanningStatus, RouterClient, RouterError,
    SchedulingInfo, StartPlanningRequest,
};

#[derive(Default)]
pub struct FakeRouter {
    pub created: RwLock<Vec<CreateOrderRequest>>,
    pub deleted: RwLock<Vec<(String, bool)>>,
    /// Order numbers the router claims to already hold.
    pub existing_orders: RwLock<HashSet<String>>,
    /// Order numbers whose creation fails outright.
    pub failing_orders: RwLock<HashSet<String>>,
    pub fail_all_creates: RwLock<bool>,
    pub fail_deletes: RwLock<bool>,
    pub routes: RwLock<HashMap<NaiveDate, Vec<Route>>>,
    pub invalid_locations: RwLock<Vec<String>>,
    /// Treat every planned order as having an invalid location.
    pub invalid_all_locations: RwLock<bool>,
    /// Statuses handed out per poll; when exhausted, polls see `Running`.
    pub planning_statuses: RwLock<VecDeque<PlanningStatus>>,
    pub scheduling: RwLock<HashMap<String, SchedulingInfo>>,
    /// Scheduling info for orders not in `scheduling`; probes mint their
    /// own order numbers, so per-order scripting is not always possible.
    pub default_scheduling: RwLock<Option<SchedulingInfo>>,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&self, route: Route) {
        self.routes
            .write()
            .unwrap()
            .entry(route.date)
            .or_default()
            .push(route);
    }

    pub fn push_planning_status(&self, status: PlanningStatus) {
        self.planning_statuses.write().unwrap().push_back(status);
    }

    pub fn set_scheduling(&self, order_no: &str, info: SchedulingInfo) {
        self.scheduling
            .write()
            .unwrap()
            .insert(order_no.to_string(), info);
    }

    pub fn created_order_nos(&self) -> Vec<String> {
        self.created
            .read()
            .unwrap()
            .iter()
            .map(|r| r.order_no.clone())
            .collect()
    }

    pub fn deleted_order_nos(&self) -> Vec<String> {
        self.deleted
            .read()
            .unwrap()
            .iter()
            .map(|(no, _)| no.clone())
            .collect()
    }
}

#[async_trait]
impl RouterClient for FakeRouter {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<(), RouterError> {
        if *self.fail_all_creates.read().unwrap() {
            return Err(RouterError::Status {
                status: 500,
                url: "fake://orders".into(),
            });
        }
        if self
            .failing_orders
            .read()
            .unwrap()
            .contains(&request.order_no)
        {
            return Err(RouterError::Status {
                status: 500,
                url: "fake://orders".into(),
            });
        }
        if self
            .existing_orders
            .read()
            .unwrap()
            .contains(&request.order_no)
        {
            return Err(RouterError::OrderExists);
        }
        self.created.write().unwrap().push(request.clone());
        Ok(())
    }

    async fn delete_order(&self, order_no: &str, force: bool) -> Result<(), RouterError> {
        self.deleted
            .write()
            .unwrap()
            .push((order_no.to_string(), force));
        if *self.fail_deletes.read().unwrap() {
            return Err(RouterError::Status {
                status: 500,
                url: "fake://orders".into(),
            });
        }
        Ok(())
    }

    async fn start_planning(
        &self,
        request: &StartPlanningRequest,
    ) -> Result<PlanningStarted, RouterError> {
        let invalid = self.invalid_locations.read().unwrap();
        let invalid_all = *self.invalid_all_locations.read().unwrap();
        Ok(PlanningStarted {
            planning_id: format!("plan-{}", request.date),
            orders_with_invalid_location: request
                .use_orders
                .iter()
                .filter(|o| invalid_all || invalid.contains(o))
                .cloned()
                .collect(),
        })
    }

    async fn get_planning_status(&self, _planning_id: &str) -> Result<PlanningStatus, RouterError> {
        Ok(self
            .planning_statuses
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or(PlanningStatus::Running))
    }

    async fn get_scheduling_info(&self, order_no: &str) -> Result<SchedulingInfo, RouterError> {
        if let Some(info) = self.scheduling.read().unwrap().get(order_no) {
            return Ok(info.clone());
        }
        Ok(self
            .default_scheduling
            .read()
            .unwrap()
            .clone()
            .unwrap_or(SchedulingInfo {
                order_scheduled: false,
                schedule_information: None,
            }))
    }

    async fn get_routes(&self, date: NaiveDate) -> Result<Vec<Route>, RouterError> {
        Ok(self
            .routes
            .read()
            .unwrap()
            .get(&date)
            .cloned()
            .unwrap_or_default())
    }
}
