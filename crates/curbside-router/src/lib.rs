//! HTTP client for the external routing engine.
//!
//! The router is a black box that plans and schedules vehicle routes against
//! submitted orders. Every component talks to it through the [`RouterClient`]
//! trait so tests can substitute a fake.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use curbside_core::{Route, RouteStatus, RouteStop};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info_span;

pub const CRATE_NAME: &str = "curbside-router";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub order_no: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub date: NaiveDate,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Pickup,
    Delivery,
    Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPlanningRequest {
    pub date: NaiveDate,
    pub use_orders: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_with: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningStarted {
    pub planning_id: String,
    #[serde(default)]
    pub orders_with_invalid_location: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanningStatus {
    New,
    Running,
    Cancelled,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingInfo {
    pub order_scheduled: bool,
    #[serde(default)]
    pub schedule_information: Option<ScheduleInformation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInformation {
    #[serde(default)]
    pub driver_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum RouterError {
    /// The router already holds an order under this order number. Callers
    /// treat this as a benign skip, not a failure.
    #[error("order already exists in the router")]
    OrderExists,
    #[error("router returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("router request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("decoding router response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[async_trait]
pub trait RouterClient: Send + Sync {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<(), RouterError>;
    async fn delete_order(&self, order_no: &str, force: bool) -> Result<(), RouterError>;
    async fn start_planning(
        &self,
        request: &StartPlanningRequest,
    ) -> Result<PlanningStarted, RouterError>;
    async fn get_planning_status(&self, planning_id: &str) -> Result<PlanningStatus, RouterError>;
    async fn get_scheduling_info(&self, order_no: &str) -> Result<SchedulingInfo, RouterError>;
    async fn get_routes(&self, date: NaiveDate) -> Result<Vec<Route>, RouterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7900".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Wire shape of a planned route as the router returns it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteWire {
    route_id: String,
    date: NaiveDate,
    status: String,
    #[serde(default)]
    stops: Vec<RouteStopWire>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteStopWire {
    stop_number: u32,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

fn route_status_from_wire(status: &str) -> RouteStatus {
    match status.to_ascii_lowercase().as_str() {
        "open" => RouteStatus::Open,
        "assigned" => RouteStatus::Assigned,
        "in_progress" | "in-progress" => RouteStatus::InProgress,
        "completed" => RouteStatus::Completed,
        "cancelled" => RouteStatus::Cancelled,
        _ => RouteStatus::Draft,
    }
}

impl From<RouteWire> for Route {
    fn from(wire: RouteWire) -> Self {
        Route {
            status: route_status_from_wire(&wire.status),
            route_id: wire.route_id,
            date: wire.date,
            stops: wire
                .stops
                .into_iter()
                .map(|s| RouteStop {
                    stop_number: s.stop_number,
                    address: s.address,
                    latitude: s.latitude,
                    longitude: s.longitude,
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct HttpRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    backoff: BackoffPolicy,
}

impl HttpRouterClient {
    pub fn new(config: RouterConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            backoff: config.backoff,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request with retry on transient failures. The body is rebuilt
    /// per attempt, so it is passed as a pre-serialized JSON value.
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response, RouterError> {
        let url = self.url(path);
        let span = info_span!("router_call", %method, path);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("x-api-key", &self.api_key)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(RouterError::Status {
                        status: status.as_u16(),
                        url: response.url().to_string(),
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(RouterError::Request(err));
                }
            }
        }

        Err(RouterError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RouterError> {
        let url = response.url().to_string();
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| RouterError::Decode {
            url,
            message: err.to_string(),
        })
    }
}

#[async_trait]
impl RouterClient for HttpRouterClient {
    async fn create_order(&self, request: &CreateOrderRequest) -> Result<(), RouterError> {
        let body = serde_json::to_value(request).map_err(|err| RouterError::Decode {
            url: self.url("/orders"),
            message: err.to_string(),
        })?;
        match self.send(Method::POST, "/orders", &[], Some(&body)).await {
            Ok(_) => Ok(()),
            Err(RouterError::Status { status: 409, .. }) => Err(RouterError::OrderExists),
            Err(err) => Err(err),
        }
    }

    async fn delete_order(&self, order_no: &str, force: bool) -> Result<(), RouterError> {
        let path = format!("/orders/{order_no}");
        let query = [("force", force.to_string())];
        match self.send(Method::DELETE, &path, &query, None).await {
            Ok(_) => Ok(()),
            // Already gone remotely is as good as deleted.
            Err(RouterError::Status { status: 404, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn start_planning(
        &self,
        request: &StartPlanningRequest,
    ) -> Result<PlanningStarted, RouterError> {
        let body = serde_json::to_value(request).map_err(|err| RouterError::Decode {
            url: self.url("/planning"),
            message: err.to_string(),
        })?;
        let response = self.send(Method::POST, "/planning", &[], Some(&body)).await?;
        Self::decode(response).await
    }

    async fn get_planning_status(&self, planning_id: &str) -> Result<PlanningStatus, RouterError> {
        #[derive(Deserialize)]
        struct StatusWire {
            status: PlanningStatus,
        }
        let path = format!("/planning/{planning_id}");
        let response = self.send(Method::GET, &path, &[], None).await?;
        let wire: StatusWire = Self::decode(response).await?;
        Ok(wire.status)
    }

    async fn get_scheduling_info(&self, order_no: &str) -> Result<SchedulingInfo, RouterError> {
        let path = format!("/orders/{order_no}/scheduling");
        let response = self.send(Method::GET, &path, &[], None).await?;
        Self::decode(response).await
    }

    async fn get_routes(&self, date: NaiveDate) -> Result<Vec<Route>, RouterError> {
        let query = [("date", date.format("%Y-%m-%d").to_string())];
        let response = self.send(Method::GET, "/routes", &query, None).await?;
        let wires: Vec<RouteWire> = Self::decode(response).await?;
        Ok(wires.into_iter().map(Route::from).collect())
    }
}
