//! JSON admin API over the sync pipeline: trigger runs, preview them,
//! edit schedules, and kick off feasibility probes.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Weekday;
use curbside_core::{parse_weekday, weekday_name, PickupFrequency};
use curbside_router::{HttpRouterClient, RouterConfig};
use curbside_store::{DisabledBilling, LogNotifier, PgStores, PropertyStore, StoreError};
use curbside_sync::{
    ApprovalFlow, ProbeConfig, SelectionActivator, SyncConfig, SyncOrchestrator,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "curbside-web";

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub approval: Arc<ApprovalFlow>,
    pub properties: Arc<dyn PropertyStore>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        approval: Arc<ApprovalFlow>,
        properties: Arc<dyn PropertyStore>,
    ) -> Self {
        Self {
            orchestrator,
            approval,
            properties,
        }
    }
}

enum ApiError {
    NotFound(String),
    Unprocessable(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            Self::Internal(err) => {
                warn!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/sync/run", post(run_sync_handler))
        .route("/sync/preview", get(sync_preview_handler))
        .route("/properties/{id}/schedule", put(edit_schedule_handler))
        .route("/properties/{id}/probe", post(start_probe_handler))
        .with_state(Arc::new(state))
}

/// Bind and serve against the environment-configured deployment. Billing
/// and customer notification stay disabled until those gateways are wired
/// in, so probe-driven approval can never bill anyone here.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let stores = Arc::new(PgStores::connect(&config.database_url).await?);
    let router = Arc::new(HttpRouterClient::new(RouterConfig {
        base_url: config.router_base_url.clone(),
        api_key: config.router_api_key.clone(),
        timeout: std::time::Duration::from_secs(config.http_timeout_secs),
        ..Default::default()
    })?);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        router.clone(),
        stores.clone(),
        stores.clone(),
        stores.clone(),
        stores.clone(),
        config.window_days,
    ));
    let activator = SelectionActivator::new(
        stores.clone(),
        stores.clone(),
        Arc::new(DisabledBilling),
        router.clone(),
        stores.clone(),
    );
    let approval = Arc::new(ApprovalFlow::new(
        router,
        stores.clone(),
        activator,
        Arc::new(LogNotifier),
        stores.clone(),
        ProbeConfig::default(),
    ));

    let port: u16 = std::env::var("CURBSIDE_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "admin api listening");
    axum::serve(
        listener,
        app(AppState::new(orchestrator, approval, stores)),
    )
    .await?;
    Ok(())
}

async fn run_sync_handler(State(state): State<Arc<AppState>>) -> Response {
    let summary = state.orchestrator.run_once().await;
    Json(summary).into_response()
}

async fn sync_preview_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let preview = state.orchestrator.preview().await?;
    Ok(Json(preview).into_response())
}

#[derive(Debug, Deserialize)]
struct ScheduleBody {
    /// Full or three-letter weekday name; null clears the assignment.
    pickup_day: Option<String>,
    /// Omitted means "keep the current cadence".
    pickup_frequency: Option<PickupFrequency>,
}

async fn edit_schedule_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    Json(body): Json<ScheduleBody>,
) -> Result<Response, ApiError> {
    let property = state
        .properties
        .property_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no property {id}")))?;

    let day: Option<Weekday> = match body.pickup_day.as_deref() {
        None => None,
        Some(raw) => Some(parse_weekday(raw).ok_or_else(|| {
            ApiError::Unprocessable(format!("unknown weekday {raw:?}"))
        })?),
    };
    let frequency = body.pickup_frequency.unwrap_or(property.pickup_frequency);

    let orders_retired = state.orchestrator.edit_schedule(id, day, frequency).await?;
    Ok(Json(serde_json::json!({
        "property_id": id,
        "pickup_day": day.map(weekday_name),
        "pickup_frequency": frequency,
        "orders_retired": orders_retired,
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ProbeBody {
    target_day: Option<String>,
}

/// Fire-and-forget: the probe takes up to a minute of polling, so the
/// request only validates and enqueues it.
async fn start_probe_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<Uuid>,
    body: Option<Json<ProbeBody>>,
) -> Result<Response, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let target_day: Option<Weekday> = match body.target_day.as_deref() {
        None => None,
        Some(raw) => Some(parse_weekday(raw).ok_or_else(|| {
            ApiError::Unprocessable(format!("unknown weekday {raw:?}"))
        })?),
    };

    if state.properties.property_by_id(id).await?.is_none() {
        return Err(ApiError::NotFound(format!("no property {id}")));
    }

    let approval = state.approval.clone();
    tokio::spawn(async move {
        match approval.run(id, target_day).await {
            Ok(report) => info!(
                property_id = %id,
                order_no = %report.order_no,
                outcome = ?report.outcome,
                "feasibility probe finished"
            ),
            Err(err) => warn!(property_id = %id, error = %err, "feasibility probe failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted", "property_id": id })),
    )
        .into_response())
}
