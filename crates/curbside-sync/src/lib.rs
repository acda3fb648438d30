//! Reconciliation and assignment layer: keeps the router's order ledger
//! consistent with the desired recurring-pickup state, and decides which day
//! of the week a property should be visited.

pub mod activation;
pub mod config;
pub mod feasibility;
pub mod optimize;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testutil;

pub use activation::{ActivationOutcome, ActivationSource, SelectionActivator};
pub use config::SyncConfig;
pub use feasibility::{
    probe_feasibility, ApprovalFlow, ProbeConfig, ProbeOutcome, ProbeReport,
};
pub use optimize::{propose_pickup_day, DayProposal, OptimizerConfig};
pub use orchestrator::{
    PlannedAction, PlannedDayOrigin, PlannedOrder, PropertyPlan, RunStatus, SyncOrchestrator,
    SyncPreview, SyncRunSummary,
};

use std::sync::Arc;

use anyhow::{Context, Result};
use curbside_router::{HttpRouterClient, RouterConfig};
use curbside_store::PgStores;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub const CRATE_NAME: &str = "curbside-sync";

/// Wire the orchestrator against Postgres and the live router, from
/// environment configuration.
pub async fn orchestrator_from_env() -> Result<(Arc<SyncOrchestrator>, SyncConfig)> {
    let config = SyncConfig::from_env();
    let stores = Arc::new(
        PgStores::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    let router = Arc::new(
        HttpRouterClient::new(RouterConfig {
            base_url: config.router_base_url.clone(),
            api_key: config.router_api_key.clone(),
            timeout: std::time::Duration::from_secs(config.http_timeout_secs),
            ..Default::default()
        })
        .context("building router client")?,
    );

    let orchestrator = Arc::new(SyncOrchestrator::new(
        router,
        stores.clone(),
        stores.clone(),
        stores.clone(),
        stores,
        config.window_days,
    ));
    Ok((orchestrator, config))
}

/// One manual pipeline run against the environment-configured deployment.
pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    let (orchestrator, _config) = orchestrator_from_env().await?;
    Ok(orchestrator.run_once().await)
}

/// Daily cron job running the full pipeline, when enabled by configuration.
pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    orchestrator: Arc<SyncOrchestrator>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let summary = orchestrator.run_once().await;
            match summary.status {
                RunStatus::Succeeded => info!(
                    run_id = %summary.run_id,
                    created = summary.orders_created,
                    skipped = summary.orders_skipped,
                    errored = summary.orders_errored,
                    deleted = summary.orders_deleted,
                    "scheduled sync run finished"
                ),
                RunStatus::Failed => warn!(
                    run_id = %summary.run_id,
                    error = summary.error.as_deref().unwrap_or("unknown"),
                    "scheduled sync run failed"
                ),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
