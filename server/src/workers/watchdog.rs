//! Recovery watchdog worker

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::models::{Deployment, DeploymentStatus, PipelineStep, StepStatus};
use crate::notify::DeploymentSummary;
use crate::pipeline::PipelineOrchestrator;

/// Watchdog worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Sweep interval
    pub interval: Duration,

    /// A run older than this is considered stuck
    pub pipeline_ceiling: Duration,

    /// Automatic restarts allowed per deployment
    pub retry_cap: u32,

    /// Lease time-to-live
    pub lease_ttl: Duration,

    /// Lease holder identity for this process
    pub holder: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            pipeline_ceiling: Duration::from_secs(900),
            retry_cap: 2,
            lease_ttl: Duration::from_secs(60),
            holder: format!("watchdog-{}", std::process::id()),
        }
    }
}

/// Run the watchdog worker. Sweeps once at startup, then on the interval,
/// until the shutdown signal resolves.
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &PipelineOrchestrator,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Recovery watchdog starting...");

    // Startup sweep picks up deployments orphaned by the previous process.
    sweep(options, orchestrator).await;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Recovery watchdog shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        sweep(options, orchestrator).await;
    }
}

/// One pass over every record, recovering or failing the stale ones
pub async fn sweep(options: &Options, orchestrator: &PipelineOrchestrator) {
    let store = &orchestrator.deps().store;
    let deployments = match store.list().await {
        Ok(deployments) => deployments,
        Err(e) => {
            error!("Watchdog could not list deployments: {}", e);
            return;
        }
    };

    for deployment in deployments {
        if !is_stale(&deployment, options.pipeline_ceiling) {
            continue;
        }
        if let Err(e) = recover(options, orchestrator, &deployment).await {
            error!("Watchdog failed to recover {}: {}", deployment.id, e);
        }
    }
}

/// Running past the ceiling since it started, or queued past the ceiling
/// since it was created, means the owning task is gone or wedged.
fn is_stale(deployment: &Deployment, ceiling: Duration) -> bool {
    let ceiling = chrono::Duration::seconds(ceiling.as_secs() as i64);
    match deployment.status {
        DeploymentStatus::Running => deployment
            .started_at
            .map(|t| Utc::now().signed_duration_since(t) > ceiling)
            .unwrap_or(true),
        DeploymentStatus::Queued => {
            Utc::now().signed_duration_since(deployment.created_at) > ceiling
        }
        _ => false,
    }
}

async fn recover(
    options: &Options,
    orchestrator: &PipelineOrchestrator,
    deployment: &Deployment,
) -> Result<(), crate::errors::DeployError> {
    let deps = orchestrator.deps();
    let id = deployment.id.clone();

    let acquired = deps
        .store
        .try_acquire_lease(&id, &options.holder, options.lease_ttl.as_secs())
        .await?;
    if !acquired {
        debug!("Deployment {} is leased elsewhere, skipping", id);
        return Ok(());
    }

    // State may have moved while we were taking the lease.
    let current = deps.store.get(&id).await?;
    if !is_stale(&current, options.pipeline_ceiling) {
        deps.store.release_lease(&id, &options.holder).await?;
        return Ok(());
    }

    if current.retry_count >= options.retry_cap {
        fail_exhausted(options, orchestrator, &current).await?;
        deps.store.release_lease(&id, &options.holder).await?;
        return Ok(());
    }

    let archive = match deps.vault.fetch(&id).await {
        Ok(path) => path,
        Err(e) => {
            warn!("No backup archive for stale deployment {}: {}", id, e);
            fail_exhausted(options, orchestrator, &current).await?;
            deps.store.release_lease(&id, &options.holder).await?;
            return Ok(());
        }
    };

    let retry = current.retry_count + 1;
    info!(
        "Restarting stale deployment {} (attempt {} of {})",
        id, retry, options.retry_cap
    );
    deps.store
        .update(&id, |d| {
            d.retry_count = retry;
            d.status = DeploymentStatus::Queued;
            d.error_message = None;
            d.current_step = None;
            for step in PipelineStep::ALL {
                d.step_statuses.insert(step, StepStatus::Pending);
            }
        })
        .await?;

    let orchestrator = orchestrator.clone();
    let holder = options.holder.clone();
    tokio::spawn(async move {
        let result = orchestrator.run(&id, &archive).await;
        if let Err(e) = &result {
            warn!("Recovered run of {} failed: {}", id, e);
        }
        if let Err(e) = orchestrator.deps().store.release_lease(&id, &holder).await {
            warn!("Failed to release lease for {}: {}", id, e);
        }
    });

    Ok(())
}

/// Out of retries: mark the record failed with a timeout error naming the
/// stuck step, and deliver the notification once.
async fn fail_exhausted(
    options: &Options,
    orchestrator: &PipelineOrchestrator,
    deployment: &Deployment,
) -> Result<(), crate::errors::DeployError> {
    let deps = orchestrator.deps();
    let stuck_step = deployment
        .current_step
        .map(|s| s.as_str())
        .unwrap_or("QUEUE");
    let message = format!(
        "deployment exceeded the {}s pipeline ceiling at step {} after {} retries",
        options.pipeline_ceiling.as_secs(),
        stuck_step,
        deployment.retry_count
    );
    warn!("Failing {}: {}", deployment.id, message);

    let updated = deps
        .store
        .update(&deployment.id, |d| {
            d.status = DeploymentStatus::Failed;
            d.error_message = Some(message.clone());
            d.completed_at = Some(Utc::now());
            if let Some(step) = d.current_step {
                d.step_statuses.insert(step, StepStatus::Failed);
            }
        })
        .await?;

    let summary =
        DeploymentSummary::from_deployment(&updated, &deps.settings.notify.default_targets);
    if let Err(e) = deps.notifier.notify(&summary).await {
        warn!(
            "Timeout notification for {} failed: {}",
            deployment.id, e
        );
    }
    Ok(())
}

/// Shared helper for building the orchestrator-facing options from settings
pub fn options_from_settings(settings: &crate::storage::settings::PipelineSettings) -> Options {
    Options {
        interval: Duration::from_secs(settings.watchdog_interval_secs),
        pipeline_ceiling: Duration::from_secs(settings.max_duration_secs),
        retry_cap: settings.retry_cap,
        lease_ttl: Duration::from_secs(settings.lease_ttl_secs),
        ..Options::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentConfig, DeploymentMode};

    fn deployment(status: DeploymentStatus) -> Deployment {
        let config = DeploymentConfig {
            mode: DeploymentMode::PathShared,
            target_name: "demo".to_string(),
            custom_domain: None,
            notification_targets: vec![],
            ai_enabled: false,
            domain_purchase_confirmed: false,
        };
        let mut d = Deployment::new("d-1".to_string(), &config, None);
        d.status = status;
        d
    }

    #[test]
    fn fresh_runs_are_not_stale() {
        let mut d = deployment(DeploymentStatus::Running);
        d.started_at = Some(Utc::now());
        assert!(!is_stale(&d, Duration::from_secs(900)));
    }

    #[test]
    fn old_running_and_queued_records_are_stale() {
        let mut running = deployment(DeploymentStatus::Running);
        running.started_at = Some(Utc::now() - chrono::Duration::seconds(1000));
        assert!(is_stale(&running, Duration::from_secs(900)));

        let mut queued = deployment(DeploymentStatus::Queued);
        queued.created_at = Utc::now() - chrono::Duration::seconds(1000);
        assert!(is_stale(&queued, Duration::from_secs(900)));
    }

    #[test]
    fn terminal_records_are_never_stale() {
        let mut d = deployment(DeploymentStatus::Failed);
        d.completed_at = Some(Utc::now() - chrono::Duration::seconds(10000));
        assert!(!is_stale(&d, Duration::from_secs(900)));
    }

    #[test]
    fn running_without_started_at_counts_as_stale() {
        let d = deployment(DeploymentStatus::Running);
        assert!(is_stale(&d, Duration::from_secs(900)));
    }
}
