//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::backup::ArchiveVault;
use crate::build::NpmBuildAdapter;
use crate::errors::DeployError;
use crate::infra::{MemoryCloudApi, ResourceClient, RestCloudApi};
use crate::loghub::LogHub;
use crate::notify::notifier_from_settings;
use crate::pipeline::{PipelineDeps, PipelineOrchestrator};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::store::DeploymentStore;
use crate::validate::CodeValidationAdapter;
use crate::workers::watchdog;

/// Run the deployment server until the shutdown signal resolves
pub async fn run(
    settings: Settings,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DeployError> {
    info!("Initializing deployment server...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);

    let orchestrator = init_orchestrator(&settings).await?;

    // HTTP server
    let server_state = Arc::new(ServerState::new(orchestrator.clone()));
    let mut server_shutdown = shutdown_tx.subscribe();
    let server_handle = serve(&settings.server, server_state, async move {
        let _ = server_shutdown.recv().await;
    })
    .await?;

    // Recovery watchdog
    let watchdog_options = watchdog::options_from_settings(&settings.pipeline);
    let watchdog_orchestrator = orchestrator.clone();
    let mut watchdog_shutdown = shutdown_tx.subscribe();
    let watchdog_handle = tokio::spawn(async move {
        watchdog::run(
            &watchdog_options,
            &watchdog_orchestrator,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = watchdog_shutdown.recv().await;
            }),
        )
        .await;
    });

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    drop(shutdown_tx);

    if let Err(e) = watchdog_handle.await {
        warn!("Watchdog task ended abnormally: {}", e);
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server error: {}", e),
        Err(e) => warn!("Server task ended abnormally: {}", e),
    }

    info!("Deployment server stopped");
    Ok(())
}

/// Wire the pipeline dependencies from settings
pub async fn init_orchestrator(settings: &Settings) -> Result<PipelineOrchestrator, DeployError> {
    let layout = StorageLayout::new(&settings.data_dir);
    tokio::fs::create_dir_all(&layout.base_dir).await?;

    let store = DeploymentStore::new(layout.clone());
    let vault = ArchiveVault::new(layout);
    let hub = LogHub::new();

    let resources = match settings.cloud.provider.as_str() {
        "memory" => {
            warn!("Using the in-memory cloud provider; nothing real is deployed");
            let api = Arc::new(MemoryCloudApi::new());
            api.seed_shared_edge(
                &settings.cloud.shared.routing_table,
                &settings.cloud.shared.terminator,
                &settings.cloud.shared.domain,
                "shared-edge-default",
            )
            .await;
            ResourceClient::new(api)
        }
        "rest" => ResourceClient::new(Arc::new(RestCloudApi::new(&settings.cloud)?)),
        other => {
            return Err(DeployError::ConfigError(format!(
                "unknown cloud provider {:?}",
                other
            )))
        }
    };

    let deps = PipelineDeps {
        store,
        hub,
        vault,
        resources,
        builder: Arc::new(NpmBuildAdapter::new(settings.build.clone())?),
        validator: Arc::new(CodeValidationAdapter::new(settings.ai.clone())?),
        notifier: Arc::from(notifier_from_settings(&settings.notify)?),
        settings: settings.clone(),
    };

    Ok(PipelineOrchestrator::new(Arc::new(deps)))
}
