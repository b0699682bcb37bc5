//! Pipeline execution

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::archive::{extract_archive, ExtractedProject, ProjectKind};
use crate::backup::ArchiveVault;
use crate::build::BuildAdapter;
use crate::errors::DeployError;
use crate::infra::naming::ResourceNames;
use crate::infra::topology::{ProvisionContext, TopologyProvisioner};
use crate::infra::ResourceClient;
use crate::loghub::LogHub;
use crate::models::{
    Deployment, DeploymentMode, DeploymentStatus, PipelineStep, ProvisionOutcome, StepStatus,
};
use crate::notify::{DeploymentSummary, Notifier};
use crate::pipeline::logger::DeployLogger;
use crate::store::DeploymentStore;
use crate::storage::settings::Settings;
use crate::upload::ArtifactUploader;
use crate::validate::ValidationAdapter;

/// Everything the pipeline needs, wired once at startup
pub struct PipelineDeps {
    pub store: DeploymentStore,
    pub hub: LogHub,
    pub vault: ArchiveVault,
    pub resources: ResourceClient,
    pub builder: Arc<dyn BuildAdapter>,
    pub validator: Arc<dyn ValidationAdapter>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: Settings,
}

/// Mutable state threaded through the steps of one run
struct RunState {
    deployment: Deployment,
    names: ResourceNames,
    /// Path prefix the site is served under, path-shared mode only
    base_path: Option<String>,
    source_root: Option<PathBuf>,
    project_kind: Option<ProjectKind>,
    artifact_dir: Option<PathBuf>,
    ai_summary: Option<String>,
    pending_fixes: usize,
    outcome: Option<ProvisionOutcome>,
}

/// Runs a deployment through the fixed step sequence. Step statuses go to
/// the store before the matching log line is broadcast, so observers never
/// see a line about a transition the record does not yet show.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    deps: Arc<PipelineDeps>,
}

impl PipelineOrchestrator {
    pub fn new(deps: Arc<PipelineDeps>) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &Arc<PipelineDeps> {
        &self.deps
    }

    /// Execute the full pipeline for a deployment whose archive sits at
    /// `archive_path`. Returns the terminal status; a step failure is
    /// reported after NOTIFY has run.
    pub async fn run(
        &self,
        deployment_id: &str,
        archive_path: &Path,
    ) -> Result<DeploymentStatus, DeployError> {
        let logger = DeployLogger::new(
            self.deps.store.clone(),
            self.deps.hub.clone(),
            deployment_id,
        );

        let deployment = self
            .deps
            .store
            .update(deployment_id, |d| {
                d.status = DeploymentStatus::Running;
                d.started_at = Some(chrono::Utc::now());
                d.completed_at = None;
                d.error_message = None;
                d.current_step = None;
                for step in PipelineStep::ALL {
                    d.step_statuses.insert(step, StepStatus::Pending);
                }
            })
            .await?;
        logger
            .info(
                None,
                format!(
                    "Starting {} deployment of {}",
                    deployment.mode, deployment.target_name
                ),
            )
            .await;

        let names = ResourceNames::derive(
            deployment.mode,
            &deployment.target_name,
            deployment.custom_domain.as_deref(),
        )?;
        let base_path = match deployment.mode {
            DeploymentMode::PathShared => Some(names.slug.clone()),
            _ => None,
        };

        // Scratch space is cleaned up when this guard drops, on every exit
        // path including panics.
        tokio::fs::create_dir_all(self.deps.store.layout().temp_dir()).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("deploy-{}-", deployment_id))
            .tempdir_in(self.deps.store.layout().temp_dir())
            .map_err(DeployError::from)?;

        let mut state = RunState {
            deployment,
            names,
            base_path,
            source_root: None,
            project_kind: None,
            artifact_dir: None,
            ai_summary: None,
            pending_fixes: 0,
            outcome: None,
        };

        let mut failure: Option<(PipelineStep, DeployError)> = None;
        for step in PipelineStep::ALL {
            if step == PipelineStep::Notify {
                continue;
            }
            if failure.is_some() {
                break;
            }

            if let Some(reason) = self.skip_reason(step, &state) {
                self.deps
                    .store
                    .set_step(deployment_id, step, StepStatus::Skipped)
                    .await?;
                logger
                    .info(Some(step), format!("Skipping {}: {}", step, reason))
                    .await;
                continue;
            }

            self.deps
                .store
                .set_step(deployment_id, step, StepStatus::Running)
                .await?;
            logger.info(Some(step), format!("Starting {}", step)).await;
            let started = Instant::now();

            match self
                .execute_step(step, archive_path, scratch.path(), &mut state, &logger)
                .await
            {
                Ok(()) => {
                    self.deps
                        .store
                        .set_step(deployment_id, step, StepStatus::Completed)
                        .await?;
                    logger
                        .info(
                            Some(step),
                            format!(
                                "Step {} completed in {:.2}s",
                                step,
                                started.elapsed().as_secs_f64()
                            ),
                        )
                        .await;
                }
                Err(e) => {
                    // Bookkeeping trouble must not replace the step error.
                    if let Err(store_err) = self
                        .deps
                        .store
                        .mark_failed(deployment_id, step, &e.to_string())
                        .await
                    {
                        tracing::warn!(
                            "Could not record the failure of {} for {}: {}",
                            step,
                            deployment_id,
                            store_err
                        );
                    }
                    logger
                        .error(Some(step), format!("Step {} failed: {}", step, e))
                        .await;
                    failure = Some((step, e));
                }
            }
        }

        let terminal = if failure.is_none() {
            DeploymentStatus::Success
        } else {
            DeploymentStatus::Failed
        };
        let result_url = if failure.is_none() {
            state.outcome.as_ref().map(|o| o.result_url.clone())
        } else {
            None
        };
        let ai_summary = state.ai_summary.clone();

        // NOTIFY runs to completion before the terminal status lands, so a
        // finished record never shows a step still in flight.
        self.run_notify(deployment_id, terminal, result_url.clone(), ai_summary.clone(), &logger)
            .await;

        let finalized = self
            .deps
            .store
            .update(deployment_id, |d| {
                d.status = terminal;
                d.completed_at = Some(chrono::Utc::now());
                d.result_url = result_url.clone();
                d.ai_summary = ai_summary.clone();
                d.current_step = None;
            })
            .await;

        match failure {
            None => {
                finalized?;
                if let Some(url) = &result_url {
                    logger.info(None, format!("Deployment live at {}", url)).await;
                }
                if let Err(e) = self.deps.vault.reclaim(deployment_id).await {
                    tracing::warn!("Failed to reclaim backup for {}: {}", deployment_id, e);
                }
                Ok(DeploymentStatus::Success)
            }
            Some((_, step_error)) => {
                if let Err(e) = finalized {
                    // The step failure is the error worth reporting; a record
                    // stuck in running is the watchdog's problem.
                    tracing::warn!(
                        "Could not finalize failed record {}: {}",
                        deployment_id,
                        e
                    );
                }
                Err(step_error)
            }
        }
    }

    /// Why a step does not run for this deployment, if it doesn't
    fn skip_reason(&self, step: PipelineStep, state: &RunState) -> Option<String> {
        let mode = state.deployment.mode;
        match step {
            PipelineStep::AiInspect | PipelineStep::AiFix
                if !state.deployment.ai_enabled || !self.deps.settings.ai.enabled =>
            {
                Some("AI review disabled".to_string())
            }
            PipelineStep::AiFix if state.pending_fixes == 0 => {
                Some("reviewer proposed no fixes".to_string())
            }
            PipelineStep::Build | PipelineStep::Verify if mode == DeploymentMode::Container => {
                Some("container image is built by the provider".to_string())
            }
            PipelineStep::Build if state.project_kind == Some(ProjectKind::Static) => {
                Some("static site, nothing to build".to_string())
            }
            PipelineStep::Verify if state.project_kind == Some(ProjectKind::Static) => {
                Some("static site, no build output to preview".to_string())
            }
            PipelineStep::Domain => {
                if mode != DeploymentMode::HostShared {
                    Some("no custom domain in this mode".to_string())
                } else if !self.deps.settings.cloud.auto_register_domains {
                    Some("automatic domain registration disabled".to_string())
                } else if !state.deployment.domain_purchase_confirmed {
                    Some("domain purchase not confirmed".to_string())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    async fn execute_step(
        &self,
        step: PipelineStep,
        archive_path: &Path,
        scratch: &Path,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        match step {
            PipelineStep::Extract => self.step_extract(archive_path, scratch, state, logger).await,
            PipelineStep::AiInspect => self.step_ai_inspect(state, logger).await,
            PipelineStep::AiFix => self.step_ai_fix(state, logger).await,
            PipelineStep::Build => self.step_build(state, logger).await,
            PipelineStep::Verify => self.step_verify(state, logger).await,
            PipelineStep::Domain => self.step_domain(state, logger).await,
            PipelineStep::Infra => self.step_infra(state, logger).await,
            PipelineStep::Upload => self.step_upload(state, logger).await,
            PipelineStep::Notify => Ok(()),
        }
    }

    async fn step_extract(
        &self,
        archive_path: &Path,
        scratch: &Path,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let max_bytes = self.deps.settings.build.max_archive_mb * 1024 * 1024;
        let extracted: ExtractedProject =
            extract_archive(archive_path, &scratch.join("source"), max_bytes).await?;
        logger
            .info(
                Some(PipelineStep::Extract),
                format!(
                    "Extracted {} project at {}",
                    match extracted.kind {
                        ProjectKind::NodeBuild => "buildable",
                        ProjectKind::Static => "static",
                    },
                    extracted.source_root.display()
                ),
            )
            .await;
        state.project_kind = Some(extracted.kind);
        state.source_root = Some(extracted.source_root);
        Ok(())
    }

    async fn step_ai_inspect(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let source_root = state.source_root.clone().ok_or_else(|| {
            DeployError::Internal("AI_INSPECT reached without an extracted source tree".to_string())
        })?;

        let report = self
            .deps
            .validator
            .inspect(
                &source_root,
                state.deployment.mode,
                state.base_path.as_deref(),
            )
            .await;

        logger
            .info(
                Some(PipelineStep::AiInspect),
                format!(
                    "Review {}: {} ({} fixes proposed)",
                    if report.pass { "passed" } else { "flagged issues" },
                    report.summary,
                    report.fixes.len()
                ),
            )
            .await;

        state.pending_fixes = report.fixes.len();
        state.ai_summary = Some(report.summary.clone());
        // Stash the fixes next to the source so AI_FIX can pick them up.
        if !report.fixes.is_empty() {
            let stash = source_root.join(".review-fixes.json");
            tokio::fs::write(&stash, serde_json::to_vec(&report)?).await?;
        }
        Ok(())
    }

    async fn step_ai_fix(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let source_root = state.source_root.clone().ok_or_else(|| {
            DeployError::Internal("AI_FIX reached without an extracted source tree".to_string())
        })?;
        let stash = source_root.join(".review-fixes.json");
        let report: crate::models::ValidationReport =
            serde_json::from_slice(&tokio::fs::read(&stash).await?)?;
        tokio::fs::remove_file(&stash).await?;

        let applied = crate::validate::apply_fixes(&source_root, &report).await?;
        logger
            .info(
                Some(PipelineStep::AiFix),
                format!("Applied {} reviewer fixes", applied),
            )
            .await;
        Ok(())
    }

    async fn step_build(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let source_root = state.source_root.clone().ok_or_else(|| {
            DeployError::Internal("BUILD reached without an extracted source tree".to_string())
        })?;
        let artifact = self
            .deps
            .builder
            .build(&source_root, state.base_path.as_deref())
            .await?;
        logger
            .info(
                Some(PipelineStep::Build),
                format!("Build artifacts at {}", artifact.display()),
            )
            .await;
        state.artifact_dir = Some(artifact);
        Ok(())
    }

    async fn step_verify(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        // VERIFY only runs after BUILD, so there is always an artifact.
        let target = state.artifact_dir.clone().ok_or_else(|| {
            DeployError::Internal("VERIFY reached without build artifacts".to_string())
        })?;
        let outcome = self
            .deps
            .builder
            .verify(&target, state.base_path.as_deref())
            .await?;
        if !outcome.reachable {
            return Err(DeployError::BuildError(format!(
                "preview probe failed (status {:?})",
                outcome.status_code
            )));
        }
        logger
            .info(
                Some(PipelineStep::Verify),
                format!("Preview responded with status {:?}", outcome.status_code),
            )
            .await;
        Ok(())
    }

    async fn step_domain(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let domain = state.deployment.custom_domain.clone().ok_or_else(|| {
            DeployError::InputError("DOMAIN step requires a custom domain".to_string())
        })?;
        // Registration is billable, so it only runs with the explicit user
        // confirmation checked by the skip policy.
        logger
            .info(
                Some(PipelineStep::Domain),
                format!("Registering domain {} with the provider", domain),
            )
            .await;
        self.deps.resources.api().register_domain(&domain).await?;
        self.deps
            .resources
            .ensure_dns(&state.names.dns_zone, &domain, &self.deps.settings.cloud.shared.edge_ip)
            .await?;
        logger
            .info(
                Some(PipelineStep::Domain),
                format!("Domain {} registered and delegated", domain),
            )
            .await;
        Ok(())
    }

    async fn step_infra(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let source_dir = state
            .source_root
            .clone()
            .ok_or_else(|| DeployError::Internal("INFRA reached without sources".to_string()))?;
        let ctx = ProvisionContext {
            deployment_id: state.deployment.id.clone(),
            names: state.names.clone(),
            custom_domain: state.deployment.custom_domain.clone(),
            source_dir,
            cloud: self.deps.settings.cloud.clone(),
            container: self.deps.settings.container.clone(),
        };
        let provisioner = TopologyProvisioner::for_mode(state.deployment.mode);
        let outcome = provisioner
            .provision(&self.deps.resources, &ctx, logger)
            .await?;
        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Infrastructure ready, site will serve at {}", outcome.result_url),
            )
            .await;
        state.outcome = Some(outcome);
        Ok(())
    }

    async fn step_upload(
        &self,
        state: &mut RunState,
        logger: &DeployLogger,
    ) -> Result<(), DeployError> {
        let outcome = state.outcome.as_ref().ok_or_else(|| {
            DeployError::Internal("UPLOAD reached without provisioned infrastructure".to_string())
        })?;

        if state.deployment.mode == DeploymentMode::Container {
            logger
                .info(
                    Some(PipelineStep::Upload),
                    "Container image already pushed during provisioning",
                )
                .await;
            return Ok(());
        }

        let bucket = outcome.bucket.clone().ok_or_else(|| {
            DeployError::Internal("provisioning returned no bucket to upload into".to_string())
        })?;
        let tree = state
            .artifact_dir
            .clone()
            .or_else(|| state.source_root.clone())
            .ok_or_else(|| {
                DeployError::Internal("UPLOAD reached with no artifact tree".to_string())
            })?;

        let uploader = ArtifactUploader::new(self.deps.resources.api().clone());
        uploader
            .upload_tree(&tree, &bucket, state.base_path.as_deref(), logger)
            .await?;
        uploader
            .invalidate_cache(
                &self.deps.settings.cloud.shared.routing_table,
                state.base_path.as_deref(),
                logger,
            )
            .await;
        Ok(())
    }

    /// NOTIFY always runs, and neither delivery nor bookkeeping failures
    /// change the run's outcome. The record is not yet terminal here, so the
    /// summary's outcome fields come from the caller.
    async fn run_notify(
        &self,
        deployment_id: &str,
        terminal: DeploymentStatus,
        result_url: Option<String>,
        ai_summary: Option<String>,
        logger: &DeployLogger,
    ) {
        if let Err(e) = self
            .deps
            .store
            .set_step(deployment_id, PipelineStep::Notify, StepStatus::Running)
            .await
        {
            tracing::warn!("Could not mark NOTIFY running for {}: {}", deployment_id, e);
        }
        logger
            .info(Some(PipelineStep::Notify), "Sending deployment summary")
            .await;

        match self.deps.store.get(deployment_id).await {
            Ok(deployment) => {
                let summary = DeploymentSummary::from_deployment(
                    &deployment,
                    &self.deps.settings.notify.default_targets,
                )
                .with_outcome(terminal, result_url, ai_summary);

                if let Err(e) = self.deps.notifier.notify(&summary).await {
                    logger
                        .warn(
                            Some(PipelineStep::Notify),
                            format!("Notification delivery failed: {}", e),
                        )
                        .await;
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Could not load {} for its notification: {}",
                    deployment_id,
                    e
                );
            }
        }

        if let Err(e) = self
            .deps
            .store
            .set_step(deployment_id, PipelineStep::Notify, StepStatus::Completed)
            .await
        {
            tracing::warn!("Could not mark NOTIFY completed for {}: {}", deployment_id, e);
        }
    }
}
