//! Topology-specific provisioning flows

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::infra::api::{Backend, Bucket, ImageBuild, ServiceSpec};
use crate::infra::client::ResourceClient;
use crate::infra::naming::ResourceNames;
use crate::models::{DeploymentMode, PipelineStep, ProvisionOutcome};
use crate::pipeline::logger::DeployLogger;
use crate::storage::settings::{CloudSettings, ContainerSettings};

/// Everything a provisioning flow needs about one deployment
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    pub deployment_id: String,
    pub names: ResourceNames,
    pub custom_domain: Option<String>,
    /// Source tree for container image builds
    pub source_dir: PathBuf,
    pub cloud: CloudSettings,
    pub container: ContainerSettings,
}

/// One provisioning flow per hosting topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyProvisioner {
    PathShared,
    HostShared,
    Container,
}

impl TopologyProvisioner {
    pub fn for_mode(mode: DeploymentMode) -> Self {
        match mode {
            DeploymentMode::PathShared => TopologyProvisioner::PathShared,
            DeploymentMode::HostShared => TopologyProvisioner::HostShared,
            DeploymentMode::Container => TopologyProvisioner::Container,
        }
    }

    /// Provision every resource the topology needs and return where the
    /// deployment will be reachable. Idempotent across re-runs.
    pub async fn provision(
        &self,
        client: &ResourceClient,
        ctx: &ProvisionContext,
        logger: &DeployLogger,
    ) -> Result<ProvisionOutcome, DeployError> {
        match self {
            TopologyProvisioner::PathShared => self.provision_path_shared(client, ctx, logger).await,
            TopologyProvisioner::HostShared => self.provision_host_shared(client, ctx, logger).await,
            TopologyProvisioner::Container => self.provision_container(client, ctx, logger).await,
        }
    }

    async fn provision_path_shared(
        &self,
        client: &ResourceClient,
        ctx: &ProvisionContext,
        logger: &DeployLogger,
    ) -> Result<ProvisionOutcome, DeployError> {
        let bucket = self
            .ensure_site_bucket_and_backend(client, ctx, logger)
            .await?;

        logger
            .info(
                Some(PipelineStep::Infra),
                format!(
                    "Routing /{} on {} to backend {}",
                    ctx.names.slug, ctx.cloud.shared.domain, ctx.names.backend
                ),
            )
            .await;
        client
            .append_path_rules(
                &ctx.cloud.shared.routing_table,
                &ctx.cloud.shared.domain,
                &ctx.names.slug,
                &ctx.names.backend,
            )
            .await?;

        Ok(ProvisionOutcome {
            result_url: format!("https://{}/{}/", ctx.cloud.shared.domain, ctx.names.slug),
            bucket: Some(bucket),
            backend: Some(ctx.names.backend.clone()),
            service: None,
        })
    }

    async fn provision_host_shared(
        &self,
        client: &ResourceClient,
        ctx: &ProvisionContext,
        logger: &DeployLogger,
    ) -> Result<ProvisionOutcome, DeployError> {
        let domain = ctx.custom_domain.as_deref().ok_or_else(|| {
            DeployError::InputError(
                "host-shared deployments require a custom domain".to_string(),
            )
        })?;

        let bucket = self
            .ensure_site_bucket_and_backend(client, ctx, logger)
            .await?;

        if ctx.cloud.auto_create_certificate {
            logger
                .info(
                    Some(PipelineStep::Infra),
                    format!("Ensuring managed certificate for {}", domain),
                )
                .await;
            client
                .ensure_certificate(&ctx.names.certificate, domain)
                .await?;
        }

        if ctx.cloud.auto_create_dns_zone {
            logger
                .info(
                    Some(PipelineStep::Infra),
                    format!(
                        "Pointing {} at the shared edge ({})",
                        domain, ctx.cloud.shared.edge_ip
                    ),
                )
                .await;
            client
                .ensure_dns(&ctx.names.dns_zone, domain, &ctx.cloud.shared.edge_ip)
                .await?;
        }

        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Adding host rule for {} to the shared routing table", domain),
            )
            .await;
        client
            .append_host_rule(
                &ctx.cloud.shared.routing_table,
                domain,
                &ctx.names.path_matcher,
                &ctx.names.backend,
            )
            .await?;

        if ctx.cloud.auto_create_certificate {
            logger
                .info(
                    Some(PipelineStep::Infra),
                    format!(
                        "Registering certificate {} on the shared terminator",
                        ctx.names.certificate
                    ),
                )
                .await;
            client
                .register_certificate(
                    &ctx.cloud.shared.terminator,
                    &ctx.names.certificate,
                    ctx.cloud.shared.certificate_limit,
                )
                .await?;
        }

        Ok(ProvisionOutcome {
            result_url: format!("https://{}/", domain),
            bucket: Some(bucket),
            backend: Some(ctx.names.backend.clone()),
            service: None,
        })
    }

    async fn provision_container(
        &self,
        client: &ResourceClient,
        ctx: &ProvisionContext,
        logger: &DeployLogger,
    ) -> Result<ProvisionOutcome, DeployError> {
        let image = format!(
            "{}/{}:{}",
            ctx.container.image_repo, ctx.names.service, ctx.deployment_id
        );
        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Building container image {}", image),
            )
            .await;
        let image = client
            .build_image(&ImageBuild {
                image,
                source_dir: ctx.source_dir.to_string_lossy().to_string(),
                timeout_secs: ctx.container.image_build_timeout_secs,
            })
            .await?;

        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Rolling out service {}", ctx.names.service),
            )
            .await;
        let service = client
            .ensure_service(&ServiceSpec {
                name: ctx.names.service.clone(),
                region: ctx.container.region.clone(),
                image,
                cpu: ctx.container.cpu.clone(),
                memory: ctx.container.memory.clone(),
                min_instances: ctx.container.min_instances,
                max_instances: ctx.container.max_instances,
            })
            .await?;

        Ok(ProvisionOutcome {
            result_url: service.url,
            bucket: None,
            backend: None,
            service: Some(ctx.names.service.clone()),
        })
    }

    async fn ensure_site_bucket_and_backend(
        &self,
        client: &ResourceClient,
        ctx: &ProvisionContext,
        logger: &DeployLogger,
    ) -> Result<String, DeployError> {
        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Ensuring storage bucket {}", ctx.names.bucket),
            )
            .await;
        let bucket = client
            .ensure_bucket(&Bucket {
                name: ctx.names.bucket.clone(),
                location: ctx.cloud.bucket_location.clone(),
                main_page: "index.html".to_string(),
                not_found_page: "index.html".to_string(),
                public_read: true,
            })
            .await?;

        logger
            .info(
                Some(PipelineStep::Infra),
                format!("Ensuring CDN backend {}", ctx.names.backend),
            )
            .await;
        client
            .ensure_backend(&Backend {
                name: ctx.names.backend.clone(),
                bucket: bucket.name.clone(),
                cdn_enabled: true,
                default_ttl_secs: ctx.cloud.cdn_default_ttl,
                max_ttl_secs: ctx.cloud.cdn_max_ttl,
                negative_caching: true,
            })
            .await?;

        Ok(bucket.name)
    }
}
