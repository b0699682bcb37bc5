//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::archive::looks_like_gzip;
use crate::errors::DeployError;
use crate::infra::naming::safe_name;
use crate::models::{Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, LogLine};
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// DeployError mapped onto an HTTP response
pub struct ApiError(DeployError);

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DeployError::InputError(_) => StatusCode::BAD_REQUEST,
            DeployError::NotFound(_) => StatusCode::NOT_FOUND,
            e if e.is_conflict() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "webdeployd".to_string(),
        version: version.version,
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Deploy response
#[derive(Debug, Serialize)]
pub struct DeployResponse {
    pub deployment_id: String,
    pub status: String,
}

/// Fields collected from the multipart deploy request
#[derive(Default)]
struct DeployForm {
    archive: Option<(String, Vec<u8>)>,
    mode: Option<String>,
    target_name: Option<String>,
    custom_domain: Option<String>,
    notification_targets: Vec<String>,
    ai_enabled: Option<bool>,
    domain_purchase_confirmed: bool,
}

/// Deploy intake handler: validate, back up the archive, create the record,
/// spawn the pipeline, answer 202.
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let form = read_deploy_form(multipart).await?;
    let config = validate_form(&form)?;
    let (archive_name, archive_bytes) = form
        .archive
        .ok_or_else(|| DeployError::InputError("archive file is required".to_string()))?;

    let max_bytes = state.settings().build.max_archive_mb * 1024 * 1024;
    if archive_bytes.len() as u64 > max_bytes {
        return Err(DeployError::InputError(format!(
            "archive exceeds the {} MB limit",
            state.settings().build.max_archive_mb
        ))
        .into());
    }

    let deployment_id = Uuid::new_v4().to_string();
    let archive_path = state.vault().store(&deployment_id, &archive_bytes).await?;

    let deployment = Deployment::new(deployment_id.clone(), &config, Some(archive_name));
    state.store().create(&deployment).await?;

    let orchestrator = state.orchestrator.clone();
    let id = deployment_id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(&id, &archive_path).await {
            tracing::warn!("Deployment {} failed: {}", id, e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployResponse {
            deployment_id,
            status: DeploymentStatus::Queued.to_string(),
        }),
    ))
}

async fn read_deploy_form(mut multipart: Multipart) -> Result<DeployForm, DeployError> {
    let mut form = DeployForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| DeployError::InputError(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "archive" => {
                let filename = field.file_name().unwrap_or("upload.tar.gz").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| DeployError::InputError(format!("archive read failed: {}", e)))?;
                form.archive = Some((filename, bytes.to_vec()));
            }
            "mode" => form.mode = Some(text(field).await?),
            "target_name" => form.target_name = Some(text(field).await?),
            "custom_domain" => {
                let value = text(field).await?;
                if !value.is_empty() {
                    form.custom_domain = Some(value);
                }
            }
            "notification_targets" => {
                form.notification_targets = text(field)
                    .await?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "ai_enabled" => form.ai_enabled = Some(parse_bool(&text(field).await?)),
            "domain_purchase_confirmed" => {
                form.domain_purchase_confirmed = parse_bool(&text(field).await?)
            }
            other => {
                tracing::debug!("Ignoring unknown deploy field {}", other);
            }
        }
    }
    Ok(form)
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, DeployError> {
    field
        .text()
        .await
        .map_err(|e| DeployError::InputError(format!("unreadable field: {}", e)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

fn validate_form(form: &DeployForm) -> Result<DeploymentConfig, DeployError> {
    let mode: DeploymentMode = form
        .mode
        .as_deref()
        .ok_or_else(|| DeployError::InputError("mode is required".to_string()))?
        .parse()?;

    let raw_name = form
        .target_name
        .as_deref()
        .ok_or_else(|| DeployError::InputError("target_name is required".to_string()))?;
    let slug = safe_name(raw_name)?;
    if slug.len() < 2 {
        return Err(DeployError::InputError(
            "target_name must normalize to at least 2 characters".to_string(),
        ));
    }

    if mode == DeploymentMode::HostShared && form.custom_domain.is_none() {
        return Err(DeployError::InputError(
            "custom_domain is required in host-shared mode".to_string(),
        ));
    }

    if let Some((filename, bytes)) = &form.archive {
        let lower = filename.to_lowercase();
        if !lower.ends_with(".tar.gz") && !lower.ends_with(".tgz") {
            return Err(DeployError::InputError(format!(
                "archive must be a .tar.gz file, got {}",
                filename
            )));
        }
        if !looks_like_gzip(bytes) {
            return Err(DeployError::InputError(
                "archive is not gzip data".to_string(),
            ));
        }
    }

    Ok(DeploymentConfig {
        mode,
        target_name: slug,
        custom_domain: form.custom_domain.clone(),
        notification_targets: form.notification_targets.clone(),
        ai_enabled: form.ai_enabled.unwrap_or(true),
        domain_purchase_confirmed: form.domain_purchase_confirmed,
    })
}

/// List handler
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<Deployment>>, ApiError> {
    Ok(Json(state.store().list().await?))
}

/// Status handler
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Deployment>, ApiError> {
    Ok(Json(state.store().get(&id).await?))
}

/// Accumulated logs handler
pub async fn get_logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LogLine>>, ApiError> {
    // 404 for unknown ids, empty list for known ids with no logs yet.
    state.store().get(&id).await?;
    Ok(Json(state.store().get_logs(&id).await?))
}

/// Delete handler; running deployments are refused
pub async fn delete_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.store().get(&id).await?;
    if deployment.status == DeploymentStatus::Running {
        return Err(DeployError::ProvisionConflict {
            resource: format!("deployment {}", id),
            reason: "cannot delete a running deployment".to_string(),
        }
        .into());
    }
    state.store().delete(&id).await?;
    if let Err(e) = state.vault().reclaim(&id).await {
        tracing::warn!("Failed to reclaim backup for deleted {}: {}", id, e);
    }
    Ok(StatusCode::NO_CONTENT)
}
