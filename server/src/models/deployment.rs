//! Deployment records and pipeline step bookkeeping

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;

/// Hosting topology for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Served under a path prefix on the shared domain
    PathShared,
    /// Served on a dedicated custom domain through the shared edge
    HostShared,
    /// Built into an image and run as a managed container service
    Container,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::PathShared => "path-shared",
            DeploymentMode::HostShared => "host-shared",
            DeploymentMode::Container => "container",
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path-shared" => Ok(DeploymentMode::PathShared),
            "host-shared" => Ok(DeploymentMode::HostShared),
            "container" => Ok(DeploymentMode::Container),
            other => Err(DeployError::InputError(format!(
                "unknown deployment mode: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline steps in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStep {
    Extract,
    AiInspect,
    AiFix,
    Build,
    Verify,
    Domain,
    Infra,
    Upload,
    Notify,
}

impl PipelineStep {
    /// All steps in execution order
    pub const ALL: [PipelineStep; 9] = [
        PipelineStep::Extract,
        PipelineStep::AiInspect,
        PipelineStep::AiFix,
        PipelineStep::Build,
        PipelineStep::Verify,
        PipelineStep::Domain,
        PipelineStep::Infra,
        PipelineStep::Upload,
        PipelineStep::Notify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStep::Extract => "EXTRACT",
            PipelineStep::AiInspect => "AI_INSPECT",
            PipelineStep::AiFix => "AI_FIX",
            PipelineStep::Build => "BUILD",
            PipelineStep::Verify => "VERIFY",
            PipelineStep::Domain => "DOMAIN",
            PipelineStep::Infra => "INFRA",
            PipelineStep::Upload => "UPLOAD",
            PipelineStep::Notify => "NOTIFY",
        }
    }
}

impl std::fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a deployment log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLineLevel {
    Info,
    Warning,
    Error,
}

/// One line in a deployment's append-only log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub deployment_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLineLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<PipelineStep>,
    pub message: String,
}

impl LogLine {
    pub fn new(
        deployment_id: &str,
        level: LogLineLevel,
        step: Option<PipelineStep>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            timestamp: Utc::now(),
            level,
            step,
            message: message.into(),
        }
    }
}

/// Immutable per-deployment configuration captured at intake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Hosting topology
    pub mode: DeploymentMode,

    /// Slug-safe site name
    pub target_name: String,

    /// Custom domain, required in host-shared mode
    #[serde(default)]
    pub custom_domain: Option<String>,

    /// Notification targets specific to this deployment
    #[serde(default)]
    pub notification_targets: Vec<String>,

    /// Run the AI inspect/fix steps
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,

    /// User has confirmed billable domain registration
    #[serde(default)]
    pub domain_purchase_confirmed: bool,
}

fn default_ai_enabled() -> bool {
    true
}

/// Durable record for one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub mode: DeploymentMode,
    pub target_name: String,
    #[serde(default)]
    pub custom_domain: Option<String>,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub current_step: Option<PipelineStep>,
    /// Ordered by step execution order (BTreeMap over the step enum)
    pub step_statuses: BTreeMap<PipelineStep, StepStatus>,
    #[serde(default)]
    pub result_url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub ai_summary: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub notification_targets: Vec<String>,
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,
    #[serde(default)]
    pub domain_purchase_confirmed: bool,
    #[serde(default)]
    pub archive_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// New queued record with every step pending
    pub fn new(id: String, config: &DeploymentConfig, archive_filename: Option<String>) -> Self {
        let step_statuses = PipelineStep::ALL
            .iter()
            .map(|s| (*s, StepStatus::Pending))
            .collect();
        Self {
            id,
            mode: config.mode,
            target_name: config.target_name.clone(),
            custom_domain: config.custom_domain.clone(),
            status: DeploymentStatus::Queued,
            current_step: None,
            step_statuses,
            result_url: None,
            error_message: None,
            ai_summary: None,
            retry_count: 0,
            notification_targets: config.notification_targets.clone(),
            ai_enabled: config.ai_enabled,
            domain_purchase_confirmed: config.domain_purchase_confirmed,
            archive_filename,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Configuration view of the stored record, used when re-running
    pub fn config(&self) -> DeploymentConfig {
        DeploymentConfig {
            mode: self.mode,
            target_name: self.target_name.clone(),
            custom_domain: self.custom_domain.clone(),
            notification_targets: self.notification_targets.clone(),
            ai_enabled: self.ai_enabled,
            domain_purchase_confirmed: self.domain_purchase_confirmed,
        }
    }
}

/// Outcome of the infrastructure provisioning step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionOutcome {
    /// Public URL where the deployment will be reachable
    pub result_url: String,

    /// Storage bucket receiving artifacts, absent in container mode
    #[serde(default)]
    pub bucket: Option<String>,

    /// Backend service fronting the bucket or container
    #[serde(default)]
    pub backend: Option<String>,

    /// Container service name, container mode only
    #[serde(default)]
    pub service: Option<String>,
}

/// Result of the AI inspect/fix pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the reviewer approved the project as-is
    pub pass: bool,

    /// Human-readable summary of the review
    pub summary: String,

    /// Full-file replacements keyed by relative path
    #[serde(default)]
    pub fixes: BTreeMap<String, String>,
}

impl ValidationReport {
    /// Report used when review is disabled or unavailable
    pub fn pass_through(summary: impl Into<String>) -> Self {
        Self {
            pass: true,
            summary: summary.into(),
            fixes: BTreeMap::new(),
        }
    }
}

/// Result of the VERIFY probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub reachable: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
}
