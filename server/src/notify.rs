//! Deployment outcome notification

use async_trait::async_trait;
use serde::Serialize;

use crate::errors::DeployError;
use crate::models::{Deployment, DeploymentStatus};
use crate::storage::settings::NotifySettings;

/// Summary posted when a deployment reaches a terminal status
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub deployment_id: String,
    pub target_name: String,
    pub mode: String,
    pub status: String,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
    pub ai_summary: Option<String>,
    pub targets: Vec<String>,
}

impl DeploymentSummary {
    pub fn from_deployment(deployment: &Deployment, default_targets: &[String]) -> Self {
        let mut targets = default_targets.to_vec();
        for target in &deployment.notification_targets {
            if !targets.contains(target) {
                targets.push(target.clone());
            }
        }
        Self {
            deployment_id: deployment.id.clone(),
            target_name: deployment.target_name.clone(),
            mode: deployment.mode.to_string(),
            status: deployment.status.to_string(),
            result_url: deployment.result_url.clone(),
            error_message: deployment.error_message.clone(),
            ai_summary: deployment.ai_summary.clone(),
            targets,
        }
    }

    /// The pipeline sends its summary before the terminal status lands on
    /// the record, so the outcome fields come from the caller.
    pub fn with_outcome(
        mut self,
        status: DeploymentStatus,
        result_url: Option<String>,
        ai_summary: Option<String>,
    ) -> Self {
        self.status = status.to_string();
        if result_url.is_some() {
            self.result_url = result_url;
        }
        if ai_summary.is_some() {
            self.ai_summary = ai_summary;
        }
        self
    }

    pub fn success(&self) -> bool {
        self.status == DeploymentStatus::Success.as_str()
    }
}

/// Delivers deployment summaries. Callers treat failures as non-fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, summary: &DeploymentSummary) -> Result<(), DeployError>;
}

/// Posts the summary as JSON to a configured webhook
pub struct WebhookNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, DeployError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, summary: &DeploymentSummary) -> Result<(), DeployError> {
        let response = self
            .http
            .post(&self.webhook_url)
            .json(summary)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(DeployError::NotifyError(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Notifier used when no webhook is configured
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, summary: &DeploymentSummary) -> Result<(), DeployError> {
        tracing::info!(
            "Notification (no webhook configured): {} {} for {}",
            summary.status,
            summary.deployment_id,
            summary.target_name
        );
        Ok(())
    }
}

/// Pick a notifier from settings
pub fn notifier_from_settings(
    settings: &NotifySettings,
) -> Result<Box<dyn Notifier>, DeployError> {
    if settings.webhook_url.is_empty() {
        Ok(Box::new(NoopNotifier))
    } else {
        Ok(Box::new(WebhookNotifier::new(&settings.webhook_url)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentConfig, DeploymentMode};

    #[test]
    fn summary_merges_targets_without_duplicates() {
        let config = DeploymentConfig {
            mode: DeploymentMode::PathShared,
            target_name: "demo".to_string(),
            custom_domain: None,
            notification_targets: vec!["ops@example.com".to_string(), "dev@example.com".to_string()],
            ai_enabled: true,
            domain_purchase_confirmed: false,
        };
        let deployment = Deployment::new("d-1".to_string(), &config, None);
        let summary = DeploymentSummary::from_deployment(
            &deployment,
            &["ops@example.com".to_string()],
        );
        assert_eq!(summary.targets, vec!["ops@example.com", "dev@example.com"]);
        assert!(!summary.success());
    }

    #[test]
    fn outcome_overrides_fields_the_record_does_not_carry_yet() {
        let config = DeploymentConfig {
            mode: DeploymentMode::PathShared,
            target_name: "demo".to_string(),
            custom_domain: None,
            notification_targets: vec![],
            ai_enabled: true,
            domain_purchase_confirmed: false,
        };
        let deployment = Deployment::new("d-1".to_string(), &config, None);
        let summary = DeploymentSummary::from_deployment(&deployment, &[]).with_outcome(
            DeploymentStatus::Success,
            Some("https://sites.example.com/demo/".to_string()),
            None,
        );
        assert!(summary.success());
        assert_eq!(
            summary.result_url.as_deref(),
            Some("https://sites.example.com/demo/")
        );
    }
}
