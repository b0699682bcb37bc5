//! Deployment-scoped logging

use crate::loghub::LogHub;
use crate::models::{LogLine, LogLineLevel, PipelineStep};
use crate::store::DeploymentStore;

/// Writes deployment log lines durably and fans them out live. The durable
/// append always happens before the broadcast so a subscriber catching up
/// from the store never misses a line it also saw live.
#[derive(Clone)]
pub struct DeployLogger {
    store: DeploymentStore,
    hub: LogHub,
    deployment_id: String,
}

impl DeployLogger {
    pub fn new(store: DeploymentStore, hub: LogHub, deployment_id: impl Into<String>) -> Self {
        Self {
            store,
            hub,
            deployment_id: deployment_id.into(),
        }
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub async fn log(
        &self,
        level: LogLineLevel,
        step: Option<PipelineStep>,
        message: impl Into<String>,
    ) {
        let line = LogLine::new(&self.deployment_id, level, step, message);
        tracing::debug!(
            deployment = %self.deployment_id,
            step = step.map(|s| s.as_str()).unwrap_or("-"),
            "{}",
            line.message
        );
        if let Err(e) = self.store.append_log(&line).await {
            tracing::warn!(
                "Failed to persist log line for {}: {}",
                self.deployment_id,
                e
            );
        }
        self.hub.publish(line).await;
    }

    pub async fn info(&self, step: Option<PipelineStep>, message: impl Into<String>) {
        self.log(LogLineLevel::Info, step, message).await;
    }

    pub async fn warn(&self, step: Option<PipelineStep>, message: impl Into<String>) {
        self.log(LogLineLevel::Warning, step, message).await;
    }

    pub async fn error(&self, step: Option<PipelineStep>, message: impl Into<String>) {
        self.log(LogLineLevel::Error, step, message).await;
    }
}
