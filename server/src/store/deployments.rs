//! JSON-document deployment store

use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;

use crate::errors::DeployError;
use crate::models::{Deployment, LogLine, PipelineStep, StepStatus};
use crate::storage::layout::StorageLayout;
use crate::store::lease::Lease;

/// Durable store for deployment records, one JSON document per id plus an
/// append-only log file. A single write lock serializes read-modify-write
/// cycles so concurrent tasks never clobber each other's updates.
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    layout: StorageLayout,
    write_lock: Arc<Mutex<()>>,
}

impl DeploymentStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self {
            layout,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Persist a new record. Fails if the id is already taken.
    pub async fn create(&self, deployment: &Deployment) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.layout.deployment_file(&deployment.id);
        if file.exists().await {
            return Err(DeployError::StorageError(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        file.write_json(deployment).await
    }

    /// Load one record
    pub async fn get(&self, id: &str) -> Result<Deployment, DeployError> {
        let file = self.layout.deployment_file(id);
        if !file.exists().await {
            return Err(DeployError::NotFound(format!("deployment {}", id)));
        }
        file.read_json().await
    }

    /// All records, newest first
    pub async fn list(&self) -> Result<Vec<Deployment>, DeployError> {
        let dir = self.layout.deployments_dir();
        let mut deployments = Vec::new();

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(deployments),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().to_string();
            let file = self.layout.deployment_file(&id);
            if !file.exists().await {
                continue;
            }
            match file.read_json::<Deployment>().await {
                Ok(deployment) => deployments.push(deployment),
                Err(e) => {
                    tracing::warn!("Skipping unreadable deployment record {}: {}", id, e);
                }
            }
        }

        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    /// Read-modify-write under the store lock
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Deployment, DeployError>
    where
        F: FnOnce(&mut Deployment),
    {
        let _guard = self.write_lock.lock().await;
        let file = self.layout.deployment_file(id);
        if !file.exists().await {
            return Err(DeployError::NotFound(format!("deployment {}", id)));
        }
        let mut deployment: Deployment = file.read_json().await?;
        mutate(&mut deployment);
        file.write_json(&deployment).await?;
        Ok(deployment)
    }

    /// Record a step transition; a running step becomes the current step
    pub async fn set_step(
        &self,
        id: &str,
        step: PipelineStep,
        status: StepStatus,
    ) -> Result<Deployment, DeployError> {
        self.update(id, |d| {
            d.step_statuses.insert(step, status);
            if status == StepStatus::Running {
                d.current_step = Some(step);
            }
        })
        .await
    }

    /// Record a step failure: error text, the failed step, and every step
    /// after it (except NOTIFY) skipped. The lifecycle status is left alone;
    /// the orchestrator finalizes it only after NOTIFY has run, so a terminal
    /// record never shows a step still in flight.
    pub async fn mark_failed(
        &self,
        id: &str,
        failed_step: PipelineStep,
        error: &str,
    ) -> Result<Deployment, DeployError> {
        self.update(id, |d| {
            d.error_message = Some(error.to_string());
            d.step_statuses.insert(failed_step, StepStatus::Failed);
            for step in PipelineStep::ALL {
                if step > failed_step && step != PipelineStep::Notify {
                    d.step_statuses.insert(step, StepStatus::Skipped);
                }
            }
        })
        .await
    }

    /// Append one line to the deployment's durable log
    pub async fn append_log(&self, line: &LogLine) -> Result<(), DeployError> {
        let file = self.layout.deployment_logs_file(&line.deployment_id);
        let encoded = serde_json::to_vec(line)?;
        file.append_line(&encoded).await
    }

    /// All accumulated log lines, oldest first
    pub async fn get_logs(&self, id: &str) -> Result<Vec<LogLine>, DeployError> {
        let file = self.layout.deployment_logs_file(id);
        if !file.exists().await {
            return Ok(Vec::new());
        }
        let contents = file.read_string().await?;
        let mut lines = Vec::new();
        for raw in contents.lines() {
            if raw.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogLine>(raw) {
                Ok(line) => lines.push(line),
                Err(e) => {
                    tracing::warn!("Skipping corrupt log line for {}: {}", id, e);
                }
            }
        }
        Ok(lines)
    }

    /// Remove the record, its logs, and any lease
    pub async fn delete(&self, id: &str) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let dir = self.layout.deployments_dir().join(id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DeployError::NotFound(format!("deployment {}", id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Take the recovery lease for a deployment. Returns false when another
    /// holder owns an unexpired lease.
    pub async fn try_acquire_lease(
        &self,
        id: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> Result<bool, DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.layout.deployment_lease_file(id);
        if file.exists().await {
            let existing: Lease = file.read_json().await?;
            if !existing.expired() && existing.holder != holder {
                return Ok(false);
            }
        }
        file.write_json(&Lease::new(holder, ttl_secs)).await?;
        Ok(true)
    }

    /// Drop the lease if this holder owns it
    pub async fn release_lease(&self, id: &str, holder: &str) -> Result<(), DeployError> {
        let _guard = self.write_lock.lock().await;
        let file = self.layout.deployment_lease_file(id);
        if !file.exists().await {
            return Ok(());
        }
        let existing: Lease = file.read_json().await?;
        if existing.holder == holder {
            file.delete().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeploymentConfig, DeploymentMode, DeploymentStatus, LogLineLevel};
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, DeploymentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DeploymentStore::new(StorageLayout::new(dir.path()));
        (dir, store)
    }

    fn sample(id: &str) -> Deployment {
        let config = DeploymentConfig {
            mode: DeploymentMode::PathShared,
            target_name: "demo".to_string(),
            custom_domain: None,
            notification_targets: vec![],
            ai_enabled: true,
            domain_purchase_confirmed: false,
        };
        Deployment::new(id.to_string(), &config, None)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, store) = store();
        let dep = sample("d-1");
        store.create(&dep).await.unwrap();
        let loaded = store.get("d-1").await.unwrap();
        assert_eq!(loaded.target_name, "demo");
        assert!(store.create(&dep).await.is_err());
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let (_dir, store) = store();
        let mut first = sample("d-1");
        first.created_at = Utc::now() - chrono::Duration::seconds(10);
        store.create(&first).await.unwrap();
        store.create(&sample("d-2")).await.unwrap();
        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, "d-2");
    }

    #[tokio::test]
    async fn mark_failed_skips_later_steps_but_not_notify() {
        let (_dir, store) = store();
        store.create(&sample("d-1")).await.unwrap();
        let dep = store
            .mark_failed("d-1", PipelineStep::Build, "npm exited 1")
            .await
            .unwrap();
        // The lifecycle status stays where it was until the caller finalizes.
        assert_eq!(dep.status, DeploymentStatus::Queued);
        assert!(dep.completed_at.is_none());
        assert_eq!(dep.step_statuses[&PipelineStep::Build], StepStatus::Failed);
        assert_eq!(dep.step_statuses[&PipelineStep::Upload], StepStatus::Skipped);
        assert_eq!(dep.step_statuses[&PipelineStep::Notify], StepStatus::Pending);
        assert_eq!(dep.error_message.as_deref(), Some("npm exited 1"));
    }

    #[tokio::test]
    async fn logs_append_in_order() {
        let (_dir, store) = store();
        store.create(&sample("d-1")).await.unwrap();
        for i in 0..3 {
            let line = LogLine::new("d-1", LogLineLevel::Info, None, format!("line {}", i));
            store.append_log(&line).await.unwrap();
        }
        let logs = store.get_logs("d-1").await.unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[2].message, "line 2");
    }

    #[tokio::test]
    async fn lease_blocks_other_holders_until_expiry() {
        let (_dir, store) = store();
        store.create(&sample("d-1")).await.unwrap();
        assert!(store.try_acquire_lease("d-1", "a", 60).await.unwrap());
        assert!(!store.try_acquire_lease("d-1", "b", 60).await.unwrap());
        // Same holder may refresh.
        assert!(store.try_acquire_lease("d-1", "a", 60).await.unwrap());
        store.release_lease("d-1", "a").await.unwrap();
        assert!(store.try_acquire_lease("d-1", "b", 60).await.unwrap());
    }
}
