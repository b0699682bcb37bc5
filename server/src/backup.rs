//! Durable archive backups

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::storage::layout::StorageLayout;

/// Keeps the uploaded archive of every deployment until its record reaches a
/// terminal status, so the watchdog can restart a stuck pipeline from the
/// exact bytes the user submitted.
#[derive(Debug, Clone)]
pub struct ArchiveVault {
    layout: StorageLayout,
}

impl ArchiveVault {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    /// Persist the uploaded archive bytes for a deployment
    pub async fn store(&self, deployment_id: &str, bytes: &[u8]) -> Result<PathBuf, DeployError> {
        let file = self.layout.backup_file(deployment_id);
        file.write_bytes(bytes).await?;
        Ok(file.path().to_path_buf())
    }

    /// Path to the stored backup, if one exists
    pub async fn fetch(&self, deployment_id: &str) -> Result<PathBuf, DeployError> {
        let file = self.layout.backup_file(deployment_id);
        if !file.exists().await {
            return Err(DeployError::NotFound(format!(
                "backup archive for deployment {}",
                deployment_id
            )));
        }
        Ok(file.path().to_path_buf())
    }

    /// Remove the backup once the deployment is terminal
    pub async fn reclaim(&self, deployment_id: &str) -> Result<(), DeployError> {
        self.layout.backup_file(deployment_id).delete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_fetch_reclaim_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let vault = ArchiveVault::new(StorageLayout::new(dir.path()));

        let path = vault.store("d-1", b"archive-bytes").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"archive-bytes");

        let fetched = vault.fetch("d-1").await.unwrap();
        assert_eq!(fetched, path);

        vault.reclaim("d-1").await.unwrap();
        assert!(vault.fetch("d-1").await.is_err());
    }
}
