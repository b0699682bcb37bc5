//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::file::File;

/// Storage layout for the server
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Directory holding one sub-directory per deployment record
    pub fn deployments_dir(&self) -> PathBuf {
        self.base_dir.join("deployments")
    }

    /// Record document for a deployment
    pub fn deployment_file(&self, deployment_id: &str) -> File {
        File::new(
            self.deployments_dir()
                .join(deployment_id)
                .join("deployment.json"),
        )
    }

    /// Append-only log file for a deployment
    pub fn deployment_logs_file(&self, deployment_id: &str) -> File {
        File::new(self.deployments_dir().join(deployment_id).join("logs.jsonl"))
    }

    /// Lease record for a deployment (watchdog mutual exclusion)
    pub fn deployment_lease_file(&self, deployment_id: &str) -> File {
        File::new(self.deployments_dir().join(deployment_id).join("lease.json"))
    }

    /// Directory holding durable backups of uploaded archives
    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join("uploads")
    }

    /// Backup archive path for a deployment
    pub fn backup_file(&self, deployment_id: &str) -> File {
        File::new(self.uploads_dir().join(format!("{}.tar.gz", deployment_id)))
    }

    /// Scratch directory for archive extraction and builds
    pub fn temp_dir(&self) -> PathBuf {
        self.base_dir.join("tmp")
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new("/var/lib/webdeploy")
    }
}
