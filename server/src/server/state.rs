//! Server state

use crate::backup::ArchiveVault;
use crate::loghub::LogHub;
use crate::pipeline::PipelineOrchestrator;
use crate::storage::settings::Settings;
use crate::store::DeploymentStore;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: PipelineOrchestrator,
}

impl ServerState {
    pub fn new(orchestrator: PipelineOrchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn store(&self) -> &DeploymentStore {
        &self.orchestrator.deps().store
    }

    pub fn hub(&self) -> &LogHub {
        &self.orchestrator.deps().hub
    }

    pub fn vault(&self) -> &ArchiveVault {
        &self.orchestrator.deps().vault
    }

    pub fn settings(&self) -> &Settings {
        &self.orchestrator.deps().settings
    }
}
