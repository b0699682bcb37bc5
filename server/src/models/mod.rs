//! Data model shared across the pipeline, store, and HTTP surface

pub mod deployment;

pub use deployment::{
    Deployment, DeploymentConfig, DeploymentMode, DeploymentStatus, LogLine, LogLineLevel,
    PipelineStep, ProvisionOutcome, StepStatus, ValidationReport, VerifyOutcome,
};
