//! Deployment pipeline

pub mod logger;
mod orchestrator;

pub use orchestrator::{PipelineDeps, PipelineOrchestrator};
