//! Durable deployment record store

mod deployments;
mod lease;

pub use deployments::DeploymentStore;
pub use lease::Lease;
