//! Cloud infrastructure provisioning

pub mod api;
pub mod client;
pub mod memory;
pub mod naming;
pub mod rest;
pub mod topology;

pub use api::CloudApi;
pub use client::ResourceClient;
pub use memory::MemoryCloudApi;
pub use rest::RestCloudApi;
pub use topology::TopologyProvisioner;
