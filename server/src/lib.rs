//! WebDeploy Server Library
//!
//! Core modules for the website deployment pipeline service.

pub mod app;
pub mod archive;
pub mod backup;
pub mod build;
pub mod errors;
pub mod filesys;
pub mod infra;
pub mod loghub;
pub mod logs;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod store;
pub mod upload;
pub mod utils;
pub mod validate;
pub mod workers;
