//! Filesystem primitives

pub mod file;
