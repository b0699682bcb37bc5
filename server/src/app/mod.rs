//! Application wiring

pub mod run;
