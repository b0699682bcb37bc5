//! Background workers

pub mod watchdog;
