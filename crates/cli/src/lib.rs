//! Tollgate CLI
//!
//! Runs checkout scenarios described in YAML against the in-memory
//! storefront services and prints what the customer would see.

pub mod config;
pub mod logging;
pub mod runner;
pub mod scenario;
