//! labsweep: instrument connection management and multi-level parameter sweeps.
//!
//! The workspace crates hold the domain logic:
//!
//! - `labsweep-core`: errors, identities, descriptors and the driver capability
//! - `labsweep-hardware`: connection registry, resource resolution, driver catalogue
//! - `labsweep-experiment`: plan compiler, sweep files and the execution engine
//! - `labsweep-driver-mock`: simulated instruments
//!
//! This crate adds the application shell around them.

pub mod app;
pub mod config;
pub mod health;
pub mod storage;
pub mod tracing_setup;

pub use config::LabConfig;
