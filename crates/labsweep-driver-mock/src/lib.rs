//! Simulated instrument drivers for labsweep
//!
//! This crate provides in-memory instruments for tests and dry runs without
//! physical hardware. All latency is simulated with `tokio::time::sleep`.
//!
//! # Available Drivers
//!
//! - [`SimulatedInstrument`] - generic instrument: writes are stored, reads return
//!   the last write or a preset
//! - [`Agilent33220a`] - function generator that drops arbitrary waveform writes
//!
//! # Driver Factory Pattern
//!
//! ```rust,ignore
//! use labsweep_driver_mock::{Agilent33220aFactory, SimulatedFactory};
//! use labsweep_hardware::DriverCatalog;
//!
//! let catalog = DriverCatalog::new(Arc::new(SimulatedFactory::new()));
//! catalog.register(Arc::new(Agilent33220aFactory::new()));
//! ```

mod agilent;
pub mod errors;
mod simulated;

pub use agilent::{Agilent33220a, Agilent33220aFactory, IGNORED_QUANTITIES};
pub use errors::{ErrorConfig, ErrorScenario, Operation};
pub use simulated::{Journal, JournalEntry, SimulatedFactory, SimulatedInstrument};
