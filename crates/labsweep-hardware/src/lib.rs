//! Instrument connection management for labsweep.
//!
//! # Modules
//!
//! - [`resources`]: live resource listing and connection string resolution
//! - [`catalog`]: generic and custom driver factories
//! - [`registry`]: the connection registry (one live driver per instrument)
//! - [`store`]: instrument descriptor storage
//! - [`service`]: descriptor records and connections managed together
//!
//! # Example
//!
//! ```rust,ignore
//! use labsweep_hardware::{ConnectionRegistry, DriverCatalog, StaticResources};
//!
//! let catalog = Arc::new(DriverCatalog::new(Arc::new(SimulatedFactory::new())));
//! let registry = ConnectionRegistry::new(catalog, Arc::new(StaticResources::new(["GPIB0::22::INSTR"])));
//! let dmm = registry.connect("dmm", &InstrumentDescriptor::new("dmm", "GPIB", "22")).await?;
//! ```

pub mod catalog;
pub mod registry;
pub mod resources;
pub mod service;
pub mod store;

pub use catalog::DriverCatalog;
pub use registry::{ConnectionEntry, ConnectionRegistry};
#[cfg(feature = "serial")]
pub use resources::SerialPortResources;
pub use resources::{CombinedResources, ResourceLister, StaticResources};
pub use service::{InstrumentService, InstrumentStatus};
pub use store::{DescriptorStore, MemoryDescriptorStore};
