//! Core types and traits for labsweep.
//!
//! - [`error`]: the `SweepError` taxonomy and driver errors
//! - [`identity`]: instrument and quantity identities
//! - [`descriptor`]: persisted instrument descriptors
//! - [`capabilities`]: the `QuantityDriver` capability every driver implements
//! - [`driver`]: the factory plug-in API used by the driver catalogue
//! - [`health`]: the background control endpoint health check

pub mod capabilities;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod health;
pub mod identity;

pub use capabilities::{DriverHandle, QuantityDriver};
pub use descriptor::{ConnectionKind, DriverSource, InstrumentDescriptor, InterfaceTag};
pub use driver::{DriverFactory, DriverRequest};
pub use error::{DriverError, DriverErrorKind, SweepError, SweepResult};
pub use identity::{InstrumentId, QuantityId};
