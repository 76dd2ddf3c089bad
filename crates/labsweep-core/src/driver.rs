//! Driver factory plug-in API.
//!
//! Drivers are not loaded by path at runtime. Each implementation provides a
//! [`DriverFactory`] that is registered with the driver catalogue at startup; a
//! descriptor either uses the catalogue's generic factory or names a custom one.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Composition Root (main.rs)               │
//! │  catalog.register(Agilent33220aFactory::new());          │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ConnectionRegistry                    │
//! │  resolve resource ─▶ pick factory ─▶ factory.build()     │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::capabilities::DriverHandle;
use crate::descriptor::InstrumentDescriptor;
use crate::identity::InstrumentId;
use anyhow::Result;
use futures::future::BoxFuture;

/// Everything a factory needs to construct a driver.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    /// Instrument identity
    pub identity: InstrumentId,
    /// Matched resource string, for VISA-like instruments
    pub resource: Option<String>,
    /// Descriptor the connection was requested with
    pub descriptor: InstrumentDescriptor,
}

/// Constructs drivers of one type.
pub trait DriverFactory: Send + Sync {
    /// Catalogue key (the value a descriptor's `driver` field refers to).
    fn driver_type(&self) -> &'static str;

    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Check the descriptor once its resource is resolved. Nothing is built when
    /// this fails.
    fn validate(&self, _descriptor: &InstrumentDescriptor) -> Result<()> {
        Ok(())
    }

    /// Build a connected driver.
    fn build(&self, request: DriverRequest) -> BoxFuture<'static, Result<DriverHandle>>;
}
