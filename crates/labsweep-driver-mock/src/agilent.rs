//! Simulated Agilent 33220A function generator.
//!
//! Behaves like [`SimulatedInstrument`] except that writes to the arbitrary
//! waveform quantity are accepted and dropped, so sweeping other quantities never
//! re-uploads a waveform.

use crate::simulated::{SimulatedFactory, SimulatedInstrument};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use labsweep_core::capabilities::{DriverHandle, QuantityDriver};
use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::driver::{DriverFactory, DriverRequest};
use serde_json::Value;
use std::sync::Arc;

const DRIVER_TYPE: &str = "agilent33220a";

/// Quantities that are never forwarded to the instrument.
pub const IGNORED_QUANTITIES: &[&str] = &["Arb. Waveform"];

/// Function generator driver.
pub struct Agilent33220a {
    inner: Arc<SimulatedInstrument>,
}

impl Agilent33220a {
    /// Wrap a simulated instrument.
    pub fn new(inner: Arc<SimulatedInstrument>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl QuantityDriver for Agilent33220a {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        if IGNORED_QUANTITIES.contains(&name) {
            tracing::debug!(
                instrument = %self.inner.identity(),
                quantity = name,
                "Ignoring waveform write"
            );
            return Ok(());
        }
        self.inner.set_value(name, value).await
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        self.inner.get_value(name).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// Catalogue entry for [`Agilent33220a`].
///
/// Shares a [`SimulatedFactory`] so tests can inject errors and inspect the
/// underlying instrument.
pub struct Agilent33220aFactory {
    backend: Arc<SimulatedFactory>,
}

impl Agilent33220aFactory {
    /// Create a factory with its own simulated backend.
    pub fn new() -> Self {
        Self::with_backend(Arc::new(SimulatedFactory::new()))
    }

    /// Create a factory that builds on `backend`.
    pub fn with_backend(backend: Arc<SimulatedFactory>) -> Self {
        Self { backend }
    }
}

impl Default for Agilent33220aFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for Agilent33220aFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Agilent 33220A Function Generator"
    }

    fn validate(&self, descriptor: &InstrumentDescriptor) -> Result<()> {
        if !descriptor.visa {
            anyhow::bail!("the 33220A is only reachable through a VISA resource");
        }
        Ok(())
    }

    fn build(&self, request: DriverRequest) -> BoxFuture<'static, Result<DriverHandle>> {
        let built = self.backend.build_instrument(&request);
        Box::pin(async move {
            let inner = built?;
            Ok(Arc::new(Agilent33220a::new(inner)) as DriverHandle)
        })
    }
}
