//! Driver capability trait.
//!
//! The core never looks inside a driver. Everything it needs from a connected
//! instrument is the ability to write and read named quantities, which is what
//! [`QuantityDriver`] expresses. Values are carried as `serde_json::Value` so a
//! driver can accept numbers, booleans or strings without the core caring.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Read/write access to the named quantities of one instrument.
///
/// Both operations are fallible. Implementations must be safe to share across
/// tasks; the registry hands out clones of the same `Arc`.
///
/// # Example
///
/// ```rust,ignore
/// driver.set_value("Frequency", serde_json::json!(1000.0)).await?;
/// let volts = driver.get_value("Voltage").await?;
/// ```
#[async_trait]
pub trait QuantityDriver: Send + Sync {
    /// Short driver type name used in logs and errors.
    fn driver_type(&self) -> &str;

    /// Write a quantity.
    async fn set_value(&self, name: &str, value: serde_json::Value) -> Result<()>;

    /// Read a quantity.
    async fn get_value(&self, name: &str) -> Result<serde_json::Value>;

    /// Release the underlying link. Called once by the registry on disconnect.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn QuantityDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QuantityDriver({})", self.driver_type())
    }
}

/// Shared handle to a connected driver.
pub type DriverHandle = Arc<dyn QuantityDriver>;
