//! Instrument and quantity identities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical instrument identity (the operator-chosen name, e.g. "awg" or "dmm_1").
pub type InstrumentId = String;

/// A quantity on a specific instrument.
///
/// Equality is structural. There is no inherent ordering; sweep order comes only
/// from the level a quantity is placed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantityId {
    /// Instrument that owns the quantity
    pub instrument: InstrumentId,
    /// Quantity name as understood by the instrument driver
    pub quantity: String,
}

impl QuantityId {
    /// Create a quantity identity.
    pub fn new(instrument: impl Into<String>, quantity: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            quantity: quantity.into(),
        }
    }

    /// Column key used for this quantity when it is swept.
    pub fn input_key(&self) -> String {
        format!("Input - {} - {}", self.instrument, self.quantity)
    }

    /// Column key used for this quantity when it is sampled.
    pub fn output_key(&self) -> String {
        format!("Output - {} - {}", self.instrument, self.quantity)
    }
}

impl fmt::Display for QuantityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.instrument, self.quantity)
    }
}
