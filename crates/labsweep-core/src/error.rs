//! Error types shared by every labsweep crate.
//!
//! `SweepError` is the single taxonomy surfaced to callers of the connection
//! registry, the plan compiler and the execution engine. It falls into three groups:
//!
//! - **Connection errors** - `AlreadyConnected`, `NotConnected`, `ResourceNotFound`,
//!   `DriverLoadError`, `ConnectionFailed`, `DisconnectFailed`, `UnknownInstrument`.
//!   Raised by the registry and the instrument service. During bulk operations these
//!   are aggregated per instrument and never abort the batch.
//! - **Configuration errors** - `LevelLengthMismatch`, `InvalidRange`,
//!   `DuplicateQuantity`, `Configuration`. Raised before a sweep starts; compilation
//!   aborts and no partial plan exists.
//! - **Execution errors** - `StepWriteFailed`, `StepReadFailed`, `InvalidState`.
//!   Fatal to the current run. The engine reports them together with the index of
//!   the last step that completed.
//!
//! Cancellation is not an error and has no variant here.
//!
//! Driver plug-ins report failures with [`DriverError`], which carries the driver
//! type and a [`DriverErrorKind`] so callers can tell a configuration problem from
//! a communication one.

use crate::identity::{InstrumentId, QuantityId};
use thiserror::Error;

// =============================================================================
// Driver Errors
// =============================================================================

/// Category of a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Driver could not be constructed
    Initialization,
    /// Descriptor or driver settings are invalid
    Configuration,
    /// Instrument did not respond or the link dropped
    Communication,
    /// Closing the connection failed
    Shutdown,
    /// Quantity name is not known to the driver
    UnknownQuantity,
    /// Value rejected by the driver
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::UnknownQuantity => "unknown_quantity",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a driver implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Driver that produced the error (e.g. "simulated", "agilent33220a")
    pub driver_type: String,
    /// Failure category
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Create a new driver error.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the labsweep error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Primary error type for instrument connections and sweeps.
#[derive(Error, Debug, Clone)]
pub enum SweepError {
    /// A connection entry already exists for this instrument.
    ///
    /// The registry never reconnects silently; disconnect first.
    #[error("Instrument '{identity}' is already connected")]
    AlreadyConnected {
        /// Instrument identity
        identity: InstrumentId,
    },

    /// No connection entry exists for this instrument.
    #[error("Instrument '{identity}' is not currently connected")]
    NotConnected {
        /// Instrument identity
        identity: InstrumentId,
    },

    /// No live resource matched the descriptor's interface and address.
    ///
    /// `available` holds every resource that was offered so the operator can see
    /// what the resource manager actually reported.
    #[error(
        "No live resource matches '{identity}' ({interface} {address}). Available resources are: {available:?}"
    )]
    ResourceNotFound {
        /// Instrument identity
        identity: InstrumentId,
        /// Interface tag from the descriptor
        interface: String,
        /// Address token from the descriptor
        address: String,
        /// Full live resource list at the time of resolution
        available: Vec<String>,
    },

    /// The custom driver named by the descriptor could not be loaded.
    #[error("Failed to load driver '{reference}' for '{identity}': {reason}")]
    DriverLoadError {
        /// Instrument identity
        identity: InstrumentId,
        /// Custom driver reference from the descriptor
        reference: String,
        /// Why loading failed
        reason: String,
    },

    /// Connecting failed. `cause` holds the underlying resolution or driver error.
    #[error("Could not connect to '{identity}': {cause}")]
    ConnectionFailed {
        /// Instrument identity
        identity: InstrumentId,
        /// Underlying failure
        cause: Box<SweepError>,
    },

    /// The driver refused to close. The connection entry is kept.
    #[error("Failed to disconnect '{identity}': {reason}")]
    DisconnectFailed {
        /// Instrument identity
        identity: InstrumentId,
        /// Driver-reported reason
        reason: String,
    },

    /// No descriptor is stored for this instrument.
    #[error("Unknown instrument '{identity}'")]
    UnknownInstrument {
        /// Instrument identity
        identity: InstrumentId,
    },

    /// A range in a sweep level expands to a different length than the rest of the level.
    #[error(
        "Number of points for '{quantity}' ({actual}) does not match the {expected} points of level {level}"
    )]
    LevelLengthMismatch {
        /// Zero-based level index
        level: usize,
        /// Length established by the first range in the level
        expected: usize,
        /// Length of the offending range
        actual: usize,
        /// Offending quantity
        quantity: QuantityId,
    },

    /// A range specification is malformed (zero points, non-finite bounds).
    #[error("Invalid range for '{quantity}': {reason}")]
    InvalidRange {
        /// Offending quantity
        quantity: QuantityId,
        /// What is wrong with it
        reason: String,
    },

    /// The same quantity appears in more than one range of a sweep.
    #[error("Quantity '{quantity}' appears more than once in the sweep")]
    DuplicateQuantity {
        /// Offending quantity
        quantity: QuantityId,
    },

    /// Writing an input value failed. The run is terminated.
    #[error("Step {step}: failed to write '{quantity}': {cause}")]
    StepWriteFailed {
        /// Step being executed
        step: usize,
        /// Quantity being written
        quantity: QuantityId,
        /// Driver-reported cause
        cause: String,
    },

    /// Reading an output value failed. The run is terminated.
    #[error("Step {step}: failed to read '{quantity}': {cause}")]
    StepReadFailed {
        /// Step being executed
        step: usize,
        /// Quantity being read
        quantity: QuantityId,
        /// Driver-reported cause
        cause: String,
    },

    /// A completed step could not be recorded. The run is terminated.
    #[error("Step {step}: failed to record results: {cause}")]
    RecordFailed {
        /// Step whose record was lost
        step: usize,
        /// Recorder-reported cause
        cause: String,
    },

    /// Operation not allowed in the current engine state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Semantic configuration problem.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Error reported by a driver.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl SweepError {
    /// Instrument identity the error refers to, when there is one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            SweepError::AlreadyConnected { identity }
            | SweepError::NotConnected { identity }
            | SweepError::ResourceNotFound { identity, .. }
            | SweepError::DriverLoadError { identity, .. }
            | SweepError::ConnectionFailed { identity, .. }
            | SweepError::DisconnectFailed { identity, .. }
            | SweepError::UnknownInstrument { identity } => Some(identity.as_str()),
            SweepError::LevelLengthMismatch { quantity, .. }
            | SweepError::InvalidRange { quantity, .. }
            | SweepError::DuplicateQuantity { quantity }
            | SweepError::StepWriteFailed { quantity, .. }
            | SweepError::StepReadFailed { quantity, .. } => Some(quantity.instrument.as_str()),
            SweepError::RecordFailed { .. }
            | SweepError::InvalidState(_)
            | SweepError::Configuration(_)
            | SweepError::Driver(_) => None,
        }
    }

    /// Innermost error, unwrapping `ConnectionFailed` layers.
    pub fn root_cause(&self) -> &SweepError {
        match self {
            SweepError::ConnectionFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
