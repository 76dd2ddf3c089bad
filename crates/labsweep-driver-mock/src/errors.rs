//! Error injection for simulated instruments.
//!
//! Lets tests make a simulated instrument fail a specific operation, on a specific
//! quantity, or after a number of successful calls.

use labsweep_core::error::{DriverError, DriverErrorKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Driver operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Factory build (connect)
    Build,
    /// `set_value`
    Set,
    /// `get_value`
    Get,
    /// `close` (disconnect)
    Close,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Build => write!(f, "build"),
            Operation::Set => write!(f, "set_value"),
            Operation::Get => write!(f, "get_value"),
            Operation::Close => write!(f, "close"),
        }
    }
}

/// A failure to inject.
#[derive(Debug, Clone)]
pub enum ErrorScenario {
    /// Always fail this operation
    Always {
        /// Operation to fail
        operation: Operation,
    },
    /// Fail this operation only for one quantity name
    OnQuantity {
        /// Operation to fail
        operation: Operation,
        /// Quantity name
        quantity: String,
    },
    /// Let `count` calls succeed, then fail every later call
    FailAfterN {
        /// Operation to fail
        operation: Operation,
        /// Successful calls before failing
        count: u32,
    },
    /// Every operation fails once the first one has
    CommunicationLoss,
}

#[derive(Default, Debug)]
struct ErrorState {
    operation_counts: HashMap<Operation, u32>,
    communication_lost: bool,
}

/// Error injection configuration. Cheap to clone; clones share counters.
#[derive(Clone, Debug, Default)]
pub struct ErrorConfig {
    scenarios: Arc<Vec<ErrorScenario>>,
    state: Arc<Mutex<ErrorState>>,
}

impl ErrorConfig {
    /// No injected errors.
    pub fn none() -> Self {
        Self::default()
    }

    /// A single scenario.
    pub fn scenario(scenario: ErrorScenario) -> Self {
        Self::scenarios(vec![scenario])
    }

    /// Several scenarios, checked in order.
    pub fn scenarios(scenarios: Vec<ErrorScenario>) -> Self {
        Self {
            scenarios: Arc::new(scenarios),
            state: Arc::new(Mutex::new(ErrorState::default())),
        }
    }

    /// Shorthand for [`ErrorScenario::Always`].
    pub fn always(operation: Operation) -> Self {
        Self::scenario(ErrorScenario::Always { operation })
    }

    /// Shorthand for [`ErrorScenario::OnQuantity`].
    pub fn on_quantity(operation: Operation, quantity: impl Into<String>) -> Self {
        Self::scenario(ErrorScenario::OnQuantity {
            operation,
            quantity: quantity.into(),
        })
    }

    /// Decide whether `operation` on `quantity` fails.
    pub fn check_operation(
        &self,
        driver_type: &str,
        operation: Operation,
        quantity: Option<&str>,
    ) -> Result<(), DriverError> {
        let mut state = self.state.lock();

        if state.communication_lost {
            return Err(DriverError::new(
                driver_type,
                DriverErrorKind::Communication,
                "Communication lost",
            ));
        }

        let count = {
            let current = state.operation_counts.entry(operation).or_insert(0);
            *current += 1;
            *current
        };

        for scenario in self.scenarios.iter() {
            match scenario {
                ErrorScenario::Always { operation: op } if *op == operation => {
                    return Err(injected(driver_type, operation, quantity));
                }
                ErrorScenario::OnQuantity {
                    operation: op,
                    quantity: target,
                } if *op == operation && quantity == Some(target.as_str()) => {
                    return Err(injected(driver_type, operation, quantity));
                }
                ErrorScenario::FailAfterN {
                    operation: op,
                    count: limit,
                } if *op == operation && count > *limit => {
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        format!("Injected failure after {} operations", limit),
                    ));
                }
                ErrorScenario::CommunicationLoss => {
                    state.communication_lost = true;
                    return Err(DriverError::new(
                        driver_type,
                        DriverErrorKind::Communication,
                        "Communication lost",
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

fn injected(driver_type: &str, operation: Operation, quantity: Option<&str>) -> DriverError {
    let kind = match operation {
        Operation::Build => DriverErrorKind::Initialization,
        Operation::Close => DriverErrorKind::Shutdown,
        Operation::Set | Operation::Get => DriverErrorKind::Communication,
    };
    let message = match quantity {
        Some(q) => format!("Injected {} failure on '{}'", operation, q),
        None => format!("Injected {} failure", operation),
    };
    DriverError::new(driver_type, kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_fails() {
        let config = ErrorConfig::none();
        for _ in 0..10 {
            assert!(config
                .check_operation("sim", Operation::Set, Some("Voltage"))
                .is_ok());
        }
    }

    #[test]
    fn test_on_quantity_only_hits_that_quantity() {
        let config = ErrorConfig::on_quantity(Operation::Get, "Voltage");
        assert!(config
            .check_operation("sim", Operation::Get, Some("Current"))
            .is_ok());
        assert!(config
            .check_operation("sim", Operation::Set, Some("Voltage"))
            .is_ok());
        let err = config
            .check_operation("sim", Operation::Get, Some("Voltage"))
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Communication);
        assert!(err.message.contains("Voltage"));
    }

    #[test]
    fn test_fail_after_n() {
        let config = ErrorConfig::scenario(ErrorScenario::FailAfterN {
            operation: Operation::Set,
            count: 2,
        });
        assert!(config.check_operation("sim", Operation::Set, None).is_ok());
        assert!(config.check_operation("sim", Operation::Set, None).is_ok());
        assert!(config.check_operation("sim", Operation::Set, None).is_err());
        // Other operations are not counted against the limit
        assert!(config.check_operation("sim", Operation::Get, None).is_ok());
    }

    #[test]
    fn test_communication_loss_is_sticky() {
        let config = ErrorConfig::scenario(ErrorScenario::CommunicationLoss);
        assert!(config.check_operation("sim", Operation::Get, None).is_err());
        assert!(config.check_operation("sim", Operation::Close, None).is_err());
    }
}
