//! Driver catalogue.
//!
//! Maps a descriptor to the factory that builds its driver. Every catalogue has
//! one generic factory used for descriptors without a custom driver reference;
//! custom factories are registered by driver type at startup.

use dashmap::DashMap;
use labsweep_core::descriptor::{DriverSource, InstrumentDescriptor};
use labsweep_core::driver::DriverFactory;
use labsweep_core::error::{SweepError, SweepResult};
use std::sync::Arc;

/// Registered driver factories.
pub struct DriverCatalog {
    generic: Arc<dyn DriverFactory>,
    custom: DashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverCatalog {
    /// Create a catalogue whose built-in driver is `generic`.
    pub fn new(generic: Arc<dyn DriverFactory>) -> Self {
        Self {
            generic,
            custom: DashMap::new(),
        }
    }

    /// Register a custom driver factory under its driver type.
    ///
    /// Returns the factory previously registered under the same type, if any.
    pub fn register(&self, factory: Arc<dyn DriverFactory>) -> Option<Arc<dyn DriverFactory>> {
        let driver_type = factory.driver_type().to_string();
        tracing::info!(
            driver_type = %driver_type,
            name = %factory.name(),
            "Registering driver factory"
        );
        self.custom.insert(driver_type, factory)
    }

    /// Remove a custom driver factory.
    pub fn unregister(&self, driver_type: &str) -> Option<Arc<dyn DriverFactory>> {
        self.custom.remove(driver_type).map(|(_, factory)| factory)
    }

    /// Whether a custom factory is registered for `driver_type`.
    pub fn has_factory(&self, driver_type: &str) -> bool {
        self.custom.contains_key(driver_type)
    }

    /// Registered custom driver types, sorted.
    pub fn list_factories(&self) -> Vec<String> {
        let mut types: Vec<String> = self.custom.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Driver type of the built-in factory.
    pub fn generic_driver_type(&self) -> &'static str {
        self.generic.driver_type()
    }

    /// Pick the factory for `descriptor`.
    ///
    /// Fails with `DriverLoadError` when the descriptor names a custom driver that
    /// is not registered, or when a non-VISA descriptor names none at all.
    pub fn resolve(
        &self,
        descriptor: &InstrumentDescriptor,
    ) -> SweepResult<Arc<dyn DriverFactory>> {
        match descriptor.driver_source() {
            DriverSource::Custom(reference) => self
                .custom
                .get(&reference)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| SweepError::DriverLoadError {
                    identity: descriptor.identity.clone(),
                    reason: format!(
                        "no driver registered under that name. Available drivers: {:?}",
                        self.list_factories()
                    ),
                    reference,
                }),
            DriverSource::Builtin if !descriptor.visa => Err(SweepError::DriverLoadError {
                identity: descriptor.identity.clone(),
                reference: String::new(),
                reason: "non-VISA instruments require a custom driver".to_string(),
            }),
            DriverSource::Builtin => Ok(self.generic.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labsweep_driver_mock::{Agilent33220aFactory, SimulatedFactory};

    fn catalog() -> DriverCatalog {
        let catalog = DriverCatalog::new(Arc::new(SimulatedFactory::new()));
        catalog.register(Arc::new(Agilent33220aFactory::new()));
        catalog
    }

    #[test]
    fn test_builtin_for_plain_descriptor() {
        let factory = catalog()
            .resolve(&InstrumentDescriptor::new("dmm", "GPIB", "22"))
            .unwrap();
        assert_eq!(factory.driver_type(), "simulated");
    }

    #[test]
    fn test_custom_reference() {
        let d = InstrumentDescriptor::new("awg", "USB", "MY44").with_custom_driver("agilent33220a");
        assert_eq!(catalog().resolve(&d).unwrap().driver_type(), "agilent33220a");
    }

    #[test]
    fn test_unknown_custom_reference_is_load_error() {
        let d = InstrumentDescriptor::new("awg", "USB", "MY44").with_custom_driver("keysight");
        match catalog().resolve(&d) {
            Err(SweepError::DriverLoadError {
                reference, reason, ..
            }) => {
                assert_eq!(reference, "keysight");
                assert!(reason.contains("agilent33220a"));
            }
            other => panic!("expected DriverLoadError, got {:?}", other.map(|f| f.name())),
        }
    }

    #[test]
    fn test_non_visa_requires_custom_driver() {
        let d = InstrumentDescriptor::new("pico", "USB", "PS5000").non_visa();
        assert!(matches!(
            catalog().resolve(&d),
            Err(SweepError::DriverLoadError { .. })
        ));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let catalog = catalog();
        assert!(catalog
            .register(Arc::new(Agilent33220aFactory::new()))
            .is_some());
        assert_eq!(catalog.list_factories(), vec!["agilent33220a"]);
        assert!(catalog.unregister("agilent33220a").is_some());
        assert!(!catalog.has_factory("agilent33220a"));
    }
}
