//! Simulated instrument.
//!
//! Holds quantities in memory: a write stores the value, a read returns the last
//! written value, a preset reading, or `0.0`. Every call is appended to a journal
//! so tests can assert the exact order in which an instrument was driven.

use crate::errors::{ErrorConfig, Operation};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use labsweep_core::capabilities::{DriverHandle, QuantityDriver};
use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::driver::{DriverFactory, DriverRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DRIVER_TYPE: &str = "simulated";

/// One driver call as seen by the instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEntry {
    /// Instrument identity
    pub instrument: String,
    /// Operation performed
    pub operation: Operation,
    /// Quantity name (empty for close)
    pub quantity: String,
    /// Written or returned value
    pub value: Value,
}

/// Shared, ordered record of driver calls across any number of instruments.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: JournalEntry) {
        self.entries.lock().push(entry);
    }

    /// Snapshot of every entry so far.
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().clone()
    }

    /// Only the writes, in order.
    pub fn writes(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.operation == Operation::Set)
            .cloned()
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// In-memory instrument implementing [`QuantityDriver`].
#[derive(Debug)]
pub struct SimulatedInstrument {
    identity: String,
    resource: Option<String>,
    values: Mutex<HashMap<String, Value>>,
    readings: HashMap<String, Value>,
    errors: ErrorConfig,
    journal: Journal,
    latency: Option<Duration>,
    closed: AtomicBool,
}

impl SimulatedInstrument {
    /// Create an instrument with no presets and no injected errors.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            resource: None,
            values: Mutex::new(HashMap::new()),
            readings: HashMap::new(),
            errors: ErrorConfig::none(),
            journal: Journal::new(),
            latency: None,
            closed: AtomicBool::new(false),
        }
    }

    /// Value returned for `name` until it is written.
    pub fn with_reading(mut self, name: impl Into<String>, value: Value) -> Self {
        self.readings.insert(name.into(), value);
        self
    }

    /// Inject errors.
    pub fn with_errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = errors;
        self
    }

    /// Record calls into a shared journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Sleep this long inside every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn with_resource(mut self, resource: Option<String>) -> Self {
        self.resource = resource;
        self
    }

    /// Instrument identity.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Resource string the instrument was connected through.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Journal this instrument records into.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Whether `close` has completed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Current stored value of a quantity, without journaling.
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.values.lock().get(name).cloned()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl QuantityDriver for SimulatedInstrument {
    fn driver_type(&self) -> &str {
        DRIVER_TYPE
    }

    async fn set_value(&self, name: &str, value: Value) -> Result<()> {
        self.simulate_latency().await;
        self.errors
            .check_operation(DRIVER_TYPE, Operation::Set, Some(name))?;
        self.values.lock().insert(name.to_string(), value.clone());
        self.journal.push(JournalEntry {
            instrument: self.identity.clone(),
            operation: Operation::Set,
            quantity: name.to_string(),
            value,
        });
        Ok(())
    }

    async fn get_value(&self, name: &str) -> Result<Value> {
        self.simulate_latency().await;
        self.errors
            .check_operation(DRIVER_TYPE, Operation::Get, Some(name))?;
        let value = self
            .values
            .lock()
            .get(name)
            .or_else(|| self.readings.get(name))
            .cloned()
            .unwrap_or_else(|| Value::from(0.0));
        self.journal.push(JournalEntry {
            instrument: self.identity.clone(),
            operation: Operation::Get,
            quantity: name.to_string(),
            value: value.clone(),
        });
        Ok(value)
    }

    async fn close(&self) -> Result<()> {
        self.errors
            .check_operation(DRIVER_TYPE, Operation::Close, None)?;
        self.closed.store(true, Ordering::SeqCst);
        self.journal.push(JournalEntry {
            instrument: self.identity.clone(),
            operation: Operation::Close,
            quantity: String::new(),
            value: Value::Null,
        });
        tracing::debug!(instrument = %self.identity, "Simulated instrument closed");
        Ok(())
    }
}

/// Factory that builds [`SimulatedInstrument`]s.
///
/// Serves as the generic driver of the catalogue in dry runs and tests. Errors
/// and presets can be configured per identity before connecting, and every
/// built instrument stays reachable through [`SimulatedFactory::instrument`].
#[derive(Debug, Default)]
pub struct SimulatedFactory {
    errors: DashMap<String, ErrorConfig>,
    readings: DashMap<String, HashMap<String, Value>>,
    built: DashMap<String, Arc<SimulatedInstrument>>,
    journal: Journal,
}

impl SimulatedFactory {
    /// Create a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// All built instruments record into `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }

    /// Inject errors into the instrument built for `identity`.
    ///
    /// `Operation::Build` scenarios make the connect itself fail.
    pub fn set_errors(&self, identity: impl Into<String>, errors: ErrorConfig) {
        self.errors.insert(identity.into(), errors);
    }

    /// Preset a reading on the instrument built for `identity`.
    pub fn set_reading(&self, identity: impl Into<String>, name: impl Into<String>, value: Value) {
        self.readings
            .entry(identity.into())
            .or_default()
            .insert(name.into(), value);
    }

    /// Most recently built instrument for `identity`.
    pub fn instrument(&self, identity: &str) -> Option<Arc<SimulatedInstrument>> {
        self.built.get(identity).map(|entry| entry.value().clone())
    }

    /// Shared journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub(crate) fn build_instrument(
        &self,
        request: &DriverRequest,
    ) -> Result<Arc<SimulatedInstrument>> {
        let errors = self
            .errors
            .get(&request.identity)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        errors.check_operation(DRIVER_TYPE, Operation::Build, None)?;

        let mut instrument = SimulatedInstrument::new(request.identity.clone())
            .with_errors(errors)
            .with_journal(self.journal.clone())
            .with_resource(request.resource.clone());
        if let Some(presets) = self.readings.get(&request.identity) {
            for (name, value) in presets.value() {
                instrument = instrument.with_reading(name.clone(), value.clone());
            }
        }

        let instrument = Arc::new(instrument);
        self.built
            .insert(request.identity.clone(), instrument.clone());
        Ok(instrument)
    }
}

impl DriverFactory for SimulatedFactory {
    fn driver_type(&self) -> &'static str {
        DRIVER_TYPE
    }

    fn name(&self) -> &'static str {
        "Simulated Instrument"
    }

    fn validate(&self, descriptor: &InstrumentDescriptor) -> Result<()> {
        if descriptor.address.trim().is_empty() {
            anyhow::bail!("instrument '{}' has an empty address", descriptor.identity);
        }
        Ok(())
    }

    fn build(&self, request: DriverRequest) -> BoxFuture<'static, Result<DriverHandle>> {
        let built = self.build_instrument(&request);
        Box::pin(async move {
            let instrument = built?;
            tracing::info!(
                instrument = %request.identity,
                resource = ?request.resource,
                "Simulated instrument connected"
            );
            Ok(instrument as DriverHandle)
        })
    }
}
