//! Instrument connection registry.
//!
//! The registry is the single source of truth for "is instrument X connected, and
//! to which driver". It holds at most one [`ConnectionEntry`] per instrument
//! identity and is meant to be created once at the composition root and shared
//! by `Arc` with every consumer.
//!
//! # Exclusivity
//!
//! `connect`, `disconnect` and `get_handle` on the same identity are serialised
//! through a per-identity async mutex, so a connect that is still resolving
//! resources can never race a second connect or a disconnect of the same
//! instrument. Operations on different identities never wait for each other,
//! which lets the bulk operations run all instruments concurrently. A lock is
//! dropped again once its identity has no entry and no other caller holds it.
//!
//! # Bulk operations
//!
//! `connect_all` and `disconnect_all` never stop at the first failure. They
//! return the identities that failed (in no particular order) and an empty list
//! means everything succeeded.

use crate::catalog::DriverCatalog;
use crate::resources::{needs_resource_list, resolve_resource, ResourceLister};
use dashmap::DashMap;
use futures::future::join_all;
use labsweep_core::capabilities::DriverHandle;
use labsweep_core::descriptor::{ConnectionKind, InstrumentDescriptor};
use labsweep_core::driver::DriverRequest;
use labsweep_core::error::{DriverError, DriverErrorKind, SweepError, SweepResult};
use labsweep_core::identity::{InstrumentId, QuantityId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// A live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Instrument identity
    pub identity: InstrumentId,
    /// Driver handle
    pub handle: DriverHandle,
    /// How the instrument is reached
    pub kind: ConnectionKind,
    /// Matched resource string (VISA-like connections only)
    pub resource: Option<String>,
    /// Driver type that was built
    pub driver_type: String,
}

/// Owns the live driver handle of every connected instrument.
pub struct ConnectionRegistry {
    entries: DashMap<InstrumentId, Arc<ConnectionEntry>>,
    locks: DashMap<InstrumentId, Arc<Mutex<()>>>,
    catalog: Arc<DriverCatalog>,
    resources: Arc<dyn ResourceLister>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new(catalog: Arc<DriverCatalog>, resources: Arc<dyn ResourceLister>) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            catalog,
            resources,
        }
    }

    /// Driver catalogue used to build connections.
    pub fn catalog(&self) -> &Arc<DriverCatalog> {
        &self.catalog
    }

    fn identity_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Forget the lock of an identity with no entry once no caller holds it.
    fn release_lock(&self, identity: &str) {
        if !self.entries.contains_key(identity) {
            self.locks
                .remove_if(identity, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    /// Connect `identity` using `descriptor`.
    ///
    /// Fails with `AlreadyConnected` if an entry exists. Any failure while
    /// resolving the resource, loading the driver or constructing it is reported
    /// as `ConnectionFailed` wrapping the cause, and leaves no entry behind.
    #[instrument(
        skip(self, descriptor),
        fields(interface = %descriptor.interface, address = %descriptor.address)
    )]
    pub async fn connect(
        &self,
        identity: &str,
        descriptor: &InstrumentDescriptor,
    ) -> SweepResult<DriverHandle> {
        let lock = self.identity_lock(identity);
        let result = {
            let _guard = lock.lock().await;
            self.connect_locked(identity, descriptor).await
        };
        drop(lock);
        self.release_lock(identity);
        result
    }

    async fn connect_locked(
        &self,
        identity: &str,
        descriptor: &InstrumentDescriptor,
    ) -> SweepResult<DriverHandle> {
        if self.entries.contains_key(identity) {
            return Err(SweepError::AlreadyConnected {
                identity: identity.to_string(),
            });
        }

        let entry = self
            .establish(identity, descriptor)
            .await
            .map_err(|cause| {
                warn!(identity = %identity, error = %cause, "Connection failed");
                SweepError::ConnectionFailed {
                    identity: identity.to_string(),
                    cause: Box::new(cause),
                }
            })?;

        info!(
            identity = %identity,
            kind = %entry.kind,
            resource = ?entry.resource,
            driver_type = %entry.driver_type,
            "Connection established"
        );
        let handle = entry.handle.clone();
        self.entries.insert(identity.to_string(), Arc::new(entry));
        Ok(handle)
    }

    async fn establish(
        &self,
        identity: &str,
        descriptor: &InstrumentDescriptor,
    ) -> SweepResult<ConnectionEntry> {
        let kind = descriptor.connection_kind();

        let resource = match kind {
            ConnectionKind::Visa => {
                let live = if needs_resource_list(descriptor) {
                    self.resources.list_resources().await.map_err(|e| {
                        DriverError::new(
                            "resource-manager",
                            DriverErrorKind::Communication,
                            format!("failed to list resources: {:#}", e),
                        )
                    })?
                } else {
                    Vec::new()
                };
                let resource = resolve_resource(descriptor, &live)?;
                debug!(identity = %identity, resource = %resource, "Resolved connection string");
                Some(resource)
            }
            ConnectionKind::Generic => None,
        };

        let factory = self.catalog.resolve(descriptor)?;
        let driver_type = factory.driver_type();

        factory.validate(descriptor).map_err(|e| {
            DriverError::new(
                driver_type,
                DriverErrorKind::Configuration,
                format!("descriptor rejected for '{}': {:#}", identity, e),
            )
        })?;

        let handle = factory
            .build(DriverRequest {
                identity: identity.to_string(),
                resource: resource.clone(),
                descriptor: descriptor.clone(),
            })
            .await
            .map_err(|e| {
                DriverError::new(
                    driver_type,
                    DriverErrorKind::Initialization,
                    format!("driver construction failed for '{}': {:#}", identity, e),
                )
            })?;

        Ok(ConnectionEntry {
            identity: identity.to_string(),
            handle,
            kind,
            resource,
            driver_type: driver_type.to_string(),
        })
    }

    /// Disconnect `identity`. A no-op when it is not connected.
    ///
    /// If the driver fails to close, the entry is kept and `DisconnectFailed` is
    /// returned so the caller can retry.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, identity: &str) -> SweepResult<()> {
        let lock = self.identity_lock(identity);
        let result = {
            let _guard = lock.lock().await;
            self.disconnect_locked(identity).await
        };
        drop(lock);
        self.release_lock(identity);
        result
    }

    async fn disconnect_locked(&self, identity: &str) -> SweepResult<()> {
        let Some(entry) = self.entries.get(identity).map(|e| e.value().clone()) else {
            debug!(identity = %identity, "Not connected, nothing to disconnect");
            return Ok(());
        };

        entry
            .handle
            .close()
            .await
            .map_err(|e| SweepError::DisconnectFailed {
                identity: identity.to_string(),
                reason: format!("{:#}", e),
            })?;

        self.entries.remove(identity);
        info!(identity = %identity, "Disconnected");
        Ok(())
    }

    /// Disconnect every connected instrument.
    ///
    /// Returns the identities that failed; they remain connected.
    pub async fn disconnect_all(&self) -> Vec<InstrumentId> {
        let identities = self.connected();
        let results = join_all(identities.into_iter().map(|identity| async move {
            let result = self.disconnect(&identity).await;
            (identity, result)
        }))
        .await;

        let failures = collect_failures(results);
        if failures.is_empty() {
            info!("All instruments disconnected");
        } else {
            warn!(failed = ?failures, "Failed to disconnect from the following instruments");
        }
        failures
    }

    /// Connect every identity in `identities` using its entry in `descriptors`.
    ///
    /// An identity without a descriptor, one that is already connected, and one
    /// whose connect fails all count as failures.
    pub async fn connect_all(
        &self,
        identities: &[InstrumentId],
        descriptors: &HashMap<InstrumentId, InstrumentDescriptor>,
    ) -> Vec<InstrumentId> {
        let results = join_all(identities.iter().map(|identity| async move {
            let result = match descriptors.get(identity) {
                Some(descriptor) => self.connect(identity, descriptor).await.map(|_| ()),
                None => Err(SweepError::UnknownInstrument {
                    identity: identity.clone(),
                }),
            };
            (identity.clone(), result)
        }))
        .await;

        let failures = collect_failures(results);
        if !failures.is_empty() {
            warn!(failed = ?failures, "Could not connect to the following instruments");
        }
        failures
    }

    /// Whether `identity` has a live connection.
    pub fn is_connected(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Driver handle of a connected instrument.
    pub async fn get_handle(&self, identity: &str) -> SweepResult<DriverHandle> {
        let lock = self.identity_lock(identity);
        let handle = {
            let _guard = lock.lock().await;
            self.entries.get(identity).map(|entry| entry.handle.clone())
        };
        drop(lock);
        self.release_lock(identity);
        handle.ok_or_else(|| SweepError::NotConnected {
            identity: identity.to_string(),
        })
    }

    /// Connection details of `identity`.
    pub fn entry(&self, identity: &str) -> Option<Arc<ConnectionEntry>> {
        self.entries.get(identity).map(|e| e.value().clone())
    }

    /// Identities with a live connection, sorted.
    pub fn connected(&self) -> Vec<InstrumentId> {
        let mut identities: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        identities.sort();
        identities
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is connected.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Driver handle for each quantity, for handing to the execution engine.
    ///
    /// Fails with `NotConnected` on the first quantity whose instrument is not connected.
    pub async fn drivers_for<'a, I>(
        &self,
        quantities: I,
    ) -> SweepResult<HashMap<QuantityId, DriverHandle>>
    where
        I: IntoIterator<Item = &'a QuantityId>,
    {
        let mut drivers = HashMap::new();
        for quantity in quantities {
            if drivers.contains_key(quantity) {
                continue;
            }
            let handle = self.get_handle(&quantity.instrument).await?;
            drivers.insert(quantity.clone(), handle);
        }
        Ok(drivers)
    }
}

fn collect_failures(results: Vec<(InstrumentId, SweepResult<()>)>) -> Vec<InstrumentId> {
    results
        .into_iter()
        .filter_map(|(identity, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Bulk operation failed for instrument");
                Some(identity)
            }
        })
        .collect()
}
