//! Instrument service: descriptor records plus their live connections.
//!
//! Connecting by identity looks the descriptor up in the store. Removing a
//! record disconnects the instrument first, so the registry never holds a
//! connection for an instrument that no longer exists.

use crate::registry::ConnectionRegistry;
use crate::store::DescriptorStore;
use labsweep_core::capabilities::DriverHandle;
use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::error::{SweepError, SweepResult};
use labsweep_core::identity::InstrumentId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Connection status of one known instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentStatus {
    /// Instrument identity
    pub identity: InstrumentId,
    /// Interface tag
    pub interface: String,
    /// Address token
    pub address: String,
    /// Whether a live connection exists
    pub connected: bool,
}

/// Front door for instrument management.
pub struct InstrumentService {
    store: Arc<dyn DescriptorStore>,
    registry: Arc<ConnectionRegistry>,
}

impl InstrumentService {
    /// Create a service over `store` and `registry`.
    pub fn new(store: Arc<dyn DescriptorStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Shared connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Store a new instrument descriptor.
    pub async fn add_instrument(&self, descriptor: InstrumentDescriptor) -> SweepResult<()> {
        let identity = descriptor.identity.clone();
        self.store.add(descriptor).await?;
        info!(identity = %identity, "Instrument added");
        Ok(())
    }

    /// Remove an instrument record, disconnecting it first if connected.
    ///
    /// If the disconnect fails the record is kept and the error returned.
    pub async fn remove_instrument(&self, identity: &str) -> SweepResult<InstrumentDescriptor> {
        if self.store.get(identity).await?.is_none() {
            return Err(SweepError::UnknownInstrument {
                identity: identity.to_string(),
            });
        }

        self.registry.disconnect(identity).await?;

        let removed = self
            .store
            .remove(identity)
            .await?
            .ok_or_else(|| SweepError::UnknownInstrument {
                identity: identity.to_string(),
            })?;
        info!(identity = %identity, "Instrument removed");
        Ok(removed)
    }

    /// All stored descriptors.
    pub async fn list_instruments(&self) -> SweepResult<Vec<InstrumentDescriptor>> {
        self.store.list().await
    }

    /// Connect a stored instrument by identity.
    pub async fn connect_known(&self, identity: &str) -> SweepResult<DriverHandle> {
        let descriptor =
            self.store
                .get(identity)
                .await?
                .ok_or_else(|| SweepError::UnknownInstrument {
                    identity: identity.to_string(),
                })?;
        self.registry.connect(identity, &descriptor).await
    }

    /// Connect the given stored instruments. Returns the identities that failed.
    pub async fn connect_many(
        &self,
        identities: &[InstrumentId],
    ) -> SweepResult<Vec<InstrumentId>> {
        let descriptors: HashMap<_, _> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|d| (d.identity.clone(), d))
            .collect();
        Ok(self.registry.connect_all(identities, &descriptors).await)
    }

    /// Connect every stored instrument that is not yet connected.
    ///
    /// Returns the identities that failed.
    pub async fn connect_all_known(&self) -> SweepResult<Vec<InstrumentId>> {
        let descriptors: HashMap<_, _> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|d| !self.registry.is_connected(&d.identity))
            .map(|d| (d.identity.clone(), d))
            .collect();
        let mut identities: Vec<_> = descriptors.keys().cloned().collect();
        identities.sort();
        Ok(self.registry.connect_all(&identities, &descriptors).await)
    }

    /// Disconnect one instrument.
    pub async fn disconnect(&self, identity: &str) -> SweepResult<()> {
        self.registry.disconnect(identity).await
    }

    /// Disconnect everything. Returns the identities that failed.
    pub async fn disconnect_all(&self) -> Vec<InstrumentId> {
        self.registry.disconnect_all().await
    }

    /// Connection status of every stored instrument.
    pub async fn status(&self) -> SweepResult<Vec<InstrumentStatus>> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|d| InstrumentStatus {
                connected: self.registry.is_connected(&d.identity),
                interface: d.interface.to_string(),
                address: d.address,
                identity: d.identity,
            })
            .collect())
    }
}
