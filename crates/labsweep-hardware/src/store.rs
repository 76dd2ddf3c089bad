//! Instrument descriptor storage.
//!
//! The persistence collaborator is only ever used as a keyed store: add, remove,
//! look up and list descriptors by instrument identity.

use async_trait::async_trait;
use dashmap::DashMap;
use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::error::{SweepError, SweepResult};

/// Keyed store of instrument descriptors.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Add a descriptor. Fails if the identity is already stored.
    async fn add(&self, descriptor: InstrumentDescriptor) -> SweepResult<()>;

    /// Remove and return a descriptor, `None` if it was not stored.
    async fn remove(&self, identity: &str) -> SweepResult<Option<InstrumentDescriptor>>;

    /// Look up a descriptor.
    async fn get(&self, identity: &str) -> SweepResult<Option<InstrumentDescriptor>>;

    /// Every stored descriptor, sorted by identity.
    async fn list(&self) -> SweepResult<Vec<InstrumentDescriptor>>;
}

/// In-memory descriptor store.
#[derive(Debug, Default)]
pub struct MemoryDescriptorStore {
    descriptors: DashMap<String, InstrumentDescriptor>,
}

impl MemoryDescriptorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `descriptors`. Fails on duplicate identities.
    pub fn with_descriptors<I>(descriptors: I) -> SweepResult<Self>
    where
        I: IntoIterator<Item = InstrumentDescriptor>,
    {
        let store = Self::new();
        for descriptor in descriptors {
            store.insert_new(descriptor)?;
        }
        Ok(store)
    }

    fn insert_new(&self, descriptor: InstrumentDescriptor) -> SweepResult<()> {
        if descriptor.identity.trim().is_empty() {
            return Err(SweepError::Configuration(
                "Instrument identity must not be empty".to_string(),
            ));
        }
        match self.descriptors.entry(descriptor.identity.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SweepError::Configuration(format!(
                "Instrument '{}' is already registered",
                descriptor.identity
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(descriptor);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DescriptorStore for MemoryDescriptorStore {
    async fn add(&self, descriptor: InstrumentDescriptor) -> SweepResult<()> {
        self.insert_new(descriptor)
    }

    async fn remove(&self, identity: &str) -> SweepResult<Option<InstrumentDescriptor>> {
        Ok(self.descriptors.remove(identity).map(|(_, d)| d))
    }

    async fn get(&self, identity: &str) -> SweepResult<Option<InstrumentDescriptor>> {
        Ok(self.descriptors.get(identity).map(|d| d.value().clone()))
    }

    async fn list(&self) -> SweepResult<Vec<InstrumentDescriptor>> {
        let mut all: Vec<_> = self.descriptors.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(all)
    }
}
