use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::error::{DriverErrorKind, SweepError};
use labsweep_driver_mock::{Agilent33220aFactory, ErrorConfig, Operation, SimulatedFactory};
use labsweep_hardware::{
    ConnectionRegistry, DriverCatalog, InstrumentService, MemoryDescriptorStore, ResourceLister,
    StaticResources,
};
use serde_json::json;

struct CountingResources {
    calls: AtomicUsize,
    inner: StaticResources,
}

#[async_trait]
impl ResourceLister for CountingResources {
    async fn list_resources(&self) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_resources().await
    }
}

struct BrokenResources;

#[async_trait]
impl ResourceLister for BrokenResources {
    async fn list_resources(&self) -> Result<Vec<String>> {
        anyhow::bail!("resource manager not running")
    }
}

fn live() -> StaticResources {
    StaticResources::new([
        "GPIB0::1::INSTR",
        "GPIB0::2::INSTR",
        "GPIB0::3::INSTR",
        "GPIB0::4::INSTR",
        "USB0::0x0957::0x0407::MY44::INSTR",
    ])
}

fn gpib(identity: &str, address: &str) -> InstrumentDescriptor {
    InstrumentDescriptor::new(identity, "GPIB", address)
}

fn registry(factory: Arc<SimulatedFactory>) -> ConnectionRegistry {
    ConnectionRegistry::new(Arc::new(DriverCatalog::new(factory)), Arc::new(live()))
}

#[tokio::test]
async fn disconnect_all_reports_only_failures_and_keeps_them_connected() {
    let factory = Arc::new(SimulatedFactory::new());
    factory.set_errors("b", ErrorConfig::always(Operation::Close));
    factory.set_errors("d", ErrorConfig::always(Operation::Close));
    let registry = registry(factory.clone());

    for (id, addr) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")] {
        registry.connect(id, &gpib(id, addr)).await.unwrap();
    }
    assert_eq!(registry.len(), 4);

    let mut failed = registry.disconnect_all().await;
    failed.sort();
    assert_eq!(failed, vec!["b", "d"]);
    assert_eq!(registry.connected(), vec!["b", "d"]);

    assert!(factory.instrument("a").unwrap().is_closed());
    assert!(factory.instrument("c").unwrap().is_closed());
    assert!(!factory.instrument("b").unwrap().is_closed());
}

#[tokio::test]
async fn connect_all_continues_past_failures() {
    let factory = Arc::new(SimulatedFactory::new());
    factory.set_errors("c", ErrorConfig::always(Operation::Build));
    let registry = registry(factory);

    let descriptors: HashMap<String, InstrumentDescriptor> = [
        gpib("a", "1"),
        gpib("b", "9"), // no such resource
        gpib("c", "3"),
        gpib("d", "4"),
    ]
    .into_iter()
    .map(|d| (d.identity.clone(), d))
    .collect();
    let identities: Vec<String> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut failed = registry.connect_all(&identities, &descriptors).await;
    failed.sort();
    assert_eq!(failed, vec!["b", "c", "e"]);
    assert_eq!(registry.connected(), vec!["a", "d"]);

    // A second pass counts the already connected ones as failures too.
    let failed = registry
        .connect_all(&["a".to_string()], &descriptors)
        .await;
    assert_eq!(failed, vec!["a"]);
}

#[tokio::test]
async fn concurrent_connects_on_one_identity_yield_one_entry() {
    let registry = Arc::new(registry(Arc::new(SimulatedFactory::new())));
    let descriptor = gpib("dmm", "2");

    let attempts = (0..8).map(|_| {
        let registry = registry.clone();
        let descriptor = descriptor.clone();
        tokio::spawn(async move { registry.connect("dmm", &descriptor).await.is_ok() })
    });
    let results = futures::future::join_all(attempts).await;
    let successes = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

    assert_eq!(successes, 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn resource_not_found_is_wrapped_and_lists_resources() {
    let registry = registry(Arc::new(SimulatedFactory::new()));
    let err = registry
        .connect("dmm", &gpib("dmm", "17"))
        .await
        .err()
        .unwrap();

    match err.root_cause() {
        SweepError::ResourceNotFound { available, .. } => {
            assert_eq!(available.len(), 5);
            assert!(available.contains(&"GPIB0::1::INSTR".to_string()));
        }
        other => panic!("unexpected cause: {other}"),
    }
    assert!(!registry.is_connected("dmm"));
}

#[tokio::test]
async fn resource_listing_failure_is_connection_failure() {
    let registry = ConnectionRegistry::new(
        Arc::new(DriverCatalog::new(Arc::new(SimulatedFactory::new()))),
        Arc::new(BrokenResources),
    );
    let err = registry.connect("dmm", &gpib("dmm", "1")).await.err().unwrap();
    assert!(matches!(err, SweepError::ConnectionFailed { .. }));
    assert!(err.to_string().contains("resource manager not running"));
}

#[tokio::test]
async fn tcpip_and_non_visa_skip_resource_listing() {
    let backend = Arc::new(SimulatedFactory::new());
    let catalog = Arc::new(DriverCatalog::new(backend.clone()));
    catalog.register(Arc::new(Agilent33220aFactory::with_backend(backend.clone())));
    let resources = Arc::new(CountingResources {
        calls: AtomicUsize::new(0),
        inner: live(),
    });
    let registry = ConnectionRegistry::new(catalog.clone(), resources.clone());

    registry
        .connect("scope", &InstrumentDescriptor::new("scope", "TCPIP", "10.0.0.7"))
        .await
        .unwrap();
    assert_eq!(
        registry.entry("scope").unwrap().resource.as_deref(),
        Some("TCPIP0::10.0.0.7::INSTR")
    );

    // Non-VISA instruments need a custom driver; the generic one is refused.
    let err = registry
        .connect("pico", &InstrumentDescriptor::new("pico", "USB", "PS5000").non_visa())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.root_cause(),
        SweepError::DriverLoadError { .. }
    ));
    assert_eq!(resources.calls.load(Ordering::SeqCst), 0);

    // The custom driver is built in place of the generic one.
    let awg = registry
        .connect(
            "awg",
            &InstrumentDescriptor::new("awg", "USB", "MY44").with_custom_driver("agilent33220a"),
        )
        .await
        .unwrap();
    assert_eq!(awg.driver_type(), "agilent33220a");
    awg.set_value("Arb. Waveform", json!([1.0, 2.0])).await.unwrap();
    assert!(backend.instrument("awg").unwrap().peek("Arb. Waveform").is_none());
    assert_eq!(resources.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_descriptor_is_never_built() {
    let backend = Arc::new(SimulatedFactory::new());
    let catalog = Arc::new(DriverCatalog::new(backend.clone()));
    catalog.register(Arc::new(Agilent33220aFactory::with_backend(backend.clone())));
    let registry = ConnectionRegistry::new(catalog, Arc::new(live()));

    let descriptor = InstrumentDescriptor::new("awg", "USB", "MY44")
        .with_custom_driver("agilent33220a")
        .non_visa();
    let err = registry.connect("awg", &descriptor).await.err().unwrap();

    match err.root_cause() {
        SweepError::Driver(driver) => {
            assert_eq!(driver.kind, DriverErrorKind::Configuration);
            assert!(driver.message.contains("VISA"));
        }
        other => panic!("unexpected cause: {other}"),
    }
    assert!(backend.instrument("awg").is_none());
    assert!(!registry.is_connected("awg"));
}

#[tokio::test]
async fn removing_a_record_disconnects_the_instrument() {
    let factory = Arc::new(SimulatedFactory::new());
    let registry = Arc::new(registry(factory.clone()));
    let store = Arc::new(MemoryDescriptorStore::new());
    let service = InstrumentService::new(store, registry.clone());

    service.add_instrument(gpib("dmm", "1")).await.unwrap();
    service.add_instrument(gpib("psu", "2")).await.unwrap();
    service.connect_known("dmm").await.unwrap();

    let removed = service.remove_instrument("dmm").await.unwrap();
    assert_eq!(removed.identity, "dmm");
    assert!(!registry.is_connected("dmm"));
    assert!(factory.instrument("dmm").unwrap().is_closed());

    // Never-connected instruments are removed without touching the registry.
    service.remove_instrument("psu").await.unwrap();
    assert!(service.list_instruments().await.unwrap().is_empty());

    assert!(matches!(
        service.remove_instrument("psu").await,
        Err(SweepError::UnknownInstrument { .. })
    ));
}

#[tokio::test]
async fn failed_cascade_keeps_record_and_connection() {
    let factory = Arc::new(SimulatedFactory::new());
    factory.set_errors("dmm", ErrorConfig::always(Operation::Close));
    let registry = Arc::new(registry(factory));
    let service = InstrumentService::new(Arc::new(MemoryDescriptorStore::new()), registry.clone());

    service.add_instrument(gpib("dmm", "1")).await.unwrap();
    service.connect_known("dmm").await.unwrap();

    assert!(matches!(
        service.remove_instrument("dmm").await,
        Err(SweepError::DisconnectFailed { .. })
    ));
    assert!(registry.is_connected("dmm"));
    assert_eq!(service.list_instruments().await.unwrap().len(), 1);
}

#[tokio::test]
async fn connect_all_known_and_status() {
    let registry = Arc::new(registry(Arc::new(SimulatedFactory::new())));
    let store = Arc::new(
        MemoryDescriptorStore::with_descriptors([gpib("a", "1"), gpib("b", "2"), gpib("x", "99")])
            .unwrap(),
    );
    let service = InstrumentService::new(store, registry);

    let failed = service.connect_all_known().await.unwrap();
    assert_eq!(failed, vec!["x"]);

    let status = service.status().await.unwrap();
    let connected: Vec<_> = status
        .iter()
        .filter(|s| s.connected)
        .map(|s| s.identity.as_str())
        .collect();
    assert_eq!(connected, vec!["a", "b"]);

    // Already connected instruments are skipped rather than reported.
    assert_eq!(service.connect_all_known().await.unwrap(), vec!["x"]);
    assert!(service.disconnect_all().await.is_empty());
}
