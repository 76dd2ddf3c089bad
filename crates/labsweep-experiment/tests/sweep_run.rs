//! End to end: definition file -> plan -> registry drivers -> engine.

use std::sync::Arc;
use std::time::Duration;

use labsweep_core::descriptor::InstrumentDescriptor;
use labsweep_core::identity::QuantityId;
use labsweep_driver_mock::{Agilent33220aFactory, Journal, SimulatedFactory};
use labsweep_experiment::{CancelToken, RunOutcome, StepRecord, SweepDefinition, SweepEngine};
use labsweep_hardware::{ConnectionRegistry, DriverCatalog, StaticResources};
use serde_json::json;

const SWEEP: &str = r#"
outputs = [{ instrument = "dmm", quantity = "Voltage" }]

[[ranges]]
level = 1
instrument = "psu"
quantity = "Output"
start = 0.0
stop = 1.0
points = 2
kind = "discrete"

[[ranges]]
level = 2
instrument = "awg"
quantity = "Frequency"
start = 1000.0
stop = 3000.0
points = 3

[[ranges]]
level = 2
instrument = "awg"
quantity = "Arb. Waveform"
start = 0.0
stop = 2.0
points = 3
"#;

async fn connected_registry(backend: Arc<SimulatedFactory>) -> ConnectionRegistry {
    let catalog = Arc::new(DriverCatalog::new(backend.clone()));
    catalog.register(Arc::new(Agilent33220aFactory::with_backend(backend.clone())));
    let registry = ConnectionRegistry::new(
        catalog,
        Arc::new(StaticResources::new([
            "GPIB0::5::INSTR",
            "GPIB0::22::INSTR",
            "USB0::0x0957::0x0407::MY44::INSTR",
        ])),
    );

    registry
        .connect("psu", &InstrumentDescriptor::new("psu", "GPIB", "5"))
        .await
        .unwrap();
    registry
        .connect("dmm", &InstrumentDescriptor::new("dmm", "GPIB", "22"))
        .await
        .unwrap();
    registry
        .connect(
            "awg",
            &InstrumentDescriptor::new("awg", "USB", "MY44").with_custom_driver("agilent33220a"),
        )
        .await
        .unwrap();
    registry
}

#[tokio::test]
async fn sweep_runs_through_registry_drivers() {
    let journal = Journal::new();
    let backend = Arc::new(SimulatedFactory::new().with_journal(journal.clone()));
    backend.set_reading("dmm", "Voltage", json!(0.25));
    let registry = connected_registry(backend.clone()).await;

    let definition = SweepDefinition::from_toml_str(SWEEP).unwrap();
    let plan = definition.compile().unwrap();
    assert_eq!(plan.total_steps(), 6);

    let drivers = registry
        .drivers_for(plan.inputs().chain(plan.outputs()))
        .await
        .unwrap();

    let mut records: Vec<StepRecord> = Vec::new();
    let mut observer = |r: &StepRecord| records.push(r.clone());
    let outcome = SweepEngine::new()
        .run(&plan, &drivers, Duration::ZERO, &mut observer, &CancelToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, RunOutcome::Completed { total_steps: 6 }));
    assert_eq!(records.len(), 6);
    assert_eq!(records[5].get("Input - psu - Output"), Some(&json!(1.0)));
    assert_eq!(records[5].get("Input - awg - Frequency"), Some(&json!(3000.0)));
    assert_eq!(records[5].get("Output - dmm - Voltage"), Some(&json!(0.25)));

    // The function generator drops waveform writes but keeps the frequency.
    let awg = backend.instrument("awg").unwrap();
    assert_eq!(awg.peek("Frequency"), Some(json!(3000.0)));
    assert!(awg.peek("Arb. Waveform").is_none());

    let psu_writes: Vec<_> = journal
        .writes()
        .into_iter()
        .filter(|e| e.instrument == "psu")
        .map(|e| e.value)
        .collect();
    let expected: Vec<_> = vec![json!(0.0); 3]
        .into_iter()
        .chain(vec![json!(1.0); 3])
        .collect();
    assert_eq!(psu_writes, expected);
}

#[tokio::test]
async fn engine_refuses_plan_with_disconnected_instrument() {
    let backend = Arc::new(SimulatedFactory::new());
    let registry = connected_registry(backend).await;
    registry.disconnect("dmm").await.unwrap();

    let plan = SweepDefinition::from_toml_str(SWEEP).unwrap().compile().unwrap();
    let missing = registry
        .drivers_for(plan.inputs().chain(plan.outputs()))
        .await
        .err()
        .unwrap();
    assert_eq!(missing.identity(), Some("dmm"));

    // Building the map by hand without the output is caught by the engine too.
    let partial = registry.drivers_for(plan.inputs()).await.unwrap();
    assert!(partial.contains_key(&QuantityId::new("awg", "Frequency")));
    let result = SweepEngine::new()
        .run(
            &plan,
            &partial,
            Duration::ZERO,
            &mut |_: &StepRecord| {},
            &CancelToken::new(),
        )
        .await;
    assert!(result.is_err());
}
