//! Wiring between configuration, the instrument service and the sweep engine.
//!
//! The binary is a thin shell over these functions.

use crate::config::LabConfig;
use crate::storage::{ResultsRecorder, RunMetadata};
use anyhow::{bail, Context, Result};
use labsweep_core::error::SweepResult;
use labsweep_driver_mock::{Agilent33220aFactory, SimulatedFactory};
use labsweep_experiment::{CancelToken, RunOutcome, SweepDefinition, SweepEngine, SweepPlan};
use labsweep_hardware::{
    ConnectionRegistry, DriverCatalog, InstrumentService, MemoryDescriptorStore, ResourceLister,
    StaticResources,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Driver catalogue with the simulated generic driver and every bundled custom driver.
pub fn build_catalog() -> Arc<DriverCatalog> {
    let backend = Arc::new(SimulatedFactory::new());
    let catalog = Arc::new(DriverCatalog::new(backend.clone()));
    catalog.register(Arc::new(Agilent33220aFactory::with_backend(backend)));
    catalog
}

/// Live resource lister for `config`.
pub fn build_resources(config: &LabConfig) -> Arc<dyn ResourceLister> {
    let configured = StaticResources::new(config.resources.iter().cloned());

    #[cfg(feature = "serial")]
    {
        Arc::new(labsweep_hardware::CombinedResources::new(vec![
            Box::new(configured),
            Box::new(labsweep_hardware::SerialPortResources),
        ]))
    }

    #[cfg(not(feature = "serial"))]
    {
        Arc::new(configured)
    }
}

/// Instrument service seeded with the configured instruments.
pub fn build_service(config: &LabConfig) -> SweepResult<InstrumentService> {
    let registry = Arc::new(ConnectionRegistry::new(
        build_catalog(),
        build_resources(config),
    ));
    let store = MemoryDescriptorStore::with_descriptors(config.instruments.iter().cloned())?;
    Ok(InstrumentService::new(Arc::new(store), registry))
}

/// Parse and compile a sweep file.
pub fn load_sweep(path: &Path) -> Result<(SweepDefinition, SweepPlan)> {
    let definition = SweepDefinition::load(path)?;
    let plan = definition
        .compile()
        .with_context(|| format!("Invalid sweep {}", path.display()))?;
    Ok((definition, plan))
}

/// Result of [`run_sweep`].
#[derive(Debug)]
pub struct SweepReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Results file
    pub results: PathBuf,
}

/// Connect what the sweep needs, run it and record the results.
///
/// Instruments already connected are reused. The engine runs on a background
/// task so `cancel` can be set from elsewhere.
#[instrument(skip(service, config, cancel), fields(sweep = %sweep_path.display()))]
pub async fn run_sweep(
    service: &InstrumentService,
    config: &LabConfig,
    sweep_path: &Path,
    cancel: CancelToken,
) -> Result<SweepReport> {
    let (definition, plan) = load_sweep(sweep_path)?;

    let needed: Vec<String> = definition
        .instruments()
        .into_iter()
        .filter(|id| !service.registry().is_connected(id))
        .collect();
    let failed = service.connect_many(&needed).await?;
    if !failed.is_empty() {
        bail!("Could not connect instruments needed by the sweep: {}", failed.join(", "));
    }

    let drivers = service
        .registry()
        .drivers_for(plan.inputs().chain(plan.outputs()))
        .await?;

    let step_delay = definition.step_delay_or(config.runner.step_delay());
    let metadata = RunMetadata::for_plan(
        &config.application.name,
        Some(sweep_path),
        &plan,
        step_delay,
    );
    let mut recorder = ResultsRecorder::create(
        &config.runner.output_dir,
        &config.runner.base_filename,
        &metadata,
    )?;

    info!(total_steps = plan.total_steps(), results = %recorder.path().display(), "Running sweep");
    let handle = tokio::spawn(async move {
        let engine = SweepEngine::new();
        let outcome = engine
            .run(&plan, &drivers, step_delay, &mut recorder, &cancel)
            .await;
        (outcome, recorder)
    });
    let (outcome, recorder) = handle.await.context("Sweep task panicked")?;
    let outcome = outcome?;
    match &outcome {
        RunOutcome::Completed { .. } => info!(%outcome, "Sweep finished"),
        _ => warn!(%outcome, "Sweep did not complete"),
    }

    let results = recorder.finish()?;
    Ok(SweepReport { outcome, results })
}

/// Disconnect everything, logging the instruments that refused.
pub async fn shutdown(service: &InstrumentService) -> Vec<String> {
    let failed = service.disconnect_all().await;
    if failed.is_empty() {
        info!("All instruments disconnected");
    } else {
        warn!(failed = ?failed, "Some instruments failed to disconnect");
    }
    failed
}
