//! Sweep execution engine.
//!
//! Drives a compiled [`SweepPlan`] against connected instruments, one step at a
//! time.
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()  ┌─────────┐  last step    ┌───────────┐
//! │ Idle │────────▶│ Running │──────────────▶│ Completed │
//! └──────┘         └────┬────┘               └───────────┘
//!                       │ cancel token set   ┌───────────┐
//!                       ├───────────────────▶│ Cancelled │
//!                       │ write/read/record  └───────────┘
//!                       │ error
//!                       │                    ┌────────┐
//!                       └───────────────────▶│ Failed │
//!                                            └────────┘
//! ```
//!
//! Terminal states are final. A new sweep needs a new engine.
//!
//! # Step
//!
//! 1. Stop if the cancel token is set; nothing is written for that step.
//! 2. Write every input, level by level, waiting the step delay after each write.
//! 3. Read every output, waiting the step delay after each read.
//! 4. Hand the record to the observer, then report progress. An observer error
//!    ends the run as failed; the step does not count as completed.

use crate::plan::{Step, SweepPlan};
use labsweep_core::capabilities::DriverHandle;
use labsweep_core::error::{SweepError, SweepResult};
use labsweep_core::identity::QuantityId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

/// Driver handle per quantity of a plan.
pub type QuantityDrivers = HashMap<QuantityId, DriverHandle>;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Ready to run
    Idle,
    /// Executing a plan
    Running,
    /// Every step ran
    Completed,
    /// Stopped by the cancel token
    Cancelled,
    /// Stopped by a write, read or record error
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running => write!(f, "running"),
            EngineState::Completed => write!(f, "completed"),
            EngineState::Cancelled => write!(f, "cancelled"),
            EngineState::Failed => write!(f, "failed"),
        }
    }
}

/// Cooperative cancellation flag shared between the engine and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next step boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Values written and read during one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Zero-based step index
    pub step: usize,
    /// `(key, value)` pairs: inputs in write order, then outputs in read order
    pub values: Vec<(String, Value)>,
}

impl StepRecord {
    /// Value recorded under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Keys in record order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every step ran
    Completed {
        /// Steps executed
        total_steps: usize,
    },
    /// The cancel token was set before a step
    Cancelled {
        /// Last step that fully completed
        last_completed: Option<usize>,
    },
    /// A write, read or record failed
    Failed {
        /// Last step that fully completed
        last_completed: Option<usize>,
        /// What failed
        error: SweepError,
    },
}

impl RunOutcome {
    /// Whether the run completed every step.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }

    /// Last step that fully completed, if any.
    pub fn last_completed(&self) -> Option<usize> {
        match self {
            RunOutcome::Completed { total_steps } => total_steps.checked_sub(1),
            RunOutcome::Cancelled { last_completed } => *last_completed,
            RunOutcome::Failed { last_completed, .. } => *last_completed,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed { total_steps } => {
                write!(f, "completed {} steps", total_steps)
            }
            RunOutcome::Cancelled { last_completed } => match last_completed {
                Some(step) => write!(f, "cancelled after step {}", step),
                None => write!(f, "cancelled before the first step"),
            },
            RunOutcome::Failed {
                last_completed,
                error,
            } => match last_completed {
                Some(step) => write!(f, "failed after step {}: {}", step, error),
                None => write!(f, "failed on the first step: {}", error),
            },
        }
    }
}

/// Receives step records and progress while a sweep runs.
///
/// Called synchronously from the engine task, so implementations should not block.
pub trait RunObserver: Send {
    /// A step completed. Returning `Err` stops the sweep before the next step.
    fn on_step(&mut self, record: &StepRecord) -> SweepResult<()>;

    /// Percent complete, `100 * step / total_steps` after each step.
    fn on_progress(&mut self, _percent: f64) {}
}

impl<F> RunObserver for F
where
    F: FnMut(&StepRecord) + Send,
{
    fn on_step(&mut self, record: &StepRecord) -> SweepResult<()> {
        self(record);
        Ok(())
    }
}

/// Executes one sweep plan.
#[derive(Debug)]
pub struct SweepEngine {
    state: RwLock<EngineState>,
}

impl Default for SweepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepEngine {
    /// Create an idle engine.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Idle),
        }
    }

    /// Current state.
    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Run `plan` to a terminal state.
    ///
    /// Returns `Err` without leaving `Idle` when the engine was already used or a
    /// quantity of the plan has no driver. Once running, every ending is an
    /// `Ok(RunOutcome)`.
    #[instrument(skip_all, fields(total_steps = plan.total_steps()), err)]
    pub async fn run(
        &self,
        plan: &SweepPlan,
        drivers: &QuantityDrivers,
        step_delay: Duration,
        observer: &mut dyn RunObserver,
        cancel: &CancelToken,
    ) -> SweepResult<RunOutcome> {
        {
            let mut state = self.state.write().await;
            if *state != EngineState::Idle {
                return Err(SweepError::InvalidState(format!(
                    "engine is {}, a new engine is required for every sweep",
                    *state
                )));
            }
            if let Some(missing) = plan
                .inputs()
                .chain(plan.outputs())
                .find(|q| !drivers.contains_key(*q))
            {
                return Err(SweepError::NotConnected {
                    identity: missing.instrument.clone(),
                });
            }
            *state = EngineState::Running;
        }

        let total_steps = plan.total_steps();
        if total_steps == 0 {
            warn!("Sweep plan has no steps");
        }
        info!(
            inputs = plan.inputs().count(),
            outputs = plan.outputs().len(),
            "Sweep started"
        );

        let mut last_completed = None;
        for step in plan.steps() {
            if cancel.is_cancelled() {
                warn!(?last_completed, "Sweep cancelled");
                self.finish(EngineState::Cancelled).await;
                return Ok(RunOutcome::Cancelled { last_completed });
            }

            let result = self
                .execute_step(plan, &step, drivers, step_delay)
                .await
                .and_then(|record| observer.on_step(&record));
            match result {
                Ok(()) => {
                    last_completed = Some(step.index);
                    observer.on_progress(100.0 * step.index as f64 / total_steps as f64);
                }
                Err(error) => {
                    error!(step = step.index, error = %error, "Sweep failed");
                    self.finish(EngineState::Failed).await;
                    return Ok(RunOutcome::Failed {
                        last_completed,
                        error,
                    });
                }
            }
        }

        info!(total_steps, "Sweep completed");
        self.finish(EngineState::Completed).await;
        Ok(RunOutcome::Completed { total_steps })
    }

    async fn finish(&self, state: EngineState) {
        *self.state.write().await = state;
    }

    async fn execute_step(
        &self,
        plan: &SweepPlan,
        step: &Step,
        drivers: &QuantityDrivers,
        step_delay: Duration,
    ) -> SweepResult<StepRecord> {
        debug!(step = step.index, "Executing step");
        let mut values = Vec::new();

        for (level, row) in plan.levels().iter().zip(&step.values) {
            for (quantity, value) in level.quantities().iter().zip(row) {
                let driver = self.driver(drivers, quantity)?;
                let value = Value::from(*value);
                driver
                    .set_value(&quantity.quantity, value.clone())
                    .await
                    .map_err(|e| SweepError::StepWriteFailed {
                        step: step.index,
                        quantity: quantity.clone(),
                        cause: format!("{:#}", e),
                    })?;
                pause(step_delay).await;
                values.push((quantity.input_key(), value));
            }
        }

        for quantity in plan.outputs() {
            let driver = self.driver(drivers, quantity)?;
            let value = driver.get_value(&quantity.quantity).await.map_err(|e| {
                SweepError::StepReadFailed {
                    step: step.index,
                    quantity: quantity.clone(),
                    cause: format!("{:#}", e),
                }
            })?;
            pause(step_delay).await;
            values.push((quantity.output_key(), value));
        }

        Ok(StepRecord {
            step: step.index,
            values,
        })
    }

    fn driver<'a>(
        &self,
        drivers: &'a QuantityDrivers,
        quantity: &QuantityId,
    ) -> SweepResult<&'a DriverHandle> {
        drivers.get(quantity).ok_or_else(|| SweepError::NotConnected {
            identity: quantity.instrument.clone(),
        })
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
