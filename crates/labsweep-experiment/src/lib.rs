//! Sweep planning and execution for labsweep.
//!
//! A sweep is described as ordered levels of ranges. [`plan::SweepPlan::compile`]
//! expands and validates them into a plan, [`definition::SweepDefinition`] reads
//! them from a TOML file, and [`engine::SweepEngine`] drives the plan against
//! connected instruments one step at a time.

pub mod definition;
pub mod engine;
pub mod plan;

pub use definition::{RangeEntry, SweepDefinition};
pub use engine::{CancelToken, EngineState, RunObserver, RunOutcome, StepRecord, SweepEngine};
pub use plan::{NumericKind, RangeSpec, Step, SweepLevel, SweepPlan};
