//! Sweep plan compiler.
//!
//! A sweep is a list of levels; each level is a list of ranges that move
//! together. Compilation expands every range into its value sequence, checks
//! that the ranges of a level line up, and fixes the step count.
//!
//! ```text
//! level 0: A = [0, 1]          ──┐ outer, varies slowest
//! level 1: B = [10, 20]        ──┤ zipped positionally
//!          C = [0.1, 0.2]      ──┤
//! level 2: D = [5, 6]          ──┘ inner, varies fastest
//!
//! step 0: A=0 B=10 C=0.1 D=5
//! step 1: A=0 B=10 C=0.1 D=6
//! step 2: A=0 B=20 C=0.2 D=5
//! ...
//! ```
//!
//! Steps are generated on demand from their index, so a plan with millions of
//! steps holds only the per-level value tables.

use labsweep_core::error::{SweepError, SweepResult};
use labsweep_core::identity::QuantityId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

/// How a range is expanded into values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericKind {
    /// Evenly spaced values from start to stop inclusive
    #[default]
    Continuous,
    /// Two-state toggle: the first half at start, the rest at stop
    Discrete,
}

/// One quantity's range within a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSpec {
    /// Quantity being driven
    pub quantity: QuantityId,
    /// First value
    pub start: f64,
    /// Last value
    pub stop: f64,
    /// Number of values
    pub points: usize,
    /// Expansion rule
    #[serde(default)]
    pub kind: NumericKind,
}

impl RangeSpec {
    /// Evenly spaced range.
    pub fn continuous(quantity: QuantityId, start: f64, stop: f64, points: usize) -> Self {
        Self {
            quantity,
            start,
            stop,
            points,
            kind: NumericKind::Continuous,
        }
    }

    /// Two-state range.
    pub fn discrete(quantity: QuantityId, start: f64, stop: f64, points: usize) -> Self {
        Self {
            quantity,
            start,
            stop,
            points,
            kind: NumericKind::Discrete,
        }
    }

    /// A quantity held at one value.
    pub fn single(quantity: QuantityId, value: f64) -> Self {
        Self::continuous(quantity, value, value, 1)
    }

    /// Reject ranges that cannot be expanded.
    pub fn validate(&self) -> SweepResult<()> {
        if self.points == 0 {
            return Err(SweepError::InvalidRange {
                quantity: self.quantity.clone(),
                reason: "number of points must be at least 1".to_string(),
            });
        }
        if !self.start.is_finite() || !self.stop.is_finite() {
            return Err(SweepError::InvalidRange {
                quantity: self.quantity.clone(),
                reason: format!(
                    "start and stop must be finite (got {} and {})",
                    self.start, self.stop
                ),
            });
        }
        Ok(())
    }

    /// Expanded value sequence.
    pub fn values(&self) -> Vec<f64> {
        match self.kind {
            NumericKind::Continuous => linspace(self.start, self.stop, self.points),
            NumericKind::Discrete => toggle(self.start, self.stop, self.points),
        }
    }
}

/// `n` evenly spaced values from `start` to `stop`, both included exactly.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        stop
                    } else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// `ceil(n/2)` copies of `start` followed by `floor(n/2)` copies of `stop`.
fn toggle(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if start == stop {
        return vec![start; n];
    }
    let head = n.div_ceil(2);
    let mut values = vec![start; head];
    values.resize(n, stop);
    values
}

/// Ranges that move together.
pub type SweepLevel = Vec<RangeSpec>;

/// A level after expansion: quantities and one row of values per position.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledLevel {
    quantities: Vec<QuantityId>,
    rows: Vec<Vec<f64>>,
}

impl CompiledLevel {
    /// Quantities of this level, in write order.
    pub fn quantities(&self) -> &[QuantityId] {
        &self.quantities
    }

    /// Number of positions.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the level has no positions.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values at `position`, one per quantity.
    pub fn row(&self, position: usize) -> Option<&[f64]> {
        self.rows.get(position).map(Vec::as_slice)
    }
}

/// One concrete step of a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Zero-based step index
    pub index: usize,
    /// Values per level, in level order, one per quantity of the level
    pub values: Vec<Vec<f64>>,
}

/// A validated sweep: levels, outputs to read and the step count.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    levels: Vec<CompiledLevel>,
    outputs: Vec<QuantityId>,
    total_steps: usize,
}

impl SweepPlan {
    /// Expand and validate `levels`.
    ///
    /// Fails on the first malformed range, on a quantity that appears twice,
    /// and on a level whose ranges expand to different lengths. No plan exists
    /// after a failure.
    pub fn compile(levels: Vec<SweepLevel>, outputs: Vec<QuantityId>) -> SweepResult<Self> {
        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(levels.len());

        for (level_index, level) in levels.into_iter().enumerate() {
            let mut expected: Option<usize> = None;
            let mut quantities = Vec::with_capacity(level.len());
            let mut columns = Vec::with_capacity(level.len());

            for range in level {
                range.validate()?;
                if !seen.insert(range.quantity.clone()) {
                    return Err(SweepError::DuplicateQuantity {
                        quantity: range.quantity,
                    });
                }

                let values = range.values();
                match expected {
                    None => expected = Some(values.len()),
                    Some(expected) if expected != values.len() => {
                        return Err(SweepError::LevelLengthMismatch {
                            level: level_index,
                            expected,
                            actual: values.len(),
                            quantity: range.quantity,
                        });
                    }
                    Some(_) => {}
                }
                quantities.push(range.quantity);
                columns.push(values);
            }

            let positions = expected.unwrap_or(0);
            let rows: Vec<Vec<f64>> = (0..positions)
                .map(|p| columns.iter().map(|column| column[p]).collect())
                .collect();
            compiled.push(CompiledLevel { quantities, rows });
        }

        let total_steps = compiled
            .iter()
            .try_fold(1usize, |acc, level| acc.checked_mul(level.len()))
            .ok_or_else(|| SweepError::Configuration("sweep has too many steps".to_string()))?;

        if total_steps == 0 {
            warn!(levels = compiled.len(), "Sweep plan contains an empty level and has no steps");
        }

        Ok(Self {
            levels: compiled,
            outputs,
            total_steps,
        })
    }

    /// Number of steps.
    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Whether running the plan would do nothing.
    pub fn is_empty(&self) -> bool {
        self.total_steps == 0
    }

    /// Compiled levels, outermost first.
    pub fn levels(&self) -> &[CompiledLevel] {
        &self.levels
    }

    /// Quantities read after every step.
    pub fn outputs(&self) -> &[QuantityId] {
        &self.outputs
    }

    /// Every input quantity, in write order.
    pub fn inputs(&self) -> impl Iterator<Item = &QuantityId> {
        self.levels.iter().flat_map(|level| level.quantities.iter())
    }

    /// Step at `index`, or `None` past the end.
    ///
    /// The index is decomposed mixed-radix with the last level as the least
    /// significant digit.
    pub fn step(&self, index: usize) -> Option<Step> {
        if index >= self.total_steps {
            return None;
        }
        let mut values = vec![Vec::new(); self.levels.len()];
        let mut remainder = index;
        for (slot, level) in values.iter_mut().zip(&self.levels).rev() {
            let position = remainder % level.len();
            remainder /= level.len();
            *slot = level.rows[position].clone();
        }
        Some(Step { index, values })
    }

    /// Lazy iterator over every step in order.
    pub fn steps(&self) -> Steps<'_> {
        Steps {
            plan: self,
            next: 0,
        }
    }
}

/// Iterator returned by [`SweepPlan::steps`].
#[derive(Debug)]
pub struct Steps<'a> {
    plan: &'a SweepPlan,
    next: usize,
}

impl Iterator for Steps<'_> {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        let step = self.plan.step(self.next)?;
        self.next += 1;
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.plan.total_steps.saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Steps<'_> {}
