//! Sweep definition files.
//!
//! A definition lists ranges tagged with a level number. Ranges sharing a level
//! move together; levels run outermost first in ascending level order, whatever
//! order they appear in the file.
//!
//! ```toml
//! step_delay_ms = 50
//! outputs = [{ instrument = "dmm", quantity = "Voltage" }]
//!
//! [[ranges]]
//! level = 1
//! instrument = "psu"
//! quantity = "Output"
//! value = 1.0
//!
//! [[ranges]]
//! level = 2
//! instrument = "awg"
//! quantity = "Frequency"
//! start = 100.0
//! stop = 1000.0
//! points = 10
//! ```

use crate::plan::{NumericKind, RangeSpec, SweepLevel, SweepPlan};
use anyhow::Context;
use labsweep_core::error::{SweepError, SweepResult};
use labsweep_core::identity::{InstrumentId, QuantityId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::time::Duration;

/// One `[[ranges]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeEntry {
    /// Level number; lower levels vary slower
    pub level: u32,
    /// Instrument identity
    pub instrument: InstrumentId,
    /// Quantity name on the instrument
    pub quantity: String,
    /// Hold the quantity at this single value (overrides start/stop/points)
    #[serde(default)]
    pub value: Option<f64>,
    /// First value of a swept range
    #[serde(default)]
    pub start: Option<f64>,
    /// Last value of a swept range
    #[serde(default)]
    pub stop: Option<f64>,
    /// Number of values of a swept range
    #[serde(default)]
    pub points: Option<usize>,
    /// Expansion rule
    #[serde(default)]
    pub kind: NumericKind,
}

impl RangeEntry {
    fn quantity_id(&self) -> QuantityId {
        QuantityId::new(&self.instrument, &self.quantity)
    }

    fn to_range(&self) -> SweepResult<RangeSpec> {
        let quantity = self.quantity_id();
        if let Some(value) = self.value {
            return Ok(RangeSpec::single(quantity, value));
        }
        match (self.start, self.stop, self.points) {
            (Some(start), Some(stop), Some(points)) => Ok(RangeSpec {
                quantity,
                start,
                stop,
                points,
                kind: self.kind,
            }),
            _ => Err(SweepError::InvalidRange {
                quantity,
                reason: "either `value` or all of `start`, `stop` and `points` must be given"
                    .to_string(),
            }),
        }
    }
}

/// A sweep as written in a definition file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepDefinition {
    /// Delay after every write and read, overriding the runner default
    #[serde(default)]
    pub step_delay_ms: Option<u64>,
    /// Quantities read after every step
    #[serde(default)]
    pub outputs: Vec<QuantityId>,
    /// Input ranges
    #[serde(default)]
    pub ranges: Vec<RangeEntry>,
}

impl SweepDefinition {
    /// Parse a definition from TOML text.
    pub fn from_toml_str(text: &str) -> SweepResult<Self> {
        toml::from_str(text)
            .map_err(|e| SweepError::Configuration(format!("invalid sweep file: {e}")))
    }

    /// Read and parse a definition file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sweep file {}", path.display()))?;
        Ok(Self::from_toml_str(&text)?)
    }

    /// Ranges grouped into levels by ascending level number, file order kept
    /// within a level.
    pub fn levels(&self) -> SweepResult<Vec<SweepLevel>> {
        let mut seen = HashSet::new();
        let mut grouped: BTreeMap<u32, SweepLevel> = BTreeMap::new();
        for entry in &self.ranges {
            if !seen.insert(entry.quantity_id()) {
                return Err(SweepError::DuplicateQuantity {
                    quantity: entry.quantity_id(),
                });
            }
            grouped.entry(entry.level).or_default().push(entry.to_range()?);
        }
        Ok(grouped.into_values().collect())
    }

    /// Compile into a plan.
    pub fn compile(&self) -> SweepResult<SweepPlan> {
        SweepPlan::compile(self.levels()?, self.outputs.clone())
    }

    /// Step delay, or `default` when the file does not set one.
    pub fn step_delay_or(&self, default: Duration) -> Duration {
        self.step_delay_ms.map(Duration::from_millis).unwrap_or(default)
    }

    /// Every instrument the sweep writes to or reads from.
    pub fn instruments(&self) -> BTreeSet<InstrumentId> {
        self.ranges
            .iter()
            .map(|r| r.instrument.clone())
            .chain(self.outputs.iter().map(|q| q.instrument.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP: &str = r#"
step_delay_ms = 25
outputs = [{ instrument = "dmm", quantity = "Voltage" }]

[[ranges]]
level = 5
instrument = "awg"
quantity = "Frequency"
start = 100.0
stop = 400.0
points = 4

[[ranges]]
level = 1
instrument = "psu"
quantity = "Output"
value = 1.0

[[ranges]]
level = 5
instrument = "awg"
quantity = "Amplitude"
start = 0.0
stop = 1.0
points = 4
kind = "discrete"
"#;

    #[test]
    fn test_levels_sorted_by_number() {
        let def = SweepDefinition::from_toml_str(SWEEP).unwrap();
        let levels = def.levels().unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0][0].quantity, QuantityId::new("psu", "Output"));
        assert_eq!(levels[0][0].points, 1);
        assert_eq!(levels[1][0].quantity.quantity, "Frequency");
        assert_eq!(levels[1][1].kind, NumericKind::Discrete);

        let plan = def.compile().unwrap();
        assert_eq!(plan.total_steps(), 4);
        assert_eq!(
            plan.step(2).unwrap().values,
            vec![vec![1.0], vec![300.0, 1.0]]
        );
    }

    #[test]
    fn test_delay_and_instruments() {
        let def = SweepDefinition::from_toml_str(SWEEP).unwrap();
        assert_eq!(
            def.step_delay_or(Duration::from_millis(500)),
            Duration::from_millis(25)
        );
        let instruments: Vec<_> = def.instruments().into_iter().collect();
        assert_eq!(instruments, vec!["awg", "dmm", "psu"]);
    }

    #[test]
    fn test_duplicate_quantity_across_levels() {
        let text = r#"
[[ranges]]
level = 1
instrument = "psu"
quantity = "Output"
value = 1.0

[[ranges]]
level = 2
instrument = "psu"
quantity = "Output"
value = 0.0
"#;
        let def = SweepDefinition::from_toml_str(text).unwrap();
        assert!(matches!(
            def.compile(),
            Err(SweepError::DuplicateQuantity { .. })
        ));
    }

    #[test]
    fn test_incomplete_range_is_rejected() {
        let text = r#"
[[ranges]]
level = 1
instrument = "awg"
quantity = "Frequency"
start = 1.0
"#;
        let def = SweepDefinition::from_toml_str(text).unwrap();
        assert!(matches!(def.compile(), Err(SweepError::InvalidRange { .. })));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            SweepDefinition::from_toml_str("ranges = 3"),
            Err(SweepError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        std::fs::write(&path, SWEEP).unwrap();
        let def = SweepDefinition::load(&path).unwrap();
        assert_eq!(def.ranges.len(), 3);
        assert!(SweepDefinition::load(&dir.path().join("missing.toml")).is_err());
    }
}
