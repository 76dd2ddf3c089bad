//! CSV results recorder.
//!
//! One file per run, named `<base>_<YYYY_MM_DD-HH_MM_SS_AM>_.csv` in the output
//! directory. The file starts with the run metadata as `# `-prefixed JSON lines,
//! followed by a header row (`step`, input keys, output keys) and one row per step.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use labsweep_core::error::{SweepError, SweepResult};
use labsweep_experiment::{RunObserver, StepRecord, SweepPlan};
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timestamp format used in results file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y_%m_%d-%I_%M_%S_%p";

/// Description of a run, written as the file header.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    /// Application name from the configuration
    pub application: String,
    /// Sweep definition the run was compiled from
    pub sweep: Option<PathBuf>,
    /// Local start time
    pub started: DateTime<Local>,
    /// Steps in the plan
    pub total_steps: usize,
    /// Delay after every write and read
    pub step_delay_ms: u64,
    /// Input column keys
    pub inputs: Vec<String>,
    /// Output column keys
    pub outputs: Vec<String>,
}

impl RunMetadata {
    /// Metadata for running `plan` now.
    pub fn for_plan(
        application: &str,
        sweep: Option<&Path>,
        plan: &SweepPlan,
        step_delay: Duration,
    ) -> Self {
        Self {
            application: application.to_string(),
            sweep: sweep.map(Path::to_path_buf),
            started: Local::now(),
            total_steps: plan.total_steps(),
            step_delay_ms: u64::try_from(step_delay.as_millis()).unwrap_or(u64::MAX),
            inputs: plan.inputs().map(|q| q.input_key()).collect(),
            outputs: plan.outputs().iter().map(|q| q.output_key()).collect(),
        }
    }

    /// Data columns in file order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().chain(&self.outputs).map(String::as_str)
    }
}

/// Results file name for a run started at `started`.
pub fn results_file_name(base: &str, started: &DateTime<Local>) -> String {
    format!("{}_{}_.csv", base, started.format(FILE_TIMESTAMP_FORMAT))
}

/// Writes step records to a CSV file as they arrive.
///
/// Every row is flushed before the next step runs. A row that cannot be written
/// stops the sweep.
pub struct ResultsRecorder {
    path: PathBuf,
    columns: Vec<String>,
    writer: csv::Writer<File>,
    rows: usize,
    first_error: Option<anyhow::Error>,
}

impl ResultsRecorder {
    /// Create the results file in `output_dir` and write its header.
    pub fn create(output_dir: &Path, base: &str, metadata: &RunMetadata) -> Result<Self> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("Failed to create output directory {}", output_dir.display())
        })?;
        let path = output_dir.join(results_file_name(base, &metadata.started));

        let mut file = File::create(&path)
            .with_context(|| format!("Failed to create results file {}", path.display()))?;
        let json =
            serde_json::to_string_pretty(metadata).context("Failed to serialize run metadata")?;
        for line in json.lines() {
            writeln!(file, "# {}", line)?;
        }

        let columns: Vec<String> = metadata.columns().map(str::to_string).collect();
        let mut recorder = Self::from_file(path, columns, file);
        let header = std::iter::once("step").chain(recorder.columns.iter().map(String::as_str));
        recorder.writer.write_record(header)?;
        recorder.writer.flush()?;

        info!(
            path = %recorder.path.display(),
            columns = recorder.columns.len(),
            "Results file created"
        );
        Ok(recorder)
    }

    fn from_file(path: PathBuf, columns: Vec<String>, file: File) -> Self {
        Self {
            path,
            columns,
            writer: csv::Writer::from_writer(file),
            rows: 0,
            first_error: None,
        }
    }

    /// Path of the results file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Append one step.
    pub fn write_record(&mut self, record: &StepRecord) -> Result<()> {
        let mut row = Vec::with_capacity(self.columns.len() + 1);
        row.push(record.step.to_string());
        for column in &self.columns {
            row.push(record.get(column).map(cell).unwrap_or_default());
        }
        self.writer.write_record(&row)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Flush the file. Returns the first error any row hit.
    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(err) = self.first_error.take() {
            return Err(err.context(format!("Results file {} is incomplete", self.path.display())));
        }
        self.writer.flush()?;
        info!(path = %self.path.display(), rows = self.rows, "Results file closed");
        Ok(self.path)
    }
}

impl RunObserver for ResultsRecorder {
    fn on_step(&mut self, record: &StepRecord) -> SweepResult<()> {
        if let Err(e) = self.write_record(record) {
            warn!(step = record.step, error = %e, "Failed to write results row");
            let err = SweepError::RecordFailed {
                step: record.step,
                cause: format!("{:#}", e),
            };
            self.first_error.get_or_insert(e);
            return Err(err);
        }
        Ok(())
    }

    fn on_progress(&mut self, percent: f64) {
        debug!(percent, "Sweep progress");
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use labsweep_core::identity::QuantityId;
    use labsweep_experiment::RangeSpec;
    use tokio_test::{assert_err, assert_ok};

    fn plan() -> SweepPlan {
        SweepPlan::compile(
            vec![vec![RangeSpec::continuous(QuantityId::new("awg", "Frequency"), 1.0, 2.0, 2)]],
            vec![QuantityId::new("dmm", "Voltage")],
        )
        .unwrap()
    }

    #[test]
    fn test_file_name_format() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            results_file_name("sweep", &started),
            "sweep_2024_03_09-02_05_07_PM_.csv"
        );
    }

    #[test]
    fn test_records_written_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = RunMetadata::for_plan("bench", None, &plan(), Duration::from_millis(5));
        let mut recorder = ResultsRecorder::create(dir.path(), "run", &metadata).unwrap();

        assert_ok!(recorder.on_step(&StepRecord {
            step: 0,
            values: vec![
                ("Input - awg - Frequency".to_string(), Value::from(1.0)),
                ("Output - dmm - Voltage".to_string(), Value::from(0.5)),
            ],
        }));
        assert_ok!(recorder.on_step(&StepRecord {
            step: 1,
            values: vec![
                ("Input - awg - Frequency".to_string(), Value::from(2.0)),
                ("Output - dmm - Voltage".to_string(), Value::from("OVLD")),
            ],
        }));
        assert_eq!(recorder.rows(), 2);
        let path = recorder.finish().unwrap();

        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("run_") && name.ends_with("_.csv"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let comments: Vec<_> = contents.lines().filter(|l| l.starts_with("# ")).collect();
        assert!(comments.iter().any(|l| l.contains("\"application\": \"bench\"")));
        assert!(comments.iter().any(|l| l.contains("\"step_delay_ms\": 5")));

        let data: Vec<_> = contents.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            data,
            vec![
                "step,Input - awg - Frequency,Output - dmm - Voltage",
                "0,1.0,0.5",
                "1,2.0,OVLD",
            ]
        );
    }

    #[test]
    fn test_missing_value_is_empty_cell() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = RunMetadata::for_plan("bench", None, &plan(), Duration::ZERO);
        let mut recorder = ResultsRecorder::create(dir.path(), "run", &metadata).unwrap();
        recorder
            .write_record(&StepRecord {
                step: 0,
                values: vec![("Input - awg - Frequency".to_string(), Value::from(1.5))],
            })
            .unwrap();
        let path = recorder.finish().unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.lines().any(|l| l == "0,1.5,"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unwritable_row_fails_the_step() {
        let file = File::options().write(true).open("/dev/full").unwrap();
        let mut recorder = ResultsRecorder::from_file(
            PathBuf::from("/dev/full"),
            vec!["Output - dmm - Voltage".to_string()],
            file,
        );

        let err = assert_err!(recorder.on_step(&StepRecord {
            step: 3,
            values: vec![("Output - dmm - Voltage".to_string(), Value::from(0.5))],
        }));
        assert!(matches!(err, SweepError::RecordFailed { step: 3, .. }));
        assert_eq!(recorder.rows(), 0);
        assert!(recorder.finish().is_err());
    }
}
