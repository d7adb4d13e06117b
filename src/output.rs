use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::Writer;
use serde::{Deserialize, Serialize};

use crate::aggregate::{round_to, Aggregate, MetricSummary};
use crate::sweep::CombinationResult;
use crate::SweepError;

pub const RESULTS_FILE: &str = "results.csv";
pub const SUMMARY_FILE: &str = "summary.json";

pub const NUMBER_OF_STATIONS: &str = "numberOfStations";
pub const DISTANCE: &str = "distance";
pub const MEASUREMENT_ERROR_COLUMN: &str = "measurementError";

/// ns-3 `ftm-example` parameters after the two leading ones, in column order.
pub const KNOWN_PARAMETERS: &[&str] = &[
    "numberOfBurstsExponent",
    "burstDuration",
    "minDeltaFtm",
    "partialTsfTimer",
    "partialTsfNoPref",
    "asapCapable",
    "asap",
    "ftmsPerBurst",
    "formatAndBandwidth",
    "burstPeriod",
    "frequency",
    "rxGain",
    "propagationLossModel",
    "channelBandwidth",
];

pub const METRIC_COLUMNS: [&str; 6] = [
    "RTT",
    "stdDevRTT",
    "meanSignalStrength",
    "stdDevSS",
    "numMeasurements",
    "stdDevNumMeasurements",
];

/// Column layout of the results table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    parameter_columns: Vec<String>,
}

impl TableSchema {
    /// Known parameters always get a column; undeclared extras follow in
    /// declaration order.
    pub fn for_parameters<S: AsRef<str>>(declared: &[S]) -> Self {
        let mut parameter_columns: Vec<String> = KNOWN_PARAMETERS
            .iter()
            .map(|name| name.to_string())
            .collect();

        for name in declared {
            let name = name.as_ref();
            if name != NUMBER_OF_STATIONS
                && name != DISTANCE
                && !parameter_columns.iter().any(|col| col == name)
            {
                parameter_columns.push(name.to_string());
            }
        }

        Self { parameter_columns }
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec![
            NUMBER_OF_STATIONS.to_string(),
            DISTANCE.to_string(),
            MEASUREMENT_ERROR_COLUMN.to_string(),
        ];
        header.extend(self.parameter_columns.iter().cloned());
        header.extend(METRIC_COLUMNS.iter().map(|col| col.to_string()));
        header
    }

    pub fn row(&self, result: &CombinationResult) -> Vec<String> {
        let param = |name: &str| {
            result
                .combination
                .get(name)
                .map(|value| value.to_string())
                .unwrap_or_default()
        };

        let mut row = vec![
            param(NUMBER_OF_STATIONS),
            param(DISTANCE),
            result
                .measurement_error
                .map(|err| format!("{err:.2}"))
                .unwrap_or_default(),
        ];
        row.extend(self.parameter_columns.iter().map(|name| param(name)));
        row.extend(metric_cells(&result.aggregate));
        row
    }
}

fn fmt_int(value: f64) -> String {
    format!("{}", value.round() as i64)
}

fn fmt_one_decimal(value: f64) -> String {
    format!("{:.1}", round_to(value, 1))
}

/// Mean and std cells of one metric; both empty when no trial reported it.
fn summary_cells(summary: &MetricSummary, fmt: fn(f64) -> String) -> [String; 2] {
    if summary.has_samples() {
        [fmt(summary.mean), fmt(summary.std)]
    } else {
        [String::new(), String::new()]
    }
}

fn metric_cells(aggregate: &Aggregate) -> Vec<String> {
    let mut cells = Vec::with_capacity(METRIC_COLUMNS.len());
    cells.extend(summary_cells(&aggregate.rtt, fmt_int));
    cells.extend(summary_cells(&aggregate.signal_strength, fmt_one_decimal));
    cells.extend(summary_cells(&aggregate.num_measurements, fmt_int));
    cells
}

/// Append-only CSV table of aggregated combinations.
pub struct CsvResultSink<W: Write> {
    writer: Writer<W>,
    schema: TableSchema,
    rows: usize,
}

impl CsvResultSink<File> {
    /// Creates (or truncates) the table at `path` and writes its header.
    pub fn from_path(path: &Path, schema: TableSchema) -> Result<Self, SweepError> {
        Self::new(File::create(path)?, schema)
    }
}

impl<W: Write> CsvResultSink<W> {
    pub fn new(writer: W, schema: TableSchema) -> Result<Self, SweepError> {
        let mut writer = Writer::from_writer(writer);
        writer.write_record(schema.header())?;
        writer.flush()?;
        Ok(Self {
            writer,
            schema,
            rows: 0,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn append(&mut self, result: &CombinationResult) -> Result<(), SweepError> {
        self.writer.write_record(self.schema.row(result))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, SweepError> {
        self.writer
            .into_inner()
            .map_err(|err| SweepError::Io(err.into_error()))
    }
}

/// Bookkeeping written next to the results table once the sweep finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub parameters: Vec<String>,
    pub trials_per_combination: usize,
    pub total_combinations: usize,
    pub skipped_combinations: usize,
    pub degenerate_combinations: usize,
    pub written_combinations: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

pub fn write_summary_json(path: &Path, summary: &SweepSummary) -> Result<(), SweepError> {
    fs::write(path, serde_json::to_string_pretty(summary)?)?;
    Ok(())
}

/// Allocates `<base>/<UTC timestamp>`, adding a counter on collision.
pub fn create_timestamped_output_dir(base: &Path) -> Result<PathBuf, SweepError> {
    fs::create_dir_all(base)?;

    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let mut output_dir = base.join(&timestamp);
    let mut counter = 1_u32;

    while output_dir.exists() {
        output_dir = base.join(format!("{timestamp}-{counter:02}"));
        counter += 1;
    }

    fs::create_dir_all(&output_dir)?;
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Combination;

    fn result(combination: Combination) -> CombinationResult {
        CombinationResult {
            combination,
            trials: Vec::new(),
            aggregate: Aggregate {
                rtt: MetricSummary { mean: 33333.4, std: 12.6, samples: 3 },
                signal_strength: MetricSummary { mean: -42.46, std: 0.04, samples: 3 },
                num_measurements: MetricSummary { mean: 9.6, std: 0.47, samples: 3 },
            },
            measurement_error: Some(0.0),
        }
    }

    #[test]
    fn header_has_fixed_layout() {
        let schema = TableSchema::for_parameters(&["distance", "numberOfStations"]);
        let header = schema.header();
        assert_eq!(&header[..4], &["numberOfStations", "distance", "measurementError", "numberOfBurstsExponent"]);
        assert_eq!(&header[header.len() - 6..], &METRIC_COLUMNS);
        assert_eq!(header.len(), 3 + KNOWN_PARAMETERS.len() + 6);
    }

    #[test]
    fn unknown_parameters_are_appended() {
        let schema = TableSchema::for_parameters(&["txPower", "distance"]);
        let header = schema.header();
        assert_eq!(header[3 + KNOWN_PARAMETERS.len()], "txPower");
    }

    #[test]
    fn row_rounds_metrics_and_leaves_absent_parameters_empty() {
        let schema = TableSchema::for_parameters(&["distance"]);
        let row = schema.row(&result(Combination::new().with("distance", 5_i64)));
        assert_eq!(row[0], "");
        assert_eq!(row[1], "5");
        assert_eq!(row[2], "0.00");
        assert!(row[3..3 + KNOWN_PARAMETERS.len()].iter().all(String::is_empty));
        assert_eq!(&row[row.len() - 6..], &["33333", "13", "-42.5", "0.0", "10", "0"]);
    }

    #[test]
    fn unreported_metrics_are_empty_not_zero() {
        let schema = TableSchema::for_parameters(&["numberOfStations"]);
        let mut only_rtt = result(Combination::new().with("numberOfStations", 1_i64));
        only_rtt.aggregate.signal_strength = MetricSummary::default();
        only_rtt.aggregate.num_measurements = MetricSummary::default();

        let row = schema.row(&only_rtt);
        assert_eq!(&row[row.len() - 6..], &["33333", "13", "", "", "", ""]);
    }

    #[test]
    fn sink_writes_header_then_rows() {
        let schema = TableSchema::for_parameters(&["numberOfStations"]);
        let mut sink = CsvResultSink::new(Vec::new(), schema).unwrap();
        sink.append(&result(Combination::new().with("numberOfStations", 4_i64)))
            .unwrap();
        assert_eq!(sink.rows_written(), 1);

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("numberOfStations,distance,measurementError,"));
        assert!(lines[1].starts_with("4,,0.00,"));
    }

    #[test]
    fn timestamped_dirs_do_not_collide() {
        let base = tempfile::tempdir().unwrap();
        let first = create_timestamped_output_dir(base.path()).unwrap();
        let second = create_timestamped_output_dir(base.path()).unwrap();
        assert_ne!(first, second);
        assert!(first.is_dir() && second.is_dir());
    }
}
