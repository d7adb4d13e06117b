//! ftm-sweep - parameter sweeps for ns-3 Wi-Fi Fine Timing Measurement runs
//!
//! Enumerates parameter combinations, drops physically inconsistent ones,
//! runs the external simulator several times per combination, and reduces
//! the parsed reports into a stable CSV table plus chart-ready series.

pub mod aggregate;
pub mod config;
pub mod filter;
pub mod output;
pub mod plot;
pub mod report;
pub mod simulator;
pub mod space;
pub mod sweep;
pub mod trial;

use thiserror::Error;

pub use aggregate::{aggregate, measurement_error, Aggregate, MetricSummary};
pub use config::SweepConfig;
pub use filter::{CombinationFilter, SkipRule};
pub use output::{create_timestamped_output_dir, CsvResultSink, TableSchema};
pub use plot::PlotData;
pub use report::{parse_report, Metric, ParseError, TrialObservation};
pub use simulator::{CommandTemplate, Invocation, ProcessSimulator, Simulator, SimulatorOutput};
pub use space::{Combination, CombinationKey, ParamValue, Parameter, ParameterSpace};
pub use sweep::{run_sweep, CombinationResult, SweepOutcome};
pub use trial::TrialRunner;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("parameter '{name}' has no candidate values")]
    EmptyParameter { name: String },
    #[error("parameter space has no combinations left to run")]
    EmptySpace,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("failed to launch simulator '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl SweepError {
    /// Configuration faults abort the sweep before any trial runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SweepError::InvalidConfig(_) | SweepError::EmptyParameter { .. } | SweepError::EmptySpace
        )
    }
}
