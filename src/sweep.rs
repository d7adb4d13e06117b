use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{aggregate, measurement_error, Aggregate};
use crate::config::SweepConfig;
use crate::filter::CombinationFilter;
use crate::output::{
    write_summary_json, CsvResultSink, SweepSummary, TableSchema, DISTANCE, RESULTS_FILE,
    SUMMARY_FILE,
};
use crate::plot::{write_plot_data, PlotData, PLOT_DATA_FILE};
use crate::report::TrialObservation;
use crate::simulator::Simulator;
use crate::space::{Combination, CombinationKey, ParameterSpace};
use crate::trial::TrialRunner;
use crate::SweepError;

/// One surviving, aggregated combination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinationResult {
    pub combination: Combination,
    pub trials: Vec<TrialObservation>,
    pub aggregate: Aggregate,
    /// Only set when the combination sweeps `distance`.
    pub measurement_error: Option<f64>,
}

impl CombinationResult {
    pub fn finalize(combination: Combination, trials: Vec<TrialObservation>) -> Self {
        let aggregate = aggregate(&trials);
        let measurement_error = combination
            .get(DISTANCE)
            .map(|distance| measurement_error(aggregate.rtt.mean, distance.as_f64()));

        Self {
            combination,
            trials,
            aggregate,
            measurement_error,
        }
    }

    pub fn key(&self) -> CombinationKey {
        self.combination.key()
    }

    pub fn label(&self) -> String {
        self.combination.label()
    }

    pub fn is_degenerate(&self) -> bool {
        self.aggregate.is_degenerate()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepOutcome {
    /// Written combinations, in sweep order.
    pub results: Vec<CombinationResult>,
    pub total: usize,
    pub skipped: usize,
    pub degenerate: usize,
}

/// Runs every combination that survives `filter`, appending one row per
/// non-degenerate result to `sink`.
pub fn run_sweep<S: Simulator, W: Write>(
    space: &ParameterSpace,
    filter: &CombinationFilter,
    runner: &mut TrialRunner<S>,
    sink: &mut CsvResultSink<W>,
    trials: usize,
) -> Result<SweepOutcome, SweepError> {
    if trials == 0 {
        return Err(SweepError::InvalidConfig(
            "trials must be greater than zero".to_string(),
        ));
    }

    let combinations = space.combinations();
    if combinations.is_empty() {
        return Err(SweepError::EmptySpace);
    }

    let mut outcome = SweepOutcome {
        total: combinations.len(),
        ..SweepOutcome::default()
    };

    let mut pending = Vec::with_capacity(combinations.len());
    for combination in combinations {
        match filter.matching_rule(&combination) {
            Some(rule) => {
                debug!(combination = %combination, rule = %rule.name, "skipping combination");
                outcome.skipped += 1;
            }
            None => pending.push(combination),
        }
    }

    if pending.is_empty() {
        return Err(SweepError::EmptySpace);
    }

    info!(
        total = outcome.total,
        skipped = outcome.skipped,
        trials,
        "starting sweep"
    );

    for combination in pending {
        let observations = runner.run_trials(&combination, trials)?;
        let result = CombinationResult::finalize(combination, observations);

        if result.is_degenerate() {
            info!(combination = %result.combination, "no usable RTT in any trial, dropping combination");
            outcome.degenerate += 1;
            continue;
        }

        sink.append(&result)?;
        outcome.results.push(result);
    }

    info!(
        written = outcome.results.len(),
        degenerate = outcome.degenerate,
        "sweep finished"
    );
    Ok(outcome)
}

/// Files produced by [`run_sweep_into_dir`].
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub run_dir: PathBuf,
    pub results_path: PathBuf,
    pub summary_path: PathBuf,
    pub plot_data_path: PathBuf,
    pub outcome: SweepOutcome,
    pub summary: SweepSummary,
}

/// Full sweep for `config` inside `run_dir`: raw trial output, results table,
/// summary and plot data.
pub fn run_sweep_into_dir<S: Simulator>(
    config: &SweepConfig,
    simulator: S,
    run_dir: &Path,
) -> Result<SweepReport, SweepError> {
    config.validate()?;
    let space = config.parameter_space()?;
    let filter = config.combination_filter();
    fs::create_dir_all(run_dir)?;

    let started_at = Utc::now();
    let results_path = run_dir.join(RESULTS_FILE);
    let mut sink = CsvResultSink::from_path(&results_path, TableSchema::for_parameters(&space.names()))?;
    let mut runner = TrialRunner::new(simulator, run_dir, config.random_seed);

    let outcome = run_sweep(&space, &filter, &mut runner, &mut sink, config.trials)?;

    let summary = SweepSummary {
        parameters: space.names(),
        trials_per_combination: config.trials,
        total_combinations: outcome.total,
        skipped_combinations: outcome.skipped,
        degenerate_combinations: outcome.degenerate,
        written_combinations: outcome.results.len(),
        started_at,
        finished_at: Utc::now(),
    };
    let summary_path = run_dir.join(SUMMARY_FILE);
    write_summary_json(&summary_path, &summary)?;

    let plot_data = PlotData::from_results(
        &outcome.results,
        config.plot.x_parameter.as_deref(),
        config.plot.reference_distance,
    );
    let plot_data_path = run_dir.join(PLOT_DATA_FILE);
    write_plot_data(&plot_data_path, &plot_data)?;

    Ok(SweepReport {
        run_dir: run_dir.to_path_buf(),
        results_path,
        summary_path,
        plot_data_path,
        outcome,
        summary,
    })
}
