use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::report::{parse_report, TrialObservation};
use crate::simulator::{Invocation, Simulator};
use crate::space::Combination;
use crate::SweepError;

/// Range the per-trial simulator seed is drawn from.
pub const SEED_RANGE: RangeInclusive<u64> = 100_000..=999_999;
pub const RAW_OUTPUT_FILE: &str = "output.txt";

/// Runs the repeated trials of one combination against a [`Simulator`].
pub struct TrialRunner<S> {
    simulator: S,
    run_dir: PathBuf,
    rng: StdRng,
}

impl<S: Simulator> TrialRunner<S> {
    /// `seed` fixes the sequence of trial seeds; `None` draws from entropy.
    pub fn new(simulator: S, run_dir: impl Into<PathBuf>, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            simulator,
            run_dir: run_dir.into(),
            rng,
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn simulator(&self) -> &S {
        &self.simulator
    }

    pub fn into_simulator(self) -> S {
        self.simulator
    }

    /// `<run_dir>/<combination label>/<trial>`
    pub fn trial_dir(&self, combination: &Combination, trial: usize) -> PathBuf {
        self.run_dir
            .join(combination.label())
            .join(trial.to_string())
    }

    pub fn run_trials(
        &mut self,
        combination: &Combination,
        trial_count: usize,
    ) -> Result<Vec<TrialObservation>, SweepError> {
        let mut observations = Vec::with_capacity(trial_count);

        for trial in 1..=trial_count {
            observations.push(self.run_trial(combination, trial)?);
        }

        Ok(observations)
    }

    fn run_trial(
        &mut self,
        combination: &Combination,
        trial: usize,
    ) -> Result<TrialObservation, SweepError> {
        let seed = self.rng.gen_range(SEED_RANGE);
        let trial_dir = self.trial_dir(combination, trial);
        fs::create_dir_all(&trial_dir)?;

        let invocation = Invocation {
            combination: combination.clone(),
            trial,
            seed,
            output_path: trial_dir.join(trial.to_string()),
        };
        let output = self.simulator.run(&invocation)?;
        fs::write(trial_dir.join(RAW_OUTPUT_FILE), &output.stdout)?;

        let observation = if output.success {
            parse_report(&output.text())?
        } else {
            TrialObservation::default()
        };

        info!(trial, seed, combination = %combination, "trial completed");
        let missing = observation.missing();
        if !missing.is_empty() {
            warn!(
                trial,
                combination = %combination,
                ?missing,
                "trial report is missing metrics"
            );
        }

        Ok(observation)
    }
}
